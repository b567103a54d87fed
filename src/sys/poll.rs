use std::io;

use log::trace;

use crate::error::{Error, Result};
use crate::interest::{Interest, Trigger, Want};
use crate::sys::{timeout_to_poll_ms, Driver, Fired, InterestSnapshot, WaitSet};
use crate::Handle;

/// The portable `poll(2)` backend.
///
/// Interest lives entirely in user space: every wait hands the kernel a
/// descriptor array rebuilt from the demultiplexer's interest snapshot
/// whenever the snapshot generation has moved. Edge triggering has no
/// kernel support here and is rejected; one-shot is emulated above this
/// layer by hiding fired bits.
#[derive(Debug, Default)]
pub(crate) struct PollDriver;

impl PollDriver {
    pub(crate) fn new() -> PollDriver {
        PollDriver
    }
}

fn want_to_events(want: Want) -> libc::c_short {
    let mut events = 0;
    if want.contains(Want::READABLE) {
        events |= libc::POLLIN;
    }
    if want.contains(Want::WRITABLE) {
        events |= libc::POLLOUT;
    }
    // POLLERR, POLLHUP and POLLNVAL are always reported.
    events
}

impl Driver for PollDriver {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn supports_trigger(&self, trigger: Trigger) -> bool {
        trigger == Trigger::Level
    }

    fn add(&self, _handle: Handle, interest: Interest) -> Result<()> {
        if interest.trigger() == Trigger::Edge {
            return Err(Error::NotImplemented);
        }
        Ok(())
    }

    fn update(&self, _handle: Handle, interest: Interest) -> Result<()> {
        if interest.trigger() == Trigger::Edge {
            return Err(Error::NotImplemented);
        }
        Ok(())
    }

    fn remove(&self, _handle: Handle) -> Result<()> {
        Ok(())
    }

    fn wait(
        &self,
        set: &mut WaitSet,
        snapshot: &InterestSnapshot,
        timeout: Option<u64>,
    ) -> Result<usize> {
        if set.generation != snapshot.generation || set.pollfds.len() != snapshot.entries.len() {
            trace!(
                "rebuilding pollfd array; descriptors={}",
                snapshot.entries.len()
            );
            set.generation = snapshot.generation;
            set.pollfds.clear();
            set.pollfds.reserve(snapshot.entries.len());
            for entry in &snapshot.entries {
                set.pollfds.push(libc::pollfd {
                    fd: entry.handle,
                    events: want_to_events(entry.want),
                    revents: 0,
                });
            }
        } else {
            for pfd in &mut set.pollfds {
                pfd.revents = 0;
            }
        }

        set.fired.clear();

        let rc = unsafe {
            libc::poll(
                set.pollfds.as_mut_ptr(),
                set.pollfds.len() as libc::nfds_t,
                timeout_to_poll_ms(timeout),
            )
        };
        if rc < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(Error::from(error));
        }

        let mut remaining = rc as usize;
        for pfd in &set.pollfds {
            if remaining == 0 {
                break;
            }
            if pfd.revents == 0 {
                continue;
            }
            remaining -= 1;
            set.fired.push(Fired {
                handle: pfd.fd,
                readable: (pfd.revents & libc::POLLIN) != 0,
                writable: (pfd.revents & libc::POLLOUT) != 0,
                error: (pfd.revents & libc::POLLERR) != 0,
                hangup: (pfd.revents & libc::POLLHUP) != 0,
                invalid: (pfd.revents & libc::POLLNVAL) != 0,
            });
        }

        Ok(set.fired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::SnapshotEntry;

    #[test]
    fn rejects_edge_trigger() {
        let driver = PollDriver::new();
        assert!(!driver.supports_trigger(Trigger::Edge));
        let interest = Interest::none().show_readable().with_trigger(Trigger::Edge);
        assert_eq!(driver.add(0, interest), Err(Error::NotImplemented));
    }

    #[test]
    fn observes_pipe_readability() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let driver = PollDriver::new();
        let snapshot = InterestSnapshot {
            generation: 1,
            entries: vec![SnapshotEntry {
                handle: fds[0],
                want: Want::READABLE,
            }],
        };
        let mut set = WaitSet::with_capacity(4);

        let fired = driver.wait(&mut set, &snapshot, Some(0)).unwrap();
        assert_eq!(fired, 0);

        let byte = 1u8;
        unsafe { libc::write(fds[1], &byte as *const u8 as *const libc::c_void, 1) };

        let fired = driver.wait(&mut set, &snapshot, Some(100)).unwrap();
        assert_eq!(fired, 1);
        assert!(set.fired[0].readable);
        assert_eq!(set.fired[0].handle, fds[0]);

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
