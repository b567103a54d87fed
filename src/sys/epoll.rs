use std::io;

use log::trace;

use crate::error::{Error, Result};
use crate::interest::{Interest, Trigger, Want};
use crate::sys::{timeout_to_poll_ms, Driver, Fired, InterestSnapshot, WaitSet};
use crate::Handle;

/// The Linux `epoll` backend.
///
/// Interest lives in the kernel: registration changes are applied with
/// `epoll_ctl` as they happen and the wait ignores the demultiplexer's
/// interest snapshot. Edge triggering maps to `EPOLLET`. One-shot is
/// emulated above this layer by hiding fired bits, keeping the entry's
/// interest and the kernel state in agreement.
#[derive(Debug)]
pub(crate) struct EpollDriver {
    epfd: Handle,
}

impl EpollDriver {
    pub(crate) fn new() -> Result<EpollDriver> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::last_os_error());
        }
        Ok(EpollDriver { epfd })
    }

    fn control(&self, op: libc::c_int, handle: Handle, interest: Option<Interest>) -> Result<()> {
        let mut event = libc::epoll_event {
            events: interest.map(interest_to_epoll).unwrap_or(0),
            u64: handle as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, handle, &mut event) };
        if rc < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let want = interest.want();
    let mut events = 0;
    if want.contains(Want::READABLE) {
        events |= libc::EPOLLIN | libc::EPOLLRDHUP;
    }
    if want.contains(Want::WRITABLE) {
        events |= libc::EPOLLOUT;
    }
    // EPOLLERR and EPOLLHUP are always reported.
    if interest.trigger() == Trigger::Edge {
        events |= libc::EPOLLET;
    }
    events as u32
}

impl Driver for EpollDriver {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn supports_trigger(&self, _trigger: Trigger) -> bool {
        true
    }

    fn add(&self, handle: Handle, interest: Interest) -> Result<()> {
        trace!("epoll add; fd={}", handle);
        self.control(libc::EPOLL_CTL_ADD, handle, Some(interest))
    }

    fn update(&self, handle: Handle, interest: Interest) -> Result<()> {
        self.control(libc::EPOLL_CTL_MOD, handle, Some(interest))
    }

    fn remove(&self, handle: Handle) -> Result<()> {
        trace!("epoll remove; fd={}", handle);
        self.control(libc::EPOLL_CTL_DEL, handle, None)
    }

    fn wait(
        &self,
        set: &mut WaitSet,
        _snapshot: &InterestSnapshot,
        timeout: Option<u64>,
    ) -> Result<usize> {
        set.fired.clear();
        set.epoll_events.clear();

        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                set.epoll_events.as_mut_ptr(),
                set.capacity as libc::c_int,
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
        unsafe { set.epoll_events.set_len(rc as usize) };

        for event in &set.epoll_events {
            let bits = event.events as libc::c_int;
            set.fired.push(Fired {
                handle: event.u64 as Handle,
                readable: (bits & (libc::EPOLLIN | libc::EPOLLPRI)) != 0,
                writable: (bits & libc::EPOLLOUT) != 0,
                error: (bits & libc::EPOLLERR) != 0,
                hangup: (bits & (libc::EPOLLHUP | libc::EPOLLRDHUP)) != 0,
                invalid: false,
            });
        }

        Ok(set.fired.len())
    }
}

impl Drop for EpollDriver {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_both_triggers() {
        let driver = EpollDriver::new().unwrap();
        assert!(driver.supports_trigger(Trigger::Level));
        assert!(driver.supports_trigger(Trigger::Edge));
    }

    #[test]
    fn observes_pipe_readability() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let driver = EpollDriver::new().unwrap();
        driver
            .add(fds[0], Interest::none().show_readable())
            .unwrap();

        let snapshot = InterestSnapshot::default();
        let mut set = WaitSet::with_capacity(4);

        let fired = driver.wait(&mut set, &snapshot, Some(0)).unwrap();
        assert_eq!(fired, 0);

        let byte = 1u8;
        unsafe { libc::write(fds[1], &byte as *const u8 as *const libc::c_void, 1) };

        let fired = driver.wait(&mut set, &snapshot, Some(100)).unwrap();
        assert_eq!(fired, 1);
        assert!(set.fired[0].readable);
        assert_eq!(set.fired[0].handle, fds[0]);

        driver.remove(fds[0]).unwrap();
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
