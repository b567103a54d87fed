use std::io;

use log::trace;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::Handle;

/// A duplex self-signalling channel used to unblock a demultiplexer from
/// another thread.
///
/// `interrupt(n)` posts `n` wake-up tokens; the demultiplexer, on
/// detecting readability of [`handle`], calls [`acknowledge`] to drain
/// exactly one token per observed event. If acknowledging fails the
/// controller is reinitialized: closed, recreated, and re-registered by
/// its owner.
///
/// On Linux this is an `eventfd` in semaphore mode; elsewhere a pipe
/// pair.
///
/// [`handle`]: Controller::handle
/// [`acknowledge`]: Controller::acknowledge
#[derive(Debug)]
pub struct Controller {
    fds: Mutex<Fds>,
}

#[derive(Debug, Clone, Copy)]
struct Fds {
    reader: Handle,
    writer: Handle,
}

impl Fds {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn new() -> Result<Fds> {
        let fd = unsafe {
            libc::eventfd(
                0,
                libc::EFD_CLOEXEC | libc::EFD_NONBLOCK | libc::EFD_SEMAPHORE,
            )
        };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        Ok(Fds {
            reader: fd,
            writer: fd,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn new() -> Result<Fds> {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return Err(Error::last_os_error());
        }
        for fd in fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        Ok(Fds {
            reader: fds[0],
            writer: fds[1],
        })
    }

    fn close(self) {
        unsafe {
            let _ = libc::close(self.reader);
            if self.writer != self.reader {
                let _ = libc::close(self.writer);
            }
        }
    }

    fn interrupt(&self, count: usize) -> Result<()> {
        if self.reader == self.writer {
            // eventfd: one write adds the whole count.
            let value = count as u64;
            let n = unsafe {
                libc::write(
                    self.writer,
                    &value as *const u64 as *const libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if n < 0 {
                let error = io::Error::last_os_error();
                if error.kind() != io::ErrorKind::WouldBlock {
                    return Err(Error::from(error));
                }
            }
            return Ok(());
        }
        for _ in 0..count {
            let token = 1u8;
            let n = unsafe {
                libc::write(self.writer, &token as *const u8 as *const libc::c_void, 1)
            };
            if n < 0 {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::WouldBlock {
                    // The pipe is full of unacknowledged tokens; the
                    // waiter will wake regardless.
                    return Ok(());
                }
                return Err(Error::from(error));
            }
        }
        Ok(())
    }

    fn acknowledge(&self) -> Result<()> {
        if self.reader == self.writer {
            let mut value = 0u64;
            let n = unsafe {
                libc::read(
                    self.reader,
                    &mut value as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if n < 0 {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                return Err(Error::from(error));
            }
            return Ok(());
        }
        let mut token = 0u8;
        let n = unsafe { libc::read(self.reader, &mut token as *mut u8 as *mut libc::c_void, 1) };
        if n < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(Error::from(error));
        }
        if n == 0 {
            return Err(Error::ConnectionDead);
        }
        Ok(())
    }
}

impl Controller {
    /// Returns a new controller.
    pub fn new() -> Result<Controller> {
        Ok(Controller {
            fds: Mutex::new(Fds::new()?),
        })
    }

    /// Returns the readable descriptor registered with the demultiplexer.
    pub fn handle(&self) -> Handle {
        self.fds.lock().reader
    }

    /// Posts `count` wake-up tokens.
    pub fn interrupt(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.fds.lock().interrupt(count)
    }

    /// Drains exactly one wake-up token. Draining an empty controller is
    /// a no-op, so a spurious readable event is harmless.
    pub fn acknowledge(&self) -> Result<()> {
        self.fds.lock().acknowledge()
    }

    /// Closes and recreates the underlying channel, returning the new
    /// readable descriptor. The owner must re-register it.
    pub fn reinitialize(&self) -> Result<Handle> {
        trace!("reinitializing controller");
        let mut fds = self.fds.lock();
        let fresh = Fds::new()?;
        let stale = std::mem::replace(&mut *fds, fresh);
        stale.close();
        Ok(fds.reader)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.fds.lock().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readable(handle: Handle) -> bool {
        let mut pfd = libc::pollfd {
            fd: handle,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
        rc == 1 && (pfd.revents & libc::POLLIN) != 0
    }

    #[test]
    fn interrupt_makes_handle_readable() {
        let controller = Controller::new().unwrap();
        assert!(!readable(controller.handle()));

        controller.interrupt(1).unwrap();
        assert!(readable(controller.handle()));
    }

    #[test]
    fn acknowledge_drains_one_token_per_call() {
        let controller = Controller::new().unwrap();
        controller.interrupt(2).unwrap();

        controller.acknowledge().unwrap();
        assert!(readable(controller.handle()));

        controller.acknowledge().unwrap();
        assert!(!readable(controller.handle()));
    }

    #[test]
    fn acknowledge_of_empty_controller_is_harmless() {
        let controller = Controller::new().unwrap();
        controller.acknowledge().unwrap();
    }

    #[test]
    fn reinitialize_replaces_the_descriptor() {
        let controller = Controller::new().unwrap();
        controller.interrupt(1).unwrap();

        let fresh = controller.reinitialize().unwrap();
        assert_eq!(fresh, controller.handle());
        assert!(!readable(controller.handle()));
    }
}
