use crate::error::{Error, Result};
use crate::event::NotificationQueue;
use crate::Handle;

/// Probes the pending error on a socket via `SO_ERROR`, clearing it.
/// Returns `None` when no error is pending.
pub(crate) fn socket_error(handle: Handle) -> Result<Option<Error>> {
    let mut error: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            handle,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut error as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(Error::last_os_error());
    }
    if error == 0 {
        Ok(None)
    } else {
        Ok(Some(Error::Os(error)))
    }
}

/// Sets or clears the `SO_ZEROCOPY` option on a socket.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn set_zero_copy(handle: Handle, enabled: bool) -> Result<()> {
    let value: libc::c_int = if enabled { 1 } else { 0 };
    let rc = unsafe {
        libc::setsockopt(
            handle,
            libc::SOL_SOCKET,
            libc::SO_ZEROCOPY,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_zero_copy(_handle: Handle, _enabled: bool) -> Result<()> {
    Err(Error::NotImplemented)
}

// sock_extended_err origins and codes, from linux/errqueue.h.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SO_EE_ORIGIN_ZEROCOPY: u8 = 5;
#[cfg(any(target_os = "linux", target_os = "android"))]
const SO_EE_CODE_ZEROCOPY_COPIED: u8 = 1;

/// Drains the socket's error queue into a notification queue.
///
/// Zero-copy transmission acknowledgements arrive here; anything else in
/// the queue is consumed and ignored.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn receive_notifications(handle: Handle) -> Result<NotificationQueue> {
    let mut queue = NotificationQueue::new(handle);

    loop {
        // Aligned storage for control messages.
        let mut control = [0u64; 64];
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = std::mem::size_of_val(&control);

        let rc = unsafe {
            libc::recvmsg(handle, &mut msg, libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT)
        };
        if rc < 0 {
            let error = std::io::Error::last_os_error();
            if error.kind() == std::io::ErrorKind::WouldBlock {
                break;
            }
            return Err(Error::from(error));
        }

        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg.is_null() {
            let header = unsafe { &*cmsg };
            let is_recverr = (header.cmsg_level == libc::SOL_IP
                && header.cmsg_type == libc::IP_RECVERR)
                || (header.cmsg_level == libc::SOL_IPV6
                    && header.cmsg_type == libc::IPV6_RECVERR);
            if is_recverr {
                let extended = unsafe {
                    &*(libc::CMSG_DATA(cmsg) as *const libc::sock_extended_err)
                };
                if extended.ee_origin == SO_EE_ORIGIN_ZEROCOPY {
                    queue.push(crate::event::Notification::ZeroCopy {
                        from: extended.ee_info,
                        to: extended.ee_data,
                        copied: extended.ee_code == SO_EE_CODE_ZEROCOPY_COPIED,
                    });
                }
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
        }
    }

    Ok(queue)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn receive_notifications(handle: Handle) -> Result<NotificationQueue> {
    Ok(NotificationQueue::new(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_error_is_clear_on_fresh_socket() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        assert_eq!(socket_error(fd).unwrap(), None);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn socket_error_fails_on_bad_handle() {
        assert!(socket_error(-1).is_err());
    }
}
