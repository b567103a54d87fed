use std::sync::Arc;

use crate::stream::StreamSocket;
use crate::sync::Semaphore;

/// Scoped acquisition of a stream socket that blocks until asynchronous
/// close completes.
///
/// Dropping the guard initiates [`close`] and waits for the close
/// callback, so the socket's descriptor and callbacks are fully retired
/// when the scope exits. Use [`release`] to move the socket out without
/// closing it.
///
/// The guard must not be dropped on a demultiplexer thread: the wait
/// would block the very loop that announces the close.
///
/// [`close`]: StreamSocket::close
/// [`release`]: CloseGuard::release
#[derive(Debug)]
pub struct CloseGuard {
    socket: Option<Arc<StreamSocket>>,
}

impl CloseGuard {
    /// Returns a guard owning a reference to `socket`.
    pub fn new(socket: Arc<StreamSocket>) -> CloseGuard {
        CloseGuard {
            socket: Some(socket),
        }
    }

    /// Returns the guarded socket.
    pub fn socket(&self) -> Option<&Arc<StreamSocket>> {
        self.socket.as_ref()
    }

    /// Disarms the guard and returns the socket without closing it.
    pub fn release(mut self) -> Option<Arc<StreamSocket>> {
        self.socket.take()
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            let semaphore = Arc::new(Semaphore::new(0));
            let signal = Arc::clone(&semaphore);
            socket.close(Some(Box::new(move || signal.release())));
            semaphore.acquire();
        }
    }
}
