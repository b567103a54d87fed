use parking_lot::{Condvar, Mutex};

/// Counting semaphore used to serialize the backend wait across waiters
/// and to block close guards until asynchronous close completes.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Semaphore {
        Semaphore {
            permits: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    pub(crate) fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn release_unblocks_acquire() {
        let semaphore = Arc::new(Semaphore::new(0));
        let other = Arc::clone(&semaphore);
        let handle = thread::spawn(move || other.acquire());
        semaphore.release();
        handle.join().unwrap();
    }
}
