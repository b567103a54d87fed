use std::sync::atomic::{AtomicU64, Ordering};

/// Caller-provided identifier for a pending operation, usable with the
/// `cancel` family of operations.
///
/// Tokens carry no meaning to the framework beyond equality; callers may
/// mint them from their own numbering scheme or draw unique values from
/// [`CancelToken::next`].
///
/// A cancellation that loses the race with the operation completes
/// normally; one that wins completes with [`Error::Cancelled`].
///
/// [`Error::Cancelled`]: crate::Error::Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CancelToken(pub u64);

impl CancelToken {
    /// Returns a token unique for the lifetime of the process.
    pub fn next() -> CancelToken {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CancelToken(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for CancelToken {
    fn from(value: u64) -> CancelToken {
        CancelToken(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_unique() {
        let a = CancelToken::next();
        let b = CancelToken::next();
        assert_ne!(a, b);
    }
}
