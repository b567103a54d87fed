use std::time::Instant;

/// The answer to a rate limiter query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquire {
    /// True if the requested bytes may move now.
    pub allowed: bool,
    /// If not allowed, the earliest instant at which a retry may succeed.
    pub retry_at: Option<Instant>,
}

impl Acquire {
    /// Returns an unconditional grant.
    pub fn allowed() -> Acquire {
        Acquire {
            allowed: true,
            retry_at: None,
        }
    }

    /// Returns a denial with a suggested retry instant.
    pub fn denied_until(retry_at: Instant) -> Acquire {
        Acquire {
            allowed: false,
            retry_at: Some(retry_at),
        }
    }
}

/// A byte-rate limiter consulted before moving bytes to or from the
/// operating system.
///
/// The limiter's arithmetic is external to this crate; the engine only
/// requires the acquire query. A denial pauses the affected queue until
/// `retry_at`, at which point the engine re-arms itself.
pub trait RateLimiter: Send + Sync {
    /// Asks to move `bytes` now.
    fn acquire(&self, bytes: usize) -> Acquire;
}
