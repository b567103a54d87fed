//! Backend-specific realizations of the abstract event source.
//!
//! A [`Driver`] supplies the wait primitive a demultiplexer blocks in and
//! the per-descriptor interest registration behind it. Drivers differ in
//! where interest lives: the `epoll` driver keeps it in the kernel, while
//! the `poll` driver reconstructs a descriptor array from the
//! demultiplexer's interest snapshot whenever the snapshot generation
//! changes.

use crate::error::Result;
use crate::interest::{Interest, Trigger, Want};
use crate::Handle;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) mod epoll;
pub(crate) mod poll;
pub(crate) mod socket;

/// Selects the readiness backend of a demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The Linux `epoll` facility. Supports edge triggering.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Epoll,
    /// The portable POSIX `poll(2)` primitive. Level-triggered only.
    Poll,
}

impl Backend {
    /// Returns the preferred backend for this platform.
    pub fn default_for_platform() -> Backend {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            Backend::Epoll
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Backend::Poll
        }
    }
}

pub(crate) fn new_driver(backend: Backend) -> Result<Box<dyn Driver>> {
    match backend {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Backend::Epoll => Ok(Box::new(epoll::EpollDriver::new()?)),
        Backend::Poll => Ok(Box::new(poll::PollDriver::new())),
    }
}

/// One descriptor's fired condition bits from a single wait.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fired {
    pub(crate) handle: Handle,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: bool,
    pub(crate) hangup: bool,
    pub(crate) invalid: bool,
}

impl Fired {
    pub(crate) fn any(&self) -> bool {
        self.readable || self.writable || self.error || self.hangup || self.invalid
    }
}

/// Per-waiter wait buffers, reused across iterations.
pub(crate) struct WaitSet {
    pub(crate) fired: Vec<Fired>,
    pub(crate) generation: u64,
    pub(crate) pollfds: Vec<libc::pollfd>,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) epoll_events: Vec<libc::epoll_event>,
    pub(crate) capacity: usize,
}

impl WaitSet {
    pub(crate) fn with_capacity(capacity: usize) -> WaitSet {
        WaitSet {
            fired: Vec::with_capacity(capacity),
            generation: 0,
            pollfds: Vec::new(),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            epoll_events: Vec::with_capacity(capacity),
            capacity,
        }
    }
}

/// One descriptor's interest in the demultiplexer's snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SnapshotEntry {
    pub(crate) handle: Handle,
    pub(crate) want: Want,
}

/// The interest of every demultiplexed descriptor at one generation.
#[derive(Debug, Clone, Default)]
pub(crate) struct InterestSnapshot {
    pub(crate) generation: u64,
    pub(crate) entries: Vec<SnapshotEntry>,
}

/// A readiness backend.
pub(crate) trait Driver: Send + Sync {
    /// The backend's name, for logging.
    fn name(&self) -> &'static str;

    /// Returns true if the backend can honor the given trigger mode.
    fn supports_trigger(&self, trigger: Trigger) -> bool;

    /// Registers a descriptor with its initial interest.
    fn add(&self, handle: Handle, interest: Interest) -> Result<()>;

    /// Replaces a descriptor's interest.
    fn update(&self, handle: Handle, interest: Interest) -> Result<()>;

    /// Unregisters a descriptor.
    fn remove(&self, handle: Handle) -> Result<()>;

    /// Waits for events for at most `timeout` milliseconds (indefinitely
    /// if `None`), filling `set.fired`. Returns the number of fired
    /// descriptors; zero on timeout or interruption by a signal.
    fn wait(
        &self,
        set: &mut WaitSet,
        snapshot: &InterestSnapshot,
        timeout: Option<u64>,
    ) -> Result<usize>;
}

pub(crate) fn timeout_to_poll_ms(timeout: Option<u64>) -> libc::c_int {
    match timeout {
        Some(ms) => ms.min(libc::c_int::MAX as u64) as libc::c_int,
        None => -1,
    }
}
