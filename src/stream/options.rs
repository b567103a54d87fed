use std::time::{Duration, Instant};

use crate::crypto::EncryptionRole;
use crate::token::CancelToken;

/// Configuration of a stream socket, applied at open time.
#[derive(Debug, Clone)]
pub struct StreamSocketOptions {
    write_queue_low_watermark: usize,
    write_queue_high_watermark: usize,
    read_queue_low_watermark: usize,
    read_queue_high_watermark: usize,
    zero_copy_threshold: Option<usize>,
    keep_alive: bool,
    no_delay: bool,
}

impl StreamSocketOptions {
    /// Returns the default options: unbounded queues, no zero-copy hint,
    /// kernel defaults for socket options.
    pub fn new() -> StreamSocketOptions {
        StreamSocketOptions::default()
    }

    /// Sets the write queue watermarks.
    pub fn set_write_queue_watermarks(&mut self, low: usize, high: usize) -> &mut Self {
        self.write_queue_low_watermark = low;
        self.write_queue_high_watermark = high;
        self
    }

    /// Sets the read queue watermarks.
    pub fn set_read_queue_watermarks(&mut self, low: usize, high: usize) -> &mut Self {
        self.read_queue_low_watermark = low;
        self.read_queue_high_watermark = high;
        self
    }

    /// Sets the minimum send size above which the engine may request
    /// zero-copy transmission from the OS. Purely a hint.
    pub fn set_zero_copy_threshold(&mut self, threshold: usize) -> &mut Self {
        self.zero_copy_threshold = Some(threshold);
        self
    }

    /// Enables TCP keep-alive probes.
    pub fn set_keep_alive(&mut self, keep_alive: bool) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Disables Nagle coalescing.
    pub fn set_no_delay(&mut self, no_delay: bool) -> &mut Self {
        self.no_delay = no_delay;
        self
    }

    pub(crate) fn write_queue_low_watermark(&self) -> usize {
        self.write_queue_low_watermark
    }

    pub(crate) fn write_queue_high_watermark(&self) -> usize {
        self.write_queue_high_watermark
    }

    pub(crate) fn read_queue_low_watermark(&self) -> usize {
        self.read_queue_low_watermark
    }

    pub(crate) fn read_queue_high_watermark(&self) -> usize {
        self.read_queue_high_watermark
    }

    pub(crate) fn zero_copy_threshold(&self) -> Option<usize> {
        self.zero_copy_threshold
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub(crate) fn no_delay(&self) -> bool {
        self.no_delay
    }
}

impl Default for StreamSocketOptions {
    fn default() -> StreamSocketOptions {
        StreamSocketOptions {
            write_queue_low_watermark: 0,
            write_queue_high_watermark: usize::MAX,
            read_queue_low_watermark: 0,
            read_queue_high_watermark: usize::MAX,
            zero_copy_threshold: None,
            keep_alive: false,
            no_delay: false,
        }
    }
}

/// Options qualifying a bind.
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    reuse_address: bool,
    token: Option<CancelToken>,
}

impl BindOptions {
    /// Returns default bind options.
    pub fn new() -> BindOptions {
        BindOptions::default()
    }

    /// Permits binding an address in `TIME_WAIT`.
    pub fn set_reuse_address(&mut self, reuse_address: bool) -> &mut Self {
        self.reuse_address = reuse_address;
        self
    }

    /// Associates a cancellation token.
    pub fn set_token(&mut self, token: CancelToken) -> &mut Self {
        self.token = Some(token);
        self
    }

    pub(crate) fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    pub(crate) fn token(&self) -> Option<CancelToken> {
        self.token
    }
}

/// Options qualifying a connect.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    deadline: Option<Instant>,
    token: Option<CancelToken>,
    retry_count: usize,
    retry_interval: Duration,
}

impl ConnectOptions {
    /// Returns default connect options: no deadline, no retries.
    pub fn new() -> ConnectOptions {
        ConnectOptions::default()
    }

    /// Sets the absolute deadline; reaching it forces the socket to
    /// close.
    pub fn set_deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// Associates a cancellation token.
    pub fn set_token(&mut self, token: CancelToken) -> &mut Self {
        self.token = Some(token);
        self
    }

    /// Bounds the number of reconnection attempts after the first.
    pub fn set_retry_count(&mut self, retry_count: usize) -> &mut Self {
        self.retry_count = retry_count;
        self
    }

    /// Sets the pause between reconnection attempts.
    pub fn set_retry_interval(&mut self, retry_interval: Duration) -> &mut Self {
        self.retry_interval = retry_interval;
        self
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn token(&self) -> Option<CancelToken> {
        self.token
    }

    pub(crate) fn retry_count(&self) -> usize {
        self.retry_count
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

impl Default for ConnectOptions {
    fn default() -> ConnectOptions {
        ConnectOptions {
            deadline: None,
            token: None,
            retry_count: 0,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Options qualifying a send.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    deadline: Option<Instant>,
    token: Option<CancelToken>,
}

impl SendOptions {
    /// Returns default send options.
    pub fn new() -> SendOptions {
        SendOptions::default()
    }

    /// Sets the absolute deadline; a send whose first byte has not
    /// entered the OS send buffer by then completes with
    /// [`Error::WouldBlock`].
    ///
    /// [`Error::WouldBlock`]: crate::Error::WouldBlock
    pub fn set_deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// Associates a cancellation token.
    pub fn set_token(&mut self, token: CancelToken) -> &mut Self {
        self.token = Some(token);
        self
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn token(&self) -> Option<CancelToken> {
        self.token
    }
}

/// Options qualifying a receive.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    min_size: usize,
    max_size: usize,
    deadline: Option<Instant>,
    token: Option<CancelToken>,
}

impl ReceiveOptions {
    /// Returns default receive options: deliver any non-empty amount.
    pub fn new() -> ReceiveOptions {
        ReceiveOptions::default()
    }

    /// Sets the capacity constraints: the receive is satisfied once
    /// `min_size` bytes are queued and delivers at most `max_size`.
    pub fn set_size(&mut self, min_size: usize, max_size: usize) -> &mut Self {
        self.min_size = min_size.max(1);
        self.max_size = max_size.max(self.min_size);
        self
    }

    /// Sets the absolute deadline; an unsatisfied receive completes with
    /// [`Error::WouldBlock`] at that instant.
    ///
    /// [`Error::WouldBlock`]: crate::Error::WouldBlock
    pub fn set_deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// Associates a cancellation token.
    pub fn set_token(&mut self, token: CancelToken) -> &mut Self {
        self.token = Some(token);
        self
    }

    pub(crate) fn min_size(&self) -> usize {
        self.min_size
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn token(&self) -> Option<CancelToken> {
        self.token
    }
}

impl Default for ReceiveOptions {
    fn default() -> ReceiveOptions {
        ReceiveOptions {
            min_size: 1,
            max_size: usize::MAX,
            deadline: None,
            token: None,
        }
    }
}

/// Options qualifying an encryption upgrade.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOptions {
    role: Option<EncryptionRole>,
    deadline: Option<Instant>,
    token: Option<CancelToken>,
}

impl UpgradeOptions {
    /// Returns default upgrade options; the direction is inferred from
    /// the encryption object's role.
    pub fn new() -> UpgradeOptions {
        UpgradeOptions::default()
    }

    /// Makes the upgrade direction explicit.
    pub fn set_role(&mut self, role: EncryptionRole) -> &mut Self {
        self.role = Some(role);
        self
    }

    /// Sets the absolute deadline for handshake completion.
    pub fn set_deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// Associates a cancellation token.
    pub fn set_token(&mut self, token: CancelToken) -> &mut Self {
        self.token = Some(token);
        self
    }

    pub(crate) fn role(&self) -> Option<EncryptionRole> {
        self.role
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn token(&self) -> Option<CancelToken> {
        self.token
    }
}

/// The direction of a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDirection {
    /// Stop transmitting.
    Send,
    /// Stop receiving.
    Receive,
    /// Both directions.
    Both,
}

/// The urgency of a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// The send direction completes queued data first.
    Graceful,
    /// Queued data is discarded.
    Immediate,
}

/// The direction of a flow-control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlDirection {
    /// The write side.
    Send,
    /// The read side.
    Receive,
    /// Both sides.
    Both,
}

/// What applied a flow-control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlOrigin {
    /// The engine applied it, reacting to a queue watermark.
    Automatic,
    /// The user applied it.
    Manual,
}
