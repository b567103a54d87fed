use std::fmt;

use crate::error::Error;
use crate::Handle;

/// The kind of a readiness event announced by a demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorEventKind {
    /// The descriptor is readable, or the peer hung up.
    Readable,
    /// The descriptor is writable.
    Writable,
    /// A terminal error condition was probed on the descriptor.
    Error,
    /// The descriptor's notification queue has entries.
    Notifications,
}

/// A readiness event for one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorEvent {
    handle: Handle,
    kind: ReactorEventKind,
    error: Option<Error>,
}

impl ReactorEvent {
    /// Returns a new event of the given kind for the given descriptor.
    pub fn new(handle: Handle, kind: ReactorEventKind) -> ReactorEvent {
        ReactorEvent {
            handle,
            kind,
            error: None,
        }
    }

    /// Returns a new error event carrying the probed error.
    pub fn error(handle: Handle, error: Error) -> ReactorEvent {
        ReactorEvent {
            handle,
            kind: ReactorEventKind::Error,
            error: Some(error),
        }
    }

    /// Returns the descriptor this event is for.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Returns the kind of this event.
    pub fn kind(&self) -> ReactorEventKind {
        self.kind
    }

    /// Returns the error probed on the descriptor, for error events.
    pub fn last_error(&self) -> Option<Error> {
        self.error
    }

    /// Returns true if this is a readable event.
    pub fn is_readable(&self) -> bool {
        self.kind == ReactorEventKind::Readable
    }

    /// Returns true if this is a writable event.
    pub fn is_writable(&self) -> bool {
        self.kind == ReactorEventKind::Writable
    }

    /// Returns true if this is an error event.
    pub fn is_error(&self) -> bool {
        self.kind == ReactorEventKind::Error
    }
}

impl fmt::Display for ReactorEvent {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error {
            Some(error) => write!(fmt, "{:?} on {} ({})", self.kind, self.handle, error),
            None => write!(fmt, "{:?} on {}", self.kind, self.handle),
        }
    }
}

/// An out-of-band notification drained from a descriptor's error queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The kernel finished transmitting a range of zero-copy sends.
    ///
    /// `from` and `to` are the inclusive range of zero-copy identifiers
    /// acknowledged; `copied` is true if the kernel fell back to copying.
    ZeroCopy {
        /// First acknowledged zero-copy identifier.
        from: u32,
        /// Last acknowledged zero-copy identifier.
        to: u32,
        /// True if the kernel copied the data instead of mapping it.
        copied: bool,
    },
}

/// The ordered notifications drained from one descriptor in one probe.
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    handle: Handle,
    notifications: Vec<Notification>,
}

impl NotificationQueue {
    /// Returns an empty queue for the given descriptor.
    pub fn new(handle: Handle) -> NotificationQueue {
        NotificationQueue {
            handle,
            notifications: Vec::new(),
        }
    }

    /// Returns the descriptor the notifications were drained from.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Appends a notification.
    pub fn push(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Returns the drained notifications in order.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Returns true if no notifications were drained.
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}
