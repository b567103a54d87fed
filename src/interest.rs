use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// The set of readiness conditions a descriptor is monitored for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Want: u8 {
        /// The descriptor has data to read, or the peer hung up.
        const READABLE = 0b0001;
        /// The descriptor can accept data without blocking.
        const WRITABLE = 0b0010;
        /// An error condition is pending on the descriptor.
        const ERROR = 0b0100;
        /// The descriptor's notification queue has entries, e.g. zero-copy
        /// acknowledgements.
        const NOTIFICATIONS = 0b1000;
    }
}

/// Delivery semantics of a readiness condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    /// The condition is announced for as long as it holds.
    #[default]
    Level,
    /// The condition is announced once per edge, when it begins to hold.
    Edge,
}

/// The declared interest in events for one descriptor: which conditions to
/// monitor, plus the trigger and one-shot delivery modes.
///
/// `Interest` is an immutable value type: the `show_*` and `hide_*`
/// operations return a new value. Changing only the mode flags does not
/// count as a change in the readable/writable bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    want: Want,
    trigger: Trigger,
    one_shot: bool,
}

impl Interest {
    /// Returns an interest in nothing, with level-triggered, persistent
    /// delivery.
    pub fn none() -> Interest {
        Interest {
            want: Want::empty(),
            trigger: Trigger::Level,
            one_shot: false,
        }
    }

    /// Returns the readiness set.
    pub fn want(&self) -> Want {
        self.want
    }

    /// Returns the trigger mode.
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// Returns true if events are delivered at most once before the
    /// corresponding bit is disarmed.
    pub fn one_shot(&self) -> bool {
        self.one_shot
    }

    /// Returns true if readable events are wanted.
    pub fn want_readable(&self) -> bool {
        self.want.contains(Want::READABLE)
    }

    /// Returns true if writable events are wanted.
    pub fn want_writable(&self) -> bool {
        self.want.contains(Want::WRITABLE)
    }

    /// Returns true if error events are wanted.
    pub fn want_error(&self) -> bool {
        self.want.contains(Want::ERROR)
    }

    /// Returns true if notification events are wanted.
    pub fn want_notifications(&self) -> bool {
        self.want.contains(Want::NOTIFICATIONS)
    }

    /// Returns true if either readable or writable events are wanted.
    pub fn want_readable_or_writable(&self) -> bool {
        self.want.intersects(Want::READABLE | Want::WRITABLE)
    }

    /// Returns a copy of this interest with the given bits set.
    pub fn show(self, want: Want) -> Interest {
        Interest {
            want: self.want | want,
            ..self
        }
    }

    /// Returns a copy of this interest with the given bits cleared.
    pub fn hide(self, want: Want) -> Interest {
        Interest {
            want: self.want - want,
            ..self
        }
    }

    /// Returns a copy of this interest with readable events wanted.
    pub fn show_readable(self) -> Interest {
        self.show(Want::READABLE)
    }

    /// Returns a copy of this interest with writable events wanted.
    pub fn show_writable(self) -> Interest {
        self.show(Want::WRITABLE)
    }

    /// Returns a copy of this interest with error events wanted.
    pub fn show_error(self) -> Interest {
        self.show(Want::ERROR)
    }

    /// Returns a copy of this interest with notification events wanted.
    pub fn show_notifications(self) -> Interest {
        self.show(Want::NOTIFICATIONS)
    }

    /// Returns a copy of this interest with readable events no longer
    /// wanted.
    pub fn hide_readable(self) -> Interest {
        self.hide(Want::READABLE)
    }

    /// Returns a copy of this interest with writable events no longer
    /// wanted.
    pub fn hide_writable(self) -> Interest {
        self.hide(Want::WRITABLE)
    }

    /// Returns a copy of this interest with error events no longer wanted.
    pub fn hide_error(self) -> Interest {
        self.hide(Want::ERROR)
    }

    /// Returns a copy of this interest with notification events no longer
    /// wanted.
    pub fn hide_notifications(self) -> Interest {
        self.hide(Want::NOTIFICATIONS)
    }

    /// Returns a copy of this interest with the given trigger mode.
    pub fn with_trigger(self, trigger: Trigger) -> Interest {
        Interest { trigger, ..self }
    }

    /// Returns a copy of this interest with the given one-shot mode.
    pub fn with_one_shot(self, one_shot: bool) -> Interest {
        Interest { one_shot, ..self }
    }
}

impl Default for Interest {
    fn default() -> Interest {
        Interest::none()
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{:?} ({:?}{})",
            self.want,
            self.trigger,
            if self.one_shot { ", one-shot" } else { "" }
        )
    }
}

/// Overrides for the trigger and one-shot modes applied by a single
/// `show_*` call. Absent fields fall back to the registration defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOptions {
    trigger: Option<Trigger>,
    one_shot: Option<bool>,
}

impl EventOptions {
    /// Returns options that defer entirely to the registration defaults.
    pub fn new() -> EventOptions {
        EventOptions::default()
    }

    /// Requests the given trigger mode for this call.
    pub fn set_trigger(&mut self, trigger: Trigger) -> &mut EventOptions {
        self.trigger = Some(trigger);
        self
    }

    /// Requests the given one-shot mode for this call.
    pub fn set_one_shot(&mut self, one_shot: bool) -> &mut EventOptions {
        self.one_shot = Some(one_shot);
        self
    }

    /// Returns the requested trigger mode, if any.
    pub fn trigger(&self) -> Option<Trigger> {
        self.trigger
    }

    /// Returns the requested one-shot mode, if any.
    pub fn one_shot(&self) -> Option<bool> {
        self.one_shot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_and_hide_are_independent_per_bit() {
        let interest = Interest::none().show_readable().show_writable();
        assert!(interest.want_readable());
        assert!(interest.want_writable());
        assert!(interest.want_readable_or_writable());

        let interest = interest.hide_readable();
        assert!(!interest.want_readable());
        assert!(interest.want_writable());
    }

    #[test]
    fn mode_changes_do_not_touch_bits() {
        let interest = Interest::none().show_readable();
        let modal = interest.with_trigger(Trigger::Edge).with_one_shot(true);
        assert_eq!(interest.want(), modal.want());
        assert_eq!(modal.trigger(), Trigger::Edge);
        assert!(modal.one_shot());
    }

    #[test]
    fn setters_return_new_values() {
        let a = Interest::none();
        let b = a.show_error();
        assert!(!a.want_error());
        assert!(b.want_error());
    }
}
