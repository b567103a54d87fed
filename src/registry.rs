use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::trace;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::{NotificationQueue, ReactorEvent};
use crate::interest::{EventOptions, Interest, Trigger};
use crate::Handle;

/// Per-event callback installed in a registry entry.
pub type EventCallback = Arc<dyn Fn(&ReactorEvent) + Send + Sync>;

/// Notifications callback installed in a registry entry.
pub type NotificationsCallback = Arc<dyn Fn(&NotificationQueue) + Send + Sync>;

/// Callback announced exactly once when a descriptor has been safely
/// detached: the OS-level registration is gone and no announcement is in
/// flight.
pub type DetachCallback = Box<dyn FnOnce(Handle) + Send>;

/// A socket driven by a demultiplexer.
///
/// The demultiplexer holds entries that hold weak references to their
/// sockets, upgraded only for the duration of one announcement; sockets
/// hold strong references to their demultiplexer. The detach protocol is
/// the explicit cycle breaker.
pub trait ReactorSocket: Send + Sync {
    /// The descriptor being demultiplexed.
    fn handle(&self) -> Handle;

    /// The descriptor is readable, or the peer hung up.
    fn process_readable(&self, event: &ReactorEvent);

    /// The descriptor is writable.
    fn process_writable(&self, event: &ReactorEvent);

    /// A terminal error was probed on the descriptor.
    fn process_error(&self, event: &ReactorEvent);

    /// The descriptor's notification queue was drained.
    fn process_notifications(&self, queue: &NotificationQueue) {
        let _ = queue;
    }

    /// The demultiplexer is closing every managed socket.
    fn process_close_all(&self) {}
}

struct EntryState {
    interest: Interest,
    default_trigger: Trigger,
    default_one_shot: bool,
    socket: Option<Weak<dyn ReactorSocket>>,
    readable: Option<EventCallback>,
    writable: Option<EventCallback>,
    error: Option<EventCallback>,
    notifications: Option<NotificationsCallback>,
    detach: Option<DetachCallback>,
    detach_announced: bool,
}

/// The registry record for one descriptor: its current interest, the
/// owning socket or per-event callbacks, the processing counter, and the
/// detach-callback slot.
///
/// An entry exists in a catalog exactly while the descriptor is being
/// demultiplexed. While the processing counter is positive an
/// announcement is in flight and the entry must not be finally detached;
/// [`announce_detached`] therefore only succeeds once the counter has
/// returned to zero.
///
/// [`announce_detached`]: RegistryEntry::announce_detached
pub struct RegistryEntry {
    handle: Handle,
    state: Mutex<EntryState>,
    processing: AtomicUsize,
}

impl RegistryEntry {
    fn new(
        handle: Handle,
        socket: Option<Weak<dyn ReactorSocket>>,
        default_trigger: Trigger,
        default_one_shot: bool,
    ) -> RegistryEntry {
        RegistryEntry {
            handle,
            state: Mutex::new(EntryState {
                interest: Interest::none()
                    .with_trigger(default_trigger)
                    .with_one_shot(default_one_shot),
                default_trigger,
                default_one_shot,
                socket,
                readable: None,
                writable: None,
                error: None,
                notifications: None,
                detach: None,
                detach_announced: false,
            }),
            processing: AtomicUsize::new(0),
        }
    }

    /// Returns the descriptor this entry records.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Returns the entry's current interest.
    pub fn interest(&self) -> Interest {
        self.state.lock().interest
    }

    /// Returns true if the entry wants readable events.
    pub fn want_readable(&self) -> bool {
        self.state.lock().interest.want_readable()
    }

    /// Returns true if the entry wants writable events.
    pub fn want_writable(&self) -> bool {
        self.state.lock().interest.want_writable()
    }

    /// Returns true if events for this entry disarm themselves on fire.
    pub fn one_shot(&self) -> bool {
        self.state.lock().interest.one_shot()
    }

    fn apply_modes(state: &EntryState, options: &EventOptions) -> (Trigger, bool) {
        (
            options.trigger().unwrap_or(state.default_trigger),
            options.one_shot().unwrap_or(state.default_one_shot),
        )
    }

    /// Declares interest in readable events and returns the new interest.
    pub fn show_readable(&self, options: &EventOptions) -> Interest {
        let mut state = self.state.lock();
        let (trigger, one_shot) = Self::apply_modes(&state, options);
        state.interest = state
            .interest
            .show_readable()
            .with_trigger(trigger)
            .with_one_shot(one_shot);
        state.interest
    }

    /// Declares interest in writable events and returns the new interest.
    pub fn show_writable(&self, options: &EventOptions) -> Interest {
        let mut state = self.state.lock();
        let (trigger, one_shot) = Self::apply_modes(&state, options);
        state.interest = state
            .interest
            .show_writable()
            .with_trigger(trigger)
            .with_one_shot(one_shot);
        state.interest
    }

    /// Declares interest in error events and returns the new interest.
    pub fn show_error(&self, options: &EventOptions) -> Interest {
        let mut state = self.state.lock();
        let (trigger, one_shot) = Self::apply_modes(&state, options);
        state.interest = state
            .interest
            .show_error()
            .with_trigger(trigger)
            .with_one_shot(one_shot);
        state.interest
    }

    /// Declares interest in notification events and returns the new
    /// interest.
    pub fn show_notifications(&self) -> Interest {
        let mut state = self.state.lock();
        state.interest = state.interest.show_notifications();
        state.interest
    }

    /// Atomically installs a readable callback and declares readable
    /// interest.
    pub fn show_readable_callback(
        &self,
        options: &EventOptions,
        callback: EventCallback,
    ) -> Interest {
        let mut state = self.state.lock();
        let (trigger, one_shot) = Self::apply_modes(&state, options);
        state.readable = Some(callback);
        state.interest = state
            .interest
            .show_readable()
            .with_trigger(trigger)
            .with_one_shot(one_shot);
        state.interest
    }

    /// Atomically installs a writable callback and declares writable
    /// interest.
    pub fn show_writable_callback(
        &self,
        options: &EventOptions,
        callback: EventCallback,
    ) -> Interest {
        let mut state = self.state.lock();
        let (trigger, one_shot) = Self::apply_modes(&state, options);
        state.writable = Some(callback);
        state.interest = state
            .interest
            .show_writable()
            .with_trigger(trigger)
            .with_one_shot(one_shot);
        state.interest
    }

    /// Atomically installs an error callback and declares error interest.
    pub fn show_error_callback(&self, options: &EventOptions, callback: EventCallback) -> Interest {
        let mut state = self.state.lock();
        let (trigger, one_shot) = Self::apply_modes(&state, options);
        state.error = Some(callback);
        state.interest = state
            .interest
            .show_error()
            .with_trigger(trigger)
            .with_one_shot(one_shot);
        state.interest
    }

    /// Atomically installs a notifications callback and declares
    /// notification interest.
    pub fn show_notifications_callback(&self, callback: NotificationsCallback) -> Interest {
        let mut state = self.state.lock();
        state.notifications = Some(callback);
        state.interest = state.interest.show_notifications();
        state.interest
    }

    /// Withdraws interest in readable events.
    pub fn hide_readable(&self) -> Interest {
        let mut state = self.state.lock();
        state.interest = state.interest.hide_readable();
        state.interest
    }

    /// Withdraws interest in writable events.
    pub fn hide_writable(&self) -> Interest {
        let mut state = self.state.lock();
        state.interest = state.interest.hide_writable();
        state.interest
    }

    /// Withdraws interest in error events.
    pub fn hide_error(&self) -> Interest {
        let mut state = self.state.lock();
        state.interest = state.interest.hide_error();
        state.interest
    }

    /// Withdraws interest in notification events.
    pub fn hide_notifications(&self) -> Interest {
        let mut state = self.state.lock();
        state.interest = state.interest.hide_notifications();
        state.interest
    }

    /// Hides the given fired bits, for one-shot disarming.
    pub(crate) fn hide_fired(&self, readable: bool, writable: bool) -> Interest {
        let mut state = self.state.lock();
        if readable {
            state.interest = state.interest.hide_readable();
        }
        if writable {
            state.interest = state.interest.hide_writable();
        }
        state.interest
    }

    /// Returns true if an announcement for this entry is in flight.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire) > 0
    }

    pub(crate) fn mark_processing(&self) {
        self.processing.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases the processing claim taken by
    /// [`RegistryCatalog::lookup_and_mark_processing`]. Every successful
    /// lookup must be paired with exactly one call.
    pub fn decrement_process_counter(&self) {
        let previous = self.processing.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "processing counter underflow");
    }

    fn target(&self) -> Option<Arc<dyn ReactorSocket>> {
        let state = self.state.lock();
        state.socket.as_ref().and_then(Weak::upgrade)
    }

    /// Announces a readable event to the stored callback or owning
    /// socket. Returns true if a listener consumed it.
    ///
    /// May only be called between a successful
    /// [`RegistryCatalog::lookup_and_mark_processing`] and the matching
    /// [`decrement_process_counter`].
    ///
    /// [`decrement_process_counter`]: RegistryEntry::decrement_process_counter
    pub fn announce_readable(&self, event: &ReactorEvent) -> bool {
        let callback = self.state.lock().readable.clone();
        if let Some(callback) = callback {
            callback(event);
            return true;
        }
        if let Some(socket) = self.target() {
            socket.process_readable(event);
            return true;
        }
        false
    }

    /// Announces a writable event. See [`announce_readable`].
    ///
    /// [`announce_readable`]: RegistryEntry::announce_readable
    pub fn announce_writable(&self, event: &ReactorEvent) -> bool {
        let callback = self.state.lock().writable.clone();
        if let Some(callback) = callback {
            callback(event);
            return true;
        }
        if let Some(socket) = self.target() {
            socket.process_writable(event);
            return true;
        }
        false
    }

    /// Announces an error event. See [`announce_readable`].
    ///
    /// [`announce_readable`]: RegistryEntry::announce_readable
    pub fn announce_error(&self, event: &ReactorEvent) -> bool {
        let callback = self.state.lock().error.clone();
        if let Some(callback) = callback {
            callback(event);
            return true;
        }
        if let Some(socket) = self.target() {
            socket.process_error(event);
            return true;
        }
        false
    }

    /// Announces drained notifications. See [`announce_readable`].
    ///
    /// [`announce_readable`]: RegistryEntry::announce_readable
    pub fn announce_notifications(&self, queue: &NotificationQueue) -> bool {
        let callback = self.state.lock().notifications.clone();
        if let Some(callback) = callback {
            callback(queue);
            return true;
        }
        if let Some(socket) = self.target() {
            socket.process_notifications(queue);
            return true;
        }
        false
    }

    /// Invokes the detach callback exactly once. Returns true on the
    /// first call with an occupied detach slot, false thereafter.
    ///
    /// The caller must have observed the processing counter at zero.
    pub fn announce_detached(&self) -> bool {
        let callback = {
            let mut state = self.state.lock();
            if state.detach_announced {
                return false;
            }
            match state.detach.take() {
                Some(callback) => {
                    state.detach_announced = true;
                    callback
                }
                None => return false,
            }
        };
        trace!("announcing detach; fd={}", self.handle);
        callback(self.handle);
        true
    }

    /// Releases callbacks and the socket reference. Idempotent; called
    /// after [`announce_detached`] returns true and the processing
    /// counter is zero.
    ///
    /// [`announce_detached`]: RegistryEntry::announce_detached
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.socket = None;
        state.readable = None;
        state.writable = None;
        state.error = None;
        state.notifications = None;
        state.detach = None;
    }

    fn install_detach(&self, callback: DetachCallback) -> Result<()> {
        let mut state = self.state.lock();
        if state.detach.is_some() || state.detach_announced {
            return Err(Error::Invalid);
        }
        state.detach = Some(callback);
        Ok(())
    }

    fn close_all_target(&self) -> Option<Arc<dyn ReactorSocket>> {
        self.target()
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("RegistryEntry")
            .field("handle", &self.handle)
            .field("interest", &self.interest())
            .field("processing", &self.processing.load(Ordering::Relaxed))
            .finish()
    }
}

struct CatalogState {
    entries: HashMap<Handle, Arc<RegistryEntry>>,
    default_trigger: Trigger,
    default_one_shot: bool,
}

/// The thread-safe mapping from descriptor handle to registry entry.
///
/// All mutation is guarded by an internal lock; callbacks are never
/// invoked while holding it.
pub struct RegistryCatalog {
    state: Mutex<CatalogState>,
}

impl RegistryCatalog {
    /// Returns an empty catalog with the given entry defaults.
    pub fn new(default_trigger: Trigger, default_one_shot: bool) -> RegistryCatalog {
        RegistryCatalog {
            state: Mutex::new(CatalogState {
                entries: HashMap::new(),
                default_trigger,
                default_one_shot,
            }),
        }
    }

    /// Sets the trigger mode applied to entries created without an
    /// explicit override.
    pub fn set_default_trigger(&self, trigger: Trigger) {
        self.state.lock().default_trigger = trigger;
    }

    /// Sets the one-shot mode applied to entries created without an
    /// explicit override.
    pub fn set_default_one_shot(&self, one_shot: bool) {
        self.state.lock().default_one_shot = one_shot;
    }

    /// Returns the number of registered descriptors.
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Allocates (or refreshes) the entry owned by the given socket.
    pub fn add_socket(&self, socket: &Arc<dyn ReactorSocket>) -> Result<Arc<RegistryEntry>> {
        let handle = socket.handle();
        if handle < 0 {
            return Err(Error::Invalid);
        }
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(&handle) {
            entry.state.lock().socket = Some(Arc::downgrade(socket));
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(RegistryEntry::new(
            handle,
            Some(Arc::downgrade(socket)),
            state.default_trigger,
            state.default_one_shot,
        ));
        state.entries.insert(handle, Arc::clone(&entry));
        trace!("registered socket; fd={}", handle);
        Ok(entry)
    }

    /// Allocates an entry for a bare descriptor. Fails if the handle is
    /// invalid or already present.
    pub fn add_handle(&self, handle: Handle) -> Result<Arc<RegistryEntry>> {
        if handle < 0 {
            return Err(Error::Invalid);
        }
        let mut state = self.state.lock();
        if state.entries.contains_key(&handle) {
            return Err(Error::Invalid);
        }
        let entry = Arc::new(RegistryEntry::new(
            handle,
            None,
            state.default_trigger,
            state.default_one_shot,
        ));
        state.entries.insert(handle, Arc::clone(&entry));
        trace!("registered descriptor; fd={}", handle);
        Ok(entry)
    }

    /// Returns the entry for a descriptor, if present.
    pub fn lookup(&self, handle: Handle) -> Option<Arc<RegistryEntry>> {
        self.state.lock().entries.get(&handle).cloned()
    }

    /// Returns the entry for a descriptor and atomically increments its
    /// processing counter, or `None` if the descriptor is absent or
    /// already detached.
    pub fn lookup_and_mark_processing(&self, handle: Handle) -> Option<Arc<RegistryEntry>> {
        let state = self.state.lock();
        let entry = state.entries.get(&handle)?;
        entry.mark_processing();
        Some(Arc::clone(entry))
    }

    /// Extracts the entry without announcing detachment; used by
    /// synchronous hide-last-interest paths.
    pub fn remove(&self, handle: Handle) -> Option<Arc<RegistryEntry>> {
        let removed = self.state.lock().entries.remove(&handle);
        if removed.is_some() {
            trace!("deregistered descriptor; fd={}", handle);
        }
        removed
    }

    /// Installs `detach_callback` in the entry's detach slot, extracts
    /// the entry from the catalog, and hands it to `detach_functor`,
    /// which must schedule the OS-level unregistration and the deferred
    /// detach announcement.
    ///
    /// Fails with [`Error::Invalid`] if the descriptor is unknown or a
    /// detach is already pending.
    pub fn remove_and_get_ready_to_detach(
        &self,
        handle: Handle,
        detach_callback: DetachCallback,
        detach_functor: impl FnOnce(&Arc<RegistryEntry>) -> Result<()>,
    ) -> Result<()> {
        let entry = {
            let mut state = self.state.lock();
            let entry = state.entries.get(&handle).ok_or(Error::Invalid)?;
            entry.install_detach(detach_callback)?;
            state.entries.remove(&handle).expect("entry present")
        };
        detach_functor(&entry)
    }

    /// Closes every managed socket except the designated descriptor.
    pub fn close_all(&self, except: Handle) {
        let targets: Vec<Arc<dyn ReactorSocket>> = {
            let state = self.state.lock();
            state
                .entries
                .values()
                .filter(|entry| entry.handle() != except)
                .filter_map(|entry| entry.close_all_target())
                .collect()
        };
        for socket in targets {
            socket.process_close_all();
        }
    }

    /// Visits every entry in unspecified order.
    pub fn for_each(&self, mut visitor: impl FnMut(&Arc<RegistryEntry>)) {
        let entries: Vec<Arc<RegistryEntry>> = {
            let state = self.state.lock();
            state.entries.values().cloned().collect()
        };
        for entry in &entries {
            visitor(entry);
        }
    }
}

impl std::fmt::Debug for RegistryCatalog {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("RegistryCatalog")
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[test]
    fn add_handle_rejects_duplicates_and_invalid() {
        let catalog = RegistryCatalog::new(Trigger::Level, false);
        assert!(catalog.add_handle(-1).is_err());
        catalog.add_handle(7).unwrap();
        assert!(catalog.add_handle(7).is_err());
        assert_eq!(catalog.size(), 1);
    }

    #[test]
    fn show_applies_registration_defaults() {
        let catalog = RegistryCatalog::new(Trigger::Level, true);
        let entry = catalog.add_handle(3).unwrap();

        let interest = entry.show_readable(&EventOptions::new());
        assert!(interest.want_readable());
        assert!(interest.one_shot());

        let mut options = EventOptions::new();
        options.set_one_shot(false);
        let interest = entry.show_writable(&options);
        assert!(!interest.one_shot());
    }

    #[test]
    fn announce_prefers_installed_callback() {
        let catalog = RegistryCatalog::new(Trigger::Level, false);
        let entry = catalog.add_handle(3).unwrap();

        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);
        entry.show_readable_callback(
            &EventOptions::new(),
            Arc::new(move |_event| {
                seen.store(true, Ordering::SeqCst);
            }),
        );

        let event = ReactorEvent::new(3, crate::event::ReactorEventKind::Readable);
        assert!(entry.announce_readable(&event));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn announce_without_listener_is_not_consumed() {
        let catalog = RegistryCatalog::new(Trigger::Level, false);
        let entry = catalog.add_handle(3).unwrap();
        let event = ReactorEvent::new(3, crate::event::ReactorEventKind::Readable);
        assert!(!entry.announce_readable(&event));
    }

    #[test]
    fn detach_announces_exactly_once() {
        let catalog = RegistryCatalog::new(Trigger::Level, false);
        catalog.add_handle(3).unwrap();

        let announced = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&announced);

        let mut staged = None;
        catalog
            .remove_and_get_ready_to_detach(
                3,
                Box::new(move |_handle| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
                |entry| {
                    staged = Some(Arc::clone(entry));
                    Ok(())
                },
            )
            .unwrap();

        // The entry has left the catalog; events can no longer reach it.
        assert!(catalog.lookup_and_mark_processing(3).is_none());

        let entry = staged.unwrap();
        assert!(entry.announce_detached());
        assert!(!entry.announce_detached());
        assert_eq!(announced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_detach_of_same_handle_fails() {
        let catalog = RegistryCatalog::new(Trigger::Level, false);
        catalog.add_handle(3).unwrap();

        catalog
            .remove_and_get_ready_to_detach(3, Box::new(|_| {}), |_| Ok(()))
            .unwrap();
        let result = catalog.remove_and_get_ready_to_detach(3, Box::new(|_| {}), |_| Ok(()));
        assert_eq!(result.unwrap_err(), Error::Invalid);
    }

    #[test]
    fn processing_counter_pairs() {
        let catalog = RegistryCatalog::new(Trigger::Level, false);
        catalog.add_handle(3).unwrap();

        let entry = catalog.lookup_and_mark_processing(3).unwrap();
        assert!(entry.is_processing());
        entry.decrement_process_counter();
        assert!(!entry.is_processing());
    }
}
