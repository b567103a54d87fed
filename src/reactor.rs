use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::Mutex;

use crate::chronology::{Chronology, Timer, TimerCallback, TimerOptions, TimerSession};
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::event::{ReactorEvent, ReactorEventKind};
use crate::interest::{EventOptions, Trigger};
use crate::registry::{
    DetachCallback, EventCallback, NotificationsCallback, ReactorSocket, RegistryCatalog,
    RegistryEntry,
};
use crate::strand::Task;
use crate::sync::Semaphore;
use crate::sys::{self, Backend, Driver, InterestSnapshot, SnapshotEntry, WaitSet};
use crate::Handle;

/// Configuration of a demultiplexer.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    backend: Option<Backend>,
    max_threads: usize,
    trigger: Option<Trigger>,
    one_shot: Option<bool>,
    auto_attach: bool,
    auto_detach: bool,
    max_cycles_per_wait: usize,
    event_capacity: usize,
}

impl ReactorConfig {
    /// Returns the default configuration: the platform backend, one
    /// waiter, level-triggered persistent interest, no automatic attach
    /// or detach, one chronology cycle per wait.
    pub fn new() -> ReactorConfig {
        ReactorConfig::default()
    }

    /// Selects the readiness backend.
    pub fn set_backend(&mut self, backend: Backend) -> &mut ReactorConfig {
        self.backend = Some(backend);
        self
    }

    /// Sets the number of threads that may wait concurrently.
    pub fn set_max_threads(&mut self, max_threads: usize) -> &mut ReactorConfig {
        self.max_threads = max_threads.max(1);
        self
    }

    /// Sets the default trigger mode for new registrations.
    pub fn set_trigger(&mut self, trigger: Trigger) -> &mut ReactorConfig {
        self.trigger = Some(trigger);
        self
    }

    /// Sets the default one-shot mode for new registrations.
    pub fn set_one_shot(&mut self, one_shot: bool) -> &mut ReactorConfig {
        self.one_shot = Some(one_shot);
        self
    }

    /// When set, a `show_*` call for an unknown descriptor transparently
    /// registers it; when unset, such calls fail with
    /// [`Error::Invalid`].
    pub fn set_auto_attach(&mut self, auto_attach: bool) -> &mut ReactorConfig {
        self.auto_attach = auto_attach;
        self
    }

    /// When set, a `hide_*` call that clears the last interest bit
    /// removes the registration; when unset, the registration is kept
    /// until an explicit detach.
    pub fn set_auto_detach(&mut self, auto_detach: bool) -> &mut ReactorConfig {
        self.auto_detach = auto_detach;
        self
    }

    /// Bounds the chronology announcement cycles run after each wait.
    pub fn set_max_cycles_per_wait(&mut self, cycles: usize) -> &mut ReactorConfig {
        self.max_cycles_per_wait = cycles.max(1);
        self
    }

    /// Sets the capacity of the per-waiter event buffer.
    pub fn set_event_capacity(&mut self, capacity: usize) -> &mut ReactorConfig {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for ReactorConfig {
    fn default() -> ReactorConfig {
        ReactorConfig {
            backend: None,
            max_threads: 1,
            trigger: None,
            one_shot: None,
            auto_attach: false,
            auto_detach: false,
            max_cycles_per_wait: 1,
            event_capacity: 1024,
        }
    }
}

/// Options applied when registering a waiter thread.
#[derive(Debug, Clone, Default)]
pub struct WaiterOptions {
    name: Option<String>,
}

impl WaiterOptions {
    /// Returns default waiter options.
    pub fn new() -> WaiterOptions {
        WaiterOptions::default()
    }

    /// Names the waiter for logging.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut WaiterOptions {
        self.name = Some(name.into());
        self
    }
}

/// A registered waiter thread's private wait buffers.
pub struct Waiter {
    id: u64,
    name: Option<String>,
    snapshot: InterestSnapshot,
    wait_set: WaitSet,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Waiter")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// An event demultiplexer over a readiness backend.
///
/// A reactor owns the descriptor [registry], the [chronology] of timers
/// and deferred functors, and a [controller] used to unblock waiters from
/// other threads. One or more registered [`Waiter`]s drive it with
/// [`run`] or [`poll`]; under a multi-threaded configuration a generation
/// semaphore admits one waiter at a time into the backend wait while the
/// others demultiplex results or block.
///
/// [registry]: crate::registry::RegistryCatalog
/// [chronology]: crate::chronology::Chronology
/// [controller]: crate::controller::Controller
/// [`run`]: Reactor::run
/// [`poll`]: Reactor::poll
pub struct Reactor {
    config: ReactorConfig,
    driver: Box<dyn Driver>,
    registry: RegistryCatalog,
    chronology: Chronology,
    controller: Arc<Controller>,
    controller_handle: AtomicI32,
    running: AtomicBool,
    generation: AtomicU64,
    generation_mutex: Mutex<()>,
    generation_semaphore: Semaphore,
    detach_list: Mutex<Vec<Arc<RegistryEntry>>>,
    waiters: Mutex<Vec<u64>>,
    waiter_sequence: AtomicU64,
    spurious_wakeups: AtomicU64,
}

impl Reactor {
    /// Returns a new reactor driven by the configured backend.
    pub fn new(config: ReactorConfig) -> Result<Reactor> {
        let backend = config.backend.unwrap_or_else(Backend::default_for_platform);
        let driver = sys::new_driver(backend)?;

        let default_trigger = config.trigger.unwrap_or_default();
        if !driver.supports_trigger(default_trigger) {
            return Err(Error::NotImplemented);
        }
        let default_one_shot = config.one_shot.unwrap_or(false);

        let registry = RegistryCatalog::new(default_trigger, default_one_shot);
        let controller = Arc::new(Controller::new()?);
        let controller_handle = controller.handle();

        let entry = registry.add_handle(controller_handle)?;
        entry.show_readable(&EventOptions::new());
        driver.add(controller_handle, entry.interest())?;

        let chronology = Chronology::new();
        let waker = Arc::clone(&controller);
        chronology.set_waker(Box::new(move || {
            let _ = waker.interrupt(1);
        }));

        trace!("reactor open; backend={}", driver.name());

        Ok(Reactor {
            config,
            driver,
            registry,
            chronology,
            controller,
            controller_handle: AtomicI32::new(controller_handle),
            running: AtomicBool::new(true),
            generation: AtomicU64::new(1),
            generation_mutex: Mutex::new(()),
            generation_semaphore: Semaphore::new(1),
            detach_list: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
            waiter_sequence: AtomicU64::new(0),
            spurious_wakeups: AtomicU64::new(0),
        })
    }

    /// Returns the name of the readiness backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Returns the descriptor registry.
    pub fn registry(&self) -> &RegistryCatalog {
        &self.registry
    }

    /// Returns the integrated timer and deferred-work scheduler.
    pub fn chronology(&self) -> &Chronology {
        &self.chronology
    }

    /// Returns the number of waits that fired without producing any
    /// announcement or detachment.
    pub fn spurious_wakeups(&self) -> u64 {
        self.spurious_wakeups.load(Ordering::Relaxed)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_interest_changed(&self) {
        self.bump_generation();
        // A blocked waiter holds a stale snapshot; unblock one so the
        // change takes effect without waiting for the next natural event.
        let _ = self.controller.interrupt(1);
    }

    fn resolve_entry(&self, handle: Handle) -> Result<Arc<RegistryEntry>> {
        if let Some(entry) = self.registry.lookup(handle) {
            return Ok(entry);
        }
        if !self.config.auto_attach {
            return Err(Error::Invalid);
        }
        let entry = self.registry.add_handle(handle)?;
        self.driver.add(handle, entry.interest())?;
        Ok(entry)
    }

    fn validate_trigger(&self, options: &EventOptions) -> Result<()> {
        let trigger = options
            .trigger()
            .or(self.config.trigger)
            .unwrap_or_default();
        if !self.driver.supports_trigger(trigger) {
            return Err(Error::NotImplemented);
        }
        Ok(())
    }

    /// Registers a socket for demultiplexing with no initial interest.
    pub fn attach_socket(&self, socket: &Arc<dyn ReactorSocket>) -> Result<()> {
        let handle = socket.handle();
        if handle < 0 {
            return Err(Error::Invalid);
        }
        let known = self.registry.lookup(handle).is_some();
        let entry = self.registry.add_socket(socket)?;
        if !known {
            self.driver.add(handle, entry.interest())?;
        }
        self.notify_interest_changed();
        Ok(())
    }

    /// Schedules a descriptor's safe removal from demultiplexing.
    ///
    /// The OS-level registration is revoked immediately; `callback` is
    /// announced exactly once, after every in-flight announcement for the
    /// descriptor has drained. After the callback fires, no further event
    /// callback for the descriptor is ever invoked.
    pub fn detach_socket(&self, handle: Handle, callback: Option<DetachCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| Box::new(|_| {}));
        self.registry
            .remove_and_get_ready_to_detach(handle, callback, |entry| {
                if let Err(error) = self.driver.remove(handle) {
                    trace!("detach could not unregister fd={}: {}", handle, error);
                }
                self.detach_list.lock().push(Arc::clone(entry));
                self.bump_generation();
                self.controller.interrupt(1)
            })
    }

    /// Declares interest in readable events for a descriptor.
    pub fn show_readable(&self, handle: Handle, options: &EventOptions) -> Result<()> {
        self.validate_trigger(options)?;
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_readable(options);
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    /// Declares interest in readable events, announced to `callback`.
    pub fn show_readable_callback(
        &self,
        handle: Handle,
        options: &EventOptions,
        callback: EventCallback,
    ) -> Result<()> {
        self.validate_trigger(options)?;
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_readable_callback(options, callback);
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    /// Declares interest in writable events for a descriptor.
    pub fn show_writable(&self, handle: Handle, options: &EventOptions) -> Result<()> {
        self.validate_trigger(options)?;
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_writable(options);
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    /// Declares interest in writable events, announced to `callback`.
    pub fn show_writable_callback(
        &self,
        handle: Handle,
        options: &EventOptions,
        callback: EventCallback,
    ) -> Result<()> {
        self.validate_trigger(options)?;
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_writable_callback(options, callback);
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    /// Declares interest in error events for a descriptor.
    pub fn show_error(&self, handle: Handle, options: &EventOptions) -> Result<()> {
        self.validate_trigger(options)?;
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_error(options);
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    /// Declares interest in error events, announced to `callback`.
    pub fn show_error_callback(
        &self,
        handle: Handle,
        options: &EventOptions,
        callback: EventCallback,
    ) -> Result<()> {
        self.validate_trigger(options)?;
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_error_callback(options, callback);
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    /// Declares interest in notification events for a descriptor.
    pub fn show_notifications(&self, handle: Handle) -> Result<()> {
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_notifications();
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    /// Declares interest in notification events, announced to `callback`.
    pub fn show_notifications_callback(
        &self,
        handle: Handle,
        callback: NotificationsCallback,
    ) -> Result<()> {
        let entry = self.resolve_entry(handle)?;
        let interest = entry.show_notifications_callback(callback);
        self.driver.update(handle, interest)?;
        self.notify_interest_changed();
        Ok(())
    }

    fn after_hide(&self, handle: Handle, entry: &Arc<RegistryEntry>) -> Result<()> {
        let interest = entry.interest();
        if self.config.auto_detach && interest.want().is_empty() {
            self.registry.remove(handle);
            self.driver.remove(handle)?;
        } else {
            self.driver.update(handle, interest)?;
        }
        self.notify_interest_changed();
        Ok(())
    }

    /// Withdraws interest in readable events for a descriptor.
    pub fn hide_readable(&self, handle: Handle) -> Result<()> {
        let entry = self.registry.lookup(handle).ok_or(Error::Invalid)?;
        entry.hide_readable();
        self.after_hide(handle, &entry)
    }

    /// Withdraws interest in writable events for a descriptor.
    pub fn hide_writable(&self, handle: Handle) -> Result<()> {
        let entry = self.registry.lookup(handle).ok_or(Error::Invalid)?;
        entry.hide_writable();
        self.after_hide(handle, &entry)
    }

    /// Withdraws interest in error events for a descriptor.
    pub fn hide_error(&self, handle: Handle) -> Result<()> {
        let entry = self.registry.lookup(handle).ok_or(Error::Invalid)?;
        entry.hide_error();
        self.after_hide(handle, &entry)
    }

    /// Withdraws interest in notification events for a descriptor.
    pub fn hide_notifications(&self, handle: Handle) -> Result<()> {
        let entry = self.registry.lookup(handle).ok_or(Error::Invalid)?;
        entry.hide_notifications();
        self.after_hide(handle, &entry)
    }

    /// Appends a functor to the deferred FIFO, to run on a demultiplexer
    /// thread.
    pub fn execute(&self, functor: Task) {
        self.chronology.execute(functor);
    }

    /// Returns a timer integrated with this demultiplexer's wait loop,
    /// announcing to `callback`.
    pub fn create_timer(&self, options: TimerOptions, callback: TimerCallback) -> Arc<Timer> {
        self.chronology.create_timer(options, callback)
    }

    /// Returns a timer integrated with this demultiplexer's wait loop,
    /// announcing to `session`.
    pub fn create_timer_session(
        &self,
        options: TimerOptions,
        session: Arc<dyn TimerSession>,
    ) -> Arc<Timer> {
        self.chronology.create_timer_session(options, session)
    }

    /// Registers the calling thread as a waiter.
    pub fn register_waiter(&self, options: WaiterOptions) -> Waiter {
        let id = self.waiter_sequence.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().push(id);
        Waiter {
            id,
            name: options.name,
            snapshot: InterestSnapshot::default(),
            wait_set: WaitSet::with_capacity(self.config.event_capacity),
        }
    }

    /// Deregisters a waiter.
    pub fn deregister_waiter(&self, waiter: Waiter) {
        self.waiters.lock().retain(|id| *id != waiter.id);
    }

    /// Unblocks one waiter.
    pub fn interrupt_one(&self) -> Result<()> {
        self.controller.interrupt(1)
    }

    /// Unblocks every registered waiter.
    pub fn interrupt_all(&self) -> Result<()> {
        let waiters = self.waiters.lock().len().max(1);
        self.controller.interrupt(waiters)
    }

    /// Asks every waiter inside [`run`] to return.
    ///
    /// [`run`]: Reactor::run
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.interrupt_all();
    }

    /// Permits [`run`] again after a [`stop`].
    ///
    /// [`run`]: Reactor::run
    /// [`stop`]: Reactor::stop
    pub fn restart(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Closes every managed socket except the internal controller.
    pub fn close_all(&self) {
        self.registry
            .close_all(self.controller_handle.load(Ordering::SeqCst));
    }

    /// Blocks the calling waiter in the demultiplexing loop until
    /// [`stop`] is called.
    ///
    /// [`stop`]: Reactor::stop
    pub fn run(&self, waiter: &mut Waiter) {
        if let Some(name) = &waiter.name {
            trace!("waiter running; name={}", name);
        }
        while self.running.load(Ordering::SeqCst) {
            if let Err(error) = self.poll_once(waiter) {
                warn!("demultiplexer wait failed: {}", error);
                std::thread::yield_now();
            }
        }
    }

    /// Runs a single demultiplexing iteration.
    pub fn poll(&self, waiter: &mut Waiter) -> Result<()> {
        self.poll_once(waiter)
    }

    fn poll_once(&self, waiter: &mut Waiter) -> Result<()> {
        let multi = self.config.max_threads > 1;
        if multi {
            self.generation_semaphore.acquire();
        }
        let result = self.poll_guarded(waiter, multi);
        // The semaphore is released inside poll_guarded after the wait
        // results have been demultiplexed; on error it is released here.
        if result.is_err() && multi {
            self.generation_semaphore.release();
        }
        result
    }

    fn poll_guarded(&self, waiter: &mut Waiter, multi: bool) -> Result<()> {
        let mut timeout = self.chronology.timeout_in_milliseconds();

        // Refresh the interest snapshot under the generation lock.
        {
            let _guard = self.generation_mutex.lock();
            let generation = self.generation.load(Ordering::SeqCst);
            if waiter.snapshot.generation != generation {
                waiter.snapshot.generation = generation;
                waiter.snapshot.entries.clear();
                self.registry.for_each(|entry| {
                    waiter.snapshot.entries.push(SnapshotEntry {
                        handle: entry.handle(),
                        want: entry.interest().want(),
                    });
                });
            }
        }

        // Drain the detach list once; announce after dropping the lock so
        // detach callbacks may re-enter the reactor.
        let detachments = {
            let mut ready = Vec::new();
            {
                let mut list = self.detach_list.lock();
                list.retain(|entry| {
                    if entry.is_processing() {
                        true
                    } else {
                        ready.push(Arc::clone(entry));
                        false
                    }
                });
            }
            let mut announced = 0;
            for entry in ready {
                if entry.announce_detached() {
                    entry.clear();
                    announced += 1;
                }
            }
            announced
        };
        if detachments > 0 {
            timeout = Some(0);
        }

        let fired_count = self.driver.wait(&mut waiter.wait_set, &waiter.snapshot, timeout)?;

        let controller_handle = self.controller_handle.load(Ordering::SeqCst);

        // One-shot: atomically hide the fired bits before announcing, so
        // re-arming from inside a callback is race-free.
        for index in 0..waiter.wait_set.fired.len() {
            let fired = waiter.wait_set.fired[index];
            if !fired.any() || fired.handle == controller_handle || fired.invalid {
                continue;
            }
            if let Some(entry) = self.registry.lookup(fired.handle) {
                if entry.one_shot() {
                    let hide_readable = fired.readable || fired.hangup;
                    let hide_writable = fired.writable;
                    if hide_readable || hide_writable {
                        let interest = entry.hide_fired(hide_readable, hide_writable);
                        let _ = self.driver.update(fired.handle, interest);
                        self.bump_generation();
                    }
                }
            }
        }

        // Handle the controller event first.
        let mut controller_fired = false;
        for index in 0..waiter.wait_set.fired.len() {
            let fired = waiter.wait_set.fired[index];
            if fired.handle != controller_handle {
                continue;
            }
            if fired.error || fired.invalid {
                self.reinitialize_control();
            } else if fired.readable || fired.hangup {
                controller_fired = true;
                if self.controller.acknowledge().is_err() {
                    self.reinitialize_control();
                } else if let Some(entry) = self.registry.lookup(controller_handle) {
                    if entry.one_shot() {
                        let interest = entry.show_readable(&EventOptions::new());
                        let _ = self.driver.update(controller_handle, interest);
                        self.bump_generation();
                    }
                }
            }
        }

        if multi {
            self.generation_semaphore.release();
        }

        let mut announcements = 0;
        for index in 0..waiter.wait_set.fired.len() {
            let fired = waiter.wait_set.fired[index];
            if fired.handle == controller_handle {
                continue;
            }
            if fired.invalid {
                continue;
            }
            let entry = match self.registry.lookup_and_mark_processing(fired.handle) {
                Some(entry) => entry,
                None => continue,
            };

            let mut fatal = false;
            if fired.error {
                let last_error = match sys::socket::socket_error(fired.handle) {
                    Ok(last_error) => last_error,
                    Err(_) => Some(Error::ConnectionDead),
                };
                match last_error {
                    None => match sys::socket::receive_notifications(fired.handle) {
                        Ok(queue) => {
                            if entry.announce_notifications(&queue) {
                                announcements += 1;
                            }
                        }
                        Err(error) => {
                            fatal = true;
                            let event = ReactorEvent::error(fired.handle, error);
                            if entry.announce_error(&event) {
                                announcements += 1;
                            }
                        }
                    },
                    Some(error) => {
                        fatal = true;
                        let event = ReactorEvent::error(fired.handle, error);
                        if entry.announce_error(&event) {
                            announcements += 1;
                        }
                    }
                }
            }

            if !fatal && (fired.writable || fired.hangup) && entry.want_writable() {
                let event = ReactorEvent::new(fired.handle, ReactorEventKind::Writable);
                if entry.announce_writable(&event) {
                    announcements += 1;
                }
            }

            if !fatal && (fired.readable || fired.hangup) && entry.want_readable() {
                let event = ReactorEvent::new(fired.handle, ReactorEventKind::Readable);
                if entry.announce_readable(&event) {
                    announcements += 1;
                }
            }

            entry.decrement_process_counter();
        }

        // A detachment may have become announceable while we were busy;
        // wake ourselves or a sibling to drain it promptly.
        if !self.detach_list.lock().is_empty() {
            let _ = self.controller.interrupt(1);
        }

        if fired_count > 0 && announcements == 0 && !controller_fired && detachments == 0 {
            self.spurious_wakeups.fetch_add(1, Ordering::Relaxed);
            std::thread::yield_now();
        }

        for _ in 0..self.config.max_cycles_per_wait {
            if self.chronology.announce(multi) == 0 {
                break;
            }
        }

        Ok(())
    }

    fn reinitialize_control(&self) {
        let stale = self.controller_handle.load(Ordering::SeqCst);
        self.registry.remove(stale);
        let _ = self.driver.remove(stale);
        match self.controller.reinitialize() {
            Ok(fresh) => {
                self.controller_handle.store(fresh, Ordering::SeqCst);
                match self.registry.add_handle(fresh) {
                    Ok(entry) => {
                        entry.show_readable(&EventOptions::new());
                        if let Err(error) = self.driver.add(fresh, entry.interest()) {
                            warn!("could not re-register controller: {}", error);
                        }
                    }
                    Err(error) => warn!("could not re-register controller: {}", error),
                }
                self.bump_generation();
            }
            Err(error) => warn!("could not reinitialize controller: {}", error),
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Reactor")
            .field("backend", &self.driver.name())
            .field("descriptors", &self.registry.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;

    fn pipe() -> (Handle, Handle) {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn write_byte(fd: Handle) {
        let byte = b'x';
        let n = unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
        assert_eq!(n, 1);
    }

    fn close(fd: Handle) {
        unsafe {
            libc::close(fd);
        }
    }

    fn reactor_with(config: &mut ReactorConfig) -> Reactor {
        Reactor::new(config.clone()).expect("unable to create reactor")
    }

    #[test]
    fn announces_readable_callback() {
        let mut config = ReactorConfig::new();
        config.set_auto_attach(true);
        let reactor = reactor_with(&mut config);
        let mut waiter = reactor.register_waiter(WaiterOptions::new());

        let (reader, writer) = pipe();
        let observed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&observed);
        reactor
            .show_readable_callback(
                reader,
                &EventOptions::new(),
                Arc::new(move |event| {
                    assert!(event.is_readable());
                    count.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        write_byte(writer);

        let deadline = Instant::now() + Duration::from_secs(5);
        while observed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            reactor.poll(&mut waiter).unwrap();
        }
        assert!(observed.load(Ordering::SeqCst) >= 1);

        close(reader);
        close(writer);
    }

    #[test]
    fn unknown_descriptor_is_invalid_without_auto_attach() {
        let reactor = reactor_with(&mut ReactorConfig::new());
        let (reader, writer) = pipe();
        let result = reactor.show_readable(reader, &EventOptions::new());
        assert_eq!(result, Err(Error::Invalid));
        close(reader);
        close(writer);
    }

    #[test]
    fn hide_with_auto_detach_removes_registration() {
        let mut config = ReactorConfig::new();
        config.set_auto_attach(true).set_auto_detach(true);
        let reactor = reactor_with(&mut config);

        let (reader, writer) = pipe();
        reactor
            .show_readable_callback(reader, &EventOptions::new(), Arc::new(|_| {}))
            .unwrap();
        assert!(reactor.registry().lookup(reader).is_some());

        reactor.hide_readable(reader).unwrap();
        assert!(reactor.registry().lookup(reader).is_none());

        close(reader);
        close(writer);
    }

    #[test]
    fn deferred_functors_run_on_the_waiter() {
        let reactor = reactor_with(&mut ReactorConfig::new());
        let mut waiter = reactor.register_waiter(WaiterOptions::new());

        let observed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&observed);
        reactor.execute(Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        }));

        reactor.poll(&mut waiter).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timer_fires_through_poll() {
        let reactor = reactor_with(&mut ReactorConfig::new());
        let mut waiter = reactor.register_waiter(WaiterOptions::new());

        let observed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&observed);
        let timer = reactor.create_timer(
            TimerOptions::new(),
            Arc::new(move |_, event| {
                if event == crate::chronology::TimerEvent::Deadline {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        timer
            .schedule(Instant::now() + Duration::from_millis(20))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while observed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            reactor.poll(&mut waiter).unwrap();
        }
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_interrupts_run() {
        let reactor = Arc::new(reactor_with(&mut ReactorConfig::new()));
        let mut waiter = reactor.register_waiter(WaiterOptions::new());

        let other = Arc::clone(&reactor);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            other.stop();
        });

        reactor.run(&mut waiter);
        handle.join().unwrap();
        reactor.deregister_waiter(waiter);
    }
}
