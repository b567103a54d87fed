use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::strand::Task;

/// Key ordering scheduled items by deadline, tie-broken by insertion
/// order.
type ScheduleKey = (Instant, u64);

/// The event classes a timer announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The deadline arrived.
    Deadline,
    /// The timer was cancelled while pending.
    Cancelled,
    /// The timer reached the end of its life and will announce nothing
    /// further.
    Closed,
}

/// Selects which timer events are delivered and whether the timer is
/// one-shot or periodic.
#[derive(Debug, Clone, Copy)]
pub struct TimerOptions {
    deadline_event: bool,
    cancel_event: bool,
    close_event: bool,
    one_shot: bool,
    period: Option<Duration>,
}

impl TimerOptions {
    /// Returns options for a one-shot timer delivering every event class.
    pub fn new() -> TimerOptions {
        TimerOptions::default()
    }

    /// Selects whether deadline events are delivered.
    pub fn set_deadline_event(&mut self, enabled: bool) -> &mut TimerOptions {
        self.deadline_event = enabled;
        self
    }

    /// Selects whether cancellation events are delivered.
    pub fn set_cancel_event(&mut self, enabled: bool) -> &mut TimerOptions {
        self.cancel_event = enabled;
        self
    }

    /// Selects whether close events are delivered.
    pub fn set_close_event(&mut self, enabled: bool) -> &mut TimerOptions {
        self.close_event = enabled;
        self
    }

    /// Makes the timer recur with the given period instead of closing
    /// after its first deadline.
    pub fn set_period(&mut self, period: Duration) -> &mut TimerOptions {
        self.one_shot = false;
        self.period = Some(period);
        self
    }

    /// Returns true if the timer fires at most once per arming.
    pub fn one_shot(&self) -> bool {
        self.one_shot
    }
}

impl Default for TimerOptions {
    fn default() -> TimerOptions {
        TimerOptions {
            deadline_event: true,
            cancel_event: true,
            close_event: true,
            one_shot: true,
            period: None,
        }
    }
}

/// Observer form of a timer target: one slot per event class.
pub trait TimerSession: Send + Sync {
    /// The deadline arrived.
    fn on_deadline(&self, timer: &Arc<Timer>) {
        let _ = timer;
    }

    /// The timer was cancelled while pending.
    fn on_cancelled(&self, timer: &Arc<Timer>) {
        let _ = timer;
    }

    /// The timer is closed.
    fn on_closed(&self, timer: &Arc<Timer>) {
        let _ = timer;
    }
}

/// Callback form of a timer target.
pub type TimerCallback = Arc<dyn Fn(&Arc<Timer>, TimerEvent) + Send + Sync>;

enum TimerTarget {
    Callback(TimerCallback),
    Session(Arc<dyn TimerSession>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPhase {
    Idle,
    Scheduled,
    Closed,
}

struct TimerState {
    phase: TimerPhase,
    key: Option<ScheduleKey>,
    // Bumped by every schedule; lets the firing path detect re-arming
    // from inside the deadline handler.
    epoch: u64,
}

/// A deadline integrated with the demultiplexer loop.
///
/// Timers are created by a demultiplexer (or directly from a
/// [`Chronology`]), armed with [`schedule`], and disarmed with [`cancel`]
/// or [`close`]. Firing order is by deadline, tie-broken by insertion
/// order. Cancellation announces `cancelled` if observed, then `closed`
/// if observed. A one-shot timer that fires and is not re-armed from
/// inside its own deadline handler closes itself. Re-arming a one-shot
/// timer from inside its deadline handler is allowed.
///
/// [`schedule`]: Timer::schedule
/// [`cancel`]: Timer::cancel
/// [`close`]: Timer::close
pub struct Timer {
    chronology: Arc<ChronologyShared>,
    options: TimerOptions,
    target: TimerTarget,
    state: Mutex<TimerState>,
    weak_self: Weak<Timer>,
}

impl Timer {
    /// Arms the timer to fire at the given absolute deadline, replacing
    /// any pending arming.
    pub fn schedule(&self, deadline: Instant) -> Result<()> {
        let this = self.weak_self.upgrade().ok_or(Error::Invalid)?;
        {
            let mut state = self.state.lock();
            if state.phase == TimerPhase::Closed {
                return Err(Error::Invalid);
            }
            let mut scheduled = self.chronology.scheduled.lock();
            if let Some(key) = state.key.take() {
                scheduled.remove(&key);
            }
            let key = (
                deadline,
                self.chronology.sequence.fetch_add(1, Ordering::Relaxed),
            );
            scheduled.insert(key, this);
            state.key = Some(key);
            state.phase = TimerPhase::Scheduled;
            state.epoch += 1;
        }
        self.chronology.wake();
        Ok(())
    }

    /// Cancels a pending arming. Returns [`Error::Invalid`] if the timer
    /// is not pending, already fired, or closed.
    pub fn cancel(&self) -> Result<()> {
        let won = {
            let mut state = self.state.lock();
            if state.phase == TimerPhase::Closed {
                return Err(Error::Invalid);
            }
            match state.key.take() {
                Some(key) => {
                    self.chronology.scheduled.lock().remove(&key);
                    state.phase = TimerPhase::Idle;
                    true
                }
                None => false,
            }
        };
        if !won {
            return Err(Error::Invalid);
        }
        if self.options.cancel_event {
            self.announce(TimerEvent::Cancelled);
        }
        Ok(())
    }

    /// Cancels any pending arming and retires the timer. The first close
    /// announces `cancelled` (if pending and observed) then `closed` (if
    /// observed); later closes are no-ops.
    pub fn close(&self) {
        let (was_pending, already_closed) = {
            let mut state = self.state.lock();
            if state.phase == TimerPhase::Closed {
                (false, true)
            } else {
                let was_pending = match state.key.take() {
                    Some(key) => {
                        self.chronology.scheduled.lock().remove(&key);
                        true
                    }
                    None => false,
                };
                state.phase = TimerPhase::Closed;
                (was_pending, false)
            }
        };
        if already_closed {
            return;
        }
        if was_pending && self.options.cancel_event {
            self.announce(TimerEvent::Cancelled);
        }
        if self.options.close_event {
            self.announce(TimerEvent::Closed);
        }
    }

    /// Returns true if the timer is armed.
    pub fn is_scheduled(&self) -> bool {
        self.state.lock().phase == TimerPhase::Scheduled
    }

    fn announce(&self, event: TimerEvent) {
        let this = match self.weak_self.upgrade() {
            Some(this) => this,
            None => return,
        };
        match &self.target {
            TimerTarget::Callback(callback) => callback(&this, event),
            TimerTarget::Session(session) => match event {
                TimerEvent::Deadline => session.on_deadline(&this),
                TimerEvent::Cancelled => session.on_cancelled(&this),
                TimerEvent::Closed => session.on_closed(&this),
            },
        }
    }

    fn fire(&self, key: ScheduleKey) {
        let epoch = {
            let mut state = self.state.lock();
            if state.key != Some(key) {
                // Lost the race with cancel, close, or reschedule.
                return;
            }
            state.key = None;
            state.phase = TimerPhase::Idle;
            state.epoch
        };

        if self.options.deadline_event {
            self.announce(TimerEvent::Deadline);
        }

        if let Some(period) = self.options.period {
            let rearm = {
                let state = self.state.lock();
                state.phase != TimerPhase::Closed && state.key.is_none() && state.epoch == epoch
            };
            if rearm {
                let _ = self.schedule(key.0 + period);
            }
            return;
        }

        // One-shot: unless the handler re-armed or closed the timer, its
        // life ends here.
        let close = {
            let mut state = self.state.lock();
            if state.phase != TimerPhase::Closed && state.key.is_none() && state.epoch == epoch {
                state.phase = TimerPhase::Closed;
                true
            } else {
                false
            }
        };
        if close && self.options.close_event {
            self.announce(TimerEvent::Closed);
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        fmt.debug_struct("Timer")
            .field("phase", &state.phase)
            .field("deadline", &state.key.map(|key| key.0))
            .finish()
    }
}

struct ChronologyShared {
    deferred: Mutex<VecDeque<Task>>,
    scheduled: Mutex<BTreeMap<ScheduleKey, Arc<Timer>>>,
    sequence: AtomicU64,
    waker: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl ChronologyShared {
    fn wake(&self) {
        if let Some(waker) = &*self.waker.lock() {
            waker();
        }
    }
}

/// The sorted schedule of deadlines plus the FIFO of deferred functors
/// that drives a demultiplexer's deadlines and deferred work without
/// separate threads.
pub struct Chronology {
    shared: Arc<ChronologyShared>,
}

impl Chronology {
    /// Returns an empty chronology.
    pub fn new() -> Chronology {
        Chronology {
            shared: Arc::new(ChronologyShared {
                deferred: Mutex::new(VecDeque::new()),
                scheduled: Mutex::new(BTreeMap::new()),
                sequence: AtomicU64::new(0),
                waker: Mutex::new(None),
            }),
        }
    }

    /// Installs the hook used to unblock a waiting demultiplexer when
    /// work is scheduled from another thread.
    pub(crate) fn set_waker(&self, waker: Box<dyn Fn() + Send + Sync>) {
        *self.shared.waker.lock() = Some(waker);
    }

    /// Appends a functor to the deferred FIFO. Deferred functors run on
    /// the demultiplexer thread before any not-yet-due timer.
    pub fn execute(&self, functor: Task) {
        self.shared.deferred.lock().push_back(functor);
        self.shared.wake();
    }

    /// Returns a timer announcing to the given callback.
    pub fn create_timer(&self, options: TimerOptions, callback: TimerCallback) -> Arc<Timer> {
        let shared = Arc::clone(&self.shared);
        Arc::new_cyclic(|weak| Timer {
            chronology: shared,
            options,
            target: TimerTarget::Callback(callback),
            state: Mutex::new(TimerState {
                phase: TimerPhase::Idle,
                key: None,
                epoch: 0,
            }),
            weak_self: weak.clone(),
        })
    }

    /// Returns a timer announcing to the given session.
    pub fn create_timer_session(
        &self,
        options: TimerOptions,
        session: Arc<dyn TimerSession>,
    ) -> Arc<Timer> {
        let shared = Arc::clone(&self.shared);
        Arc::new_cyclic(|weak| Timer {
            chronology: shared,
            options,
            target: TimerTarget::Session(session),
            state: Mutex::new(TimerState {
                phase: TimerPhase::Idle,
                key: None,
                epoch: 0,
            }),
            weak_self: weak.clone(),
        })
    }

    /// Returns true if any deferred functor is queued.
    pub fn has_any_deferred(&self) -> bool {
        !self.shared.deferred.lock().is_empty()
    }

    /// Returns true if any timer is armed.
    pub fn has_any_scheduled(&self) -> bool {
        !self.shared.scheduled.lock().is_empty()
    }

    /// Returns true if the chronology holds any work at all.
    pub fn has_any_scheduled_or_deferred(&self) -> bool {
        self.has_any_deferred() || self.has_any_scheduled()
    }

    /// Returns the wait timeout for the demultiplexer: zero if any
    /// deferred functor is queued, else the whole milliseconds until the
    /// earliest deadline, else `None` for an indefinite wait.
    pub fn timeout_in_milliseconds(&self) -> Option<u64> {
        if self.has_any_deferred() {
            return Some(0);
        }
        let scheduled = self.shared.scheduled.lock();
        scheduled.keys().next().map(|(deadline, _)| {
            deadline
                .saturating_duration_since(Instant::now())
                .as_millis() as u64
        })
    }

    /// Runs every currently queued deferred functor.
    pub fn drain_deferred(&self) {
        let tasks: Vec<Task> = {
            let mut deferred = self.shared.deferred.lock();
            deferred.drain(..).collect()
        };
        for task in tasks {
            task();
        }
    }

    /// Runs one announcement cycle: every currently queued deferred
    /// functor, then every timer whose deadline has arrived, in order.
    ///
    /// Functors and handlers may re-enter the chronology; work they
    /// enqueue is picked up by the next cycle, keeping the two classes
    /// fair to each other. Returns the number of items announced.
    ///
    /// The `dynamic` flag permits multi-threaded announcing to yield
    /// between items.
    pub fn announce(&self, dynamic: bool) -> usize {
        let mut announced = 0;

        let tasks: Vec<Task> = {
            let mut deferred = self.shared.deferred.lock();
            deferred.drain(..).collect()
        };
        for task in tasks {
            task();
            announced += 1;
            if dynamic {
                std::thread::yield_now();
            }
        }

        loop {
            let now = Instant::now();
            let due = {
                let mut scheduled = self.shared.scheduled.lock();
                match scheduled.keys().next().copied() {
                    Some(key) if key.0 <= now => {
                        let timer = scheduled.remove(&key).expect("due key present");
                        Some((key, timer))
                    }
                    _ => None,
                }
            };
            match due {
                Some((key, timer)) => {
                    trace!("announcing timer deadline");
                    timer.fire(key);
                    announced += 1;
                    if dynamic {
                        std::thread::yield_now();
                    }
                }
                None => break,
            }
        }

        announced
    }
}

impl Default for Chronology {
    fn default() -> Chronology {
        Chronology::new()
    }
}

impl std::fmt::Debug for Chronology {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Chronology")
            .field("deferred", &self.shared.deferred.lock().len())
            .field("scheduled", &self.shared.scheduled.lock().len())
            .finish()
    }
}
