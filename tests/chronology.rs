use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rivulet::{Chronology, Timer, TimerEvent, TimerOptions};

mod util;

use util::{init, wait_until, Runner};

type Log = Arc<Mutex<Vec<(&'static str, TimerEvent)>>>;

fn recording_timer(chronology: &Chronology, log: &Log, name: &'static str) -> Arc<Timer> {
    let log = Arc::clone(log);
    chronology.create_timer(
        TimerOptions::new(),
        Arc::new(move |_timer, event| {
            log.lock().unwrap().push((name, event));
        }),
    )
}

fn events_for(log: &Log, name: &str) -> Vec<TimerEvent> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(timer, _)| *timer == name)
        .map(|(_, event)| *event)
        .collect()
}

// Three timers a second apart; the first timer's deadline handler closes
// the second. The second announces cancelled then closed without ever
// firing; the others fire and close normally.
#[test]
fn timer_cancellation_cascade() {
    init();
    let runner = Runner::start();
    let reactor = runner.reactor();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let base = Instant::now();

    let second = recording_timer(reactor.chronology(), &log, "second");
    second.schedule(base + Duration::from_millis(200)).unwrap();

    let first = {
        let log = Arc::clone(&log);
        let victim = Arc::clone(&second);
        reactor.create_timer(
            TimerOptions::new(),
            Arc::new(move |_timer, event| {
                log.lock().unwrap().push(("first", event));
                if event == TimerEvent::Deadline {
                    victim.close();
                }
            }),
        )
    };
    first.schedule(base + Duration::from_millis(100)).unwrap();

    let third = recording_timer(reactor.chronology(), &log, "third");
    third.schedule(base + Duration::from_millis(300)).unwrap();

    wait_until("all timers to settle", || {
        events_for(&log, "first").len() == 2
            && events_for(&log, "second").len() == 2
            && events_for(&log, "third").len() == 2
    });

    assert_eq!(
        events_for(&log, "first"),
        vec![TimerEvent::Deadline, TimerEvent::Closed]
    );
    assert_eq!(
        events_for(&log, "second"),
        vec![TimerEvent::Cancelled, TimerEvent::Closed]
    );
    assert_eq!(
        events_for(&log, "third"),
        vec![TimerEvent::Deadline, TimerEvent::Closed]
    );
}

// A deferred functor enqueued now runs before a timer whose deadline has
// not yet arrived at the moment of enqueue.
#[test]
fn deferred_work_beats_future_deadlines() {
    init();
    let chronology = Chronology::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&order);
    let timer = chronology.create_timer(
        TimerOptions::new(),
        Arc::new(move |_timer, event| {
            if event == TimerEvent::Deadline {
                log.lock().unwrap().push("deadline");
            }
        }),
    );
    timer
        .schedule(Instant::now() + Duration::from_millis(20))
        .unwrap();

    let log = Arc::clone(&order);
    chronology.execute(Box::new(move || {
        log.lock().unwrap().push("deferred");
    }));

    assert_eq!(chronology.timeout_in_milliseconds(), Some(0));
    chronology.announce(false);
    assert_eq!(*order.lock().unwrap(), vec!["deferred"]);

    std::thread::sleep(Duration::from_millis(25));
    chronology.announce(false);
    assert_eq!(*order.lock().unwrap(), vec!["deferred", "deadline"]);
}

// Scheduling a timer from another thread unblocks an indefinite wait.
#[test]
fn cross_thread_schedule_wakes_the_loop() {
    let runner = Runner::start();
    let reactor = Arc::clone(runner.reactor());

    let fired = Arc::new(Mutex::new(false));
    let observed = Arc::clone(&fired);
    let timer = reactor.create_timer(
        TimerOptions::new(),
        Arc::new(move |_timer, event| {
            if event == TimerEvent::Deadline {
                *observed.lock().unwrap() = true;
            }
        }),
    );

    let scheduler = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        timer.schedule(Instant::now() + Duration::from_millis(10)).unwrap();
    });

    wait_until("timer fired through a woken waiter", || {
        *fired.lock().unwrap()
    });
    scheduler.join().unwrap();
}
