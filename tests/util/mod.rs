// Not all helpers are used by all test binaries.
#![allow(dead_code)]

use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rivulet::{
    AcceptOptions, BindOptions, ConnectOptions, Data, Endpoint, ListenerSocket,
    ListenerSocketOptions, Reactor, ReactorConfig, StreamEvent, StreamSocket,
    StreamSocketOptions, Transport, WaiterOptions,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

pub fn assert_send<T: Send>() {}
pub fn assert_sync<T: Sync>() {}

/// A reactor driven by a dedicated waiter thread for the duration of a
/// test.
pub struct Runner {
    reactor: Arc<Reactor>,
    thread: Option<JoinHandle<()>>,
}

impl Runner {
    pub fn start() -> Runner {
        Runner::start_with(ReactorConfig::new())
    }

    pub fn start_with(config: ReactorConfig) -> Runner {
        init();
        let reactor = Arc::new(Reactor::new(config).expect("unable to create reactor"));
        let driver = Arc::clone(&reactor);
        let thread = thread::spawn(move || {
            let mut waiter = driver.register_waiter(WaiterOptions::new());
            driver.run(&mut waiter);
            driver.deregister_waiter(waiter);
        });
        Runner {
            reactor,
            thread: Some(thread),
        }
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.reactor.stop();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("waiter thread panicked");
        }
    }
}

/// Waits until `predicate` holds, panicking after [`TIMEOUT`].
pub fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn recv_within<T>(receiver: &Receiver<T>, what: &str) -> T {
    receiver
        .recv_timeout(TIMEOUT)
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

pub fn data_to_vec(data: &Data) -> Vec<u8> {
    let mut flat = Vec::new();
    data.copy_to(&mut flat).expect("unable to flatten data");
    flat
}

pub fn loopback() -> Endpoint {
    "127.0.0.1:0".parse().expect("loopback endpoint")
}

/// Opens a listening socket on an ephemeral loopback port.
pub fn listen(reactor: &Arc<Reactor>) -> Arc<ListenerSocket> {
    listen_with(reactor, ListenerSocketOptions::new())
}

pub fn listen_with(reactor: &Arc<Reactor>, options: ListenerSocketOptions) -> Arc<ListenerSocket> {
    let listener =
        ListenerSocket::open(reactor, Transport::TcpIpv4, options).expect("unable to open listener");
    listener
        .bind(&loopback(), &BindOptions::new())
        .expect("unable to bind listener");
    listener.listen().expect("unable to listen");
    listener
}

/// Establishes a connected client/server pair through a listener on an
/// ephemeral loopback port.
pub fn connected_pair(reactor: &Arc<Reactor>) -> (Arc<StreamSocket>, Arc<StreamSocket>) {
    connected_pair_with(reactor, StreamSocketOptions::new(), StreamSocketOptions::new())
}

pub fn connected_pair_with(
    reactor: &Arc<Reactor>,
    client_options: StreamSocketOptions,
    server_options: StreamSocketOptions,
) -> (Arc<StreamSocket>, Arc<StreamSocket>) {
    let mut listener_options = ListenerSocketOptions::new();
    listener_options.set_stream_options(server_options);
    let listener = listen_with(reactor, listener_options);

    let (accepted_tx, accepted_rx) = channel();
    listener
        .accept(
            &AcceptOptions::new(),
            Box::new(move |result| {
                accepted_tx.send(result).expect("accept receiver gone");
            }),
        )
        .expect("unable to queue accept");

    let client = StreamSocket::open(reactor, Transport::TcpIpv4, client_options)
        .expect("unable to open client");
    let remote = listener.source_endpoint().expect("listener source endpoint");
    let (connected_tx, connected_rx) = channel();
    client
        .connect(
            &remote,
            &ConnectOptions::new(),
            Box::new(move |result| {
                connected_tx.send(result).expect("connect receiver gone");
            }),
        )
        .expect("unable to initiate connect");

    recv_within(&connected_rx, "connect completion").expect("connect failed");
    let server = recv_within(&accepted_rx, "accepted socket").expect("accept failed");

    listener.close(None);
    (client, server)
}

/// Collects the passive events announced for one socket.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog::default()
    }

    pub fn install(&self, socket: &Arc<StreamSocket>) {
        let events = Arc::clone(&self.events);
        socket.register_session_callback(Arc::new(move |_socket, event| {
            events.lock().unwrap().push(event.clone());
        }));
    }

    pub fn snapshot(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&StreamEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}
