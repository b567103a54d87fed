//! The stream-socket engine: ordered atomic write queue, prefix-match
//! read queue, shutdown sequencing, encryption upgrade, timeouts and
//! cancellation.

mod options;
pub(crate) mod queue;
mod session;

pub use options::{
    BindOptions, ConnectOptions, FlowControlDirection, FlowControlOrigin, ReceiveOptions,
    SendOptions, ShutdownDirection, ShutdownMode, StreamSocketOptions, UpgradeOptions,
};
pub use session::{SessionCallback, StreamEvent, StreamManager, StreamSession};

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::Mutex;
use socket2::{Domain, Socket, Type};

use crate::chronology::{Timer, TimerEvent, TimerOptions};
use crate::crypto::{Encryption, HandshakeState};
use crate::data::{Blob, BlobFactory, Data, DefaultBlobFactory};
use crate::endpoint::{Endpoint, Transport};
use crate::error::{Error, Result};
use crate::event::{NotificationQueue, ReactorEvent};
use crate::interest::EventOptions;
use crate::listener::ListenerSocket;
use crate::pace::RateLimiter;
use crate::reactor::Reactor;
use crate::registry::ReactorSocket;
use crate::resolve::{ResolveOptions, Resolver};
use crate::strand::Strand;
use crate::token::CancelToken;
use crate::Handle;

use queue::{Cancelled, ReadQueue, ReceiveEntry, SendEntry, WriteQueue};
use session::{dispatch_event, SessionTarget};

/// Bytes read from the OS per receive iteration.
const READ_SEGMENT_SIZE: usize = 8 * 1024;

/// Gather-write fan-in per send attempt.
const MAX_SEND_CHUNKS: usize = 16;

/// Reads per readable announcement before yielding back to the loop.
const MAX_READS_PER_EVENT: usize = 64;

/// Context delivered with a send completion: the bytes that entered the
/// OS send buffer, distinguishing "nothing happened" from "partial".
#[derive(Debug, Default)]
pub struct SendContext {
    /// Bytes of the send copied to the OS send buffer.
    pub bytes_copied: usize,
    /// The caller's token, if any.
    pub token: Option<CancelToken>,
}

/// Context delivered with a receive completion.
#[derive(Debug, Default)]
pub struct ReceiveContext {
    /// The delivered bytes.
    pub data: Data,
    /// The delivered byte count.
    pub bytes: usize,
    /// The caller's token, if any.
    pub token: Option<CancelToken>,
}

/// Completion of an asynchronous send.
pub type SendCallback = Box<dyn FnOnce(Result<()>, SendContext) + Send>;

/// Completion of an asynchronous receive.
pub type ReceiveCallback = Box<dyn FnOnce(Result<()>, ReceiveContext) + Send>;

/// Completion of a bind by name.
pub type BindCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Completion of a connect.
pub type ConnectCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Completion of an encryption upgrade.
pub type UpgradeCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Completion of an asynchronous close.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// The lifecycle of a stream socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Open but neither bound nor connected.
    Open,
    /// Bound to a source endpoint.
    Bound,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected in plaintext.
    Connected,
    /// An encryption handshake is in flight.
    Upgrading,
    /// Connected with an established encryption session.
    Established,
    /// An encryption session is terminating.
    Downgrading,
    /// The send direction is shut down.
    ShutdownSend,
    /// The receive direction is shut down.
    ShutdownReceive,
    /// Both directions are shut down.
    ShutdownBoth,
    /// An asynchronous close is in flight.
    Closing,
    /// Closed; every operation with a failure mode returns an error.
    Closed,
}

struct ConnectState {
    callback: Option<ConnectCallback>,
    endpoint: Option<Endpoint>,
    name: Option<String>,
    retries_remaining: usize,
    retry_interval: Duration,
    deadline_timer: Option<Arc<Timer>>,
    token: Option<CancelToken>,
    attempted: bool,
}

struct UpgradeState {
    callback: Option<UpgradeCallback>,
    incoming: Blob,
    token: Option<CancelToken>,
    deadline_timer: Option<Arc<Timer>>,
    handshake_bytes_sent: bool,
}

struct Inner {
    state: Lifecycle,
    socket: Option<Socket>,
    handle: Handle,
    transport: Option<Transport>,
    source: Option<Endpoint>,
    remote: Option<Endpoint>,
    bound_source: Option<Endpoint>,
    options: StreamSocketOptions,
    write_queue: WriteQueue,
    read_queue: ReadQueue,
    session: Option<SessionTarget>,
    manager: Option<Arc<dyn StreamManager>>,
    resolver: Option<Arc<dyn Resolver>>,
    strand: Option<Arc<dyn Strand>>,
    write_limiter: Option<Arc<dyn RateLimiter>>,
    read_limiter: Option<Arc<dyn RateLimiter>>,
    blob_factory: Arc<dyn BlobFactory>,
    encryption: Option<Box<dyn Encryption>>,
    upgrade: Option<UpgradeState>,
    staged_sends: Vec<(Data, SendOptions, Option<SendCallback>)>,
    acceptor: Option<Weak<ListenerSocket>>,
    connect: Option<ConnectState>,
    close_callbacks: Vec<CloseCallback>,
    send_error: Option<Error>,
    receive_error: Option<Error>,
    eof_received: bool,
    shutdown_send_pending: bool,
    shutdown_sent: bool,
    shutdown_received: bool,
    shutdown_both_requested: bool,
    shown_readable: bool,
    shown_writable: bool,
    read_flow_applied: Option<FlowControlOrigin>,
    write_flow_applied: Option<FlowControlOrigin>,
    // Per-socket announcement FIFO: completions and passive events are
    // appended under the state lock, in semantic order, and drained by a
    // single dispatcher at a time, so callbacks observe the ordering
    // guarantees even when several threads complete operations.
    announcements: VecDeque<Announcement>,
    dispatching: bool,
}

/// Announcements gathered under the state lock and dispatched after it is
/// released, through the socket's strand when one is set.
enum Announcement {
    Event(StreamEvent),
    Send(SendCallback, Result<()>, SendContext),
    Receive(ReceiveCallback, Result<()>, ReceiveContext),
    Connect(ConnectCallback, Result<()>),
    Upgrade(UpgradeCallback, Result<()>),
    Close(CloseCallback),
    Established,
    SocketClosed,
}

/// An asynchronous, connection-oriented streaming socket.
///
/// A stream socket is jointly owned by the user and its demultiplexer's
/// internal machinery: releasing user references does not destroy it. To
/// dispose of a socket, initiate [`close`], await the close callback,
/// then release references.
///
/// All operations are callback-based and may be invoked from any thread.
/// For a single socket, send completions fire in enqueue order, receive
/// completions fire in enqueue order, and the bytes of a single send are
/// contiguous in the wire stream.
///
/// [`close`]: StreamSocket::close
pub struct StreamSocket {
    reactor: Arc<Reactor>,
    self_ref: Weak<StreamSocket>,
    inner: Mutex<Inner>,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
    entry_sequence: AtomicU64,
}

fn domain_for(transport: Transport) -> Domain {
    match transport {
        Transport::TcpIpv4 => Domain::IPV4,
        Transport::TcpIpv6 => Domain::IPV6,
        Transport::Local => Domain::UNIX,
    }
}

fn new_os_socket(transport: Transport, options: &StreamSocketOptions) -> Result<Socket> {
    let socket = Socket::new(domain_for(transport), Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    if transport != Transport::Local {
        if options.keep_alive() {
            socket.set_keepalive(true)?;
        }
        if options.no_delay() {
            socket.set_nodelay(true)?;
        }
    }
    if options.zero_copy_threshold().is_some() {
        // A hint only; absence of kernel support is not an error.
        let _ = crate::sys::socket::set_zero_copy(
            std::os::unix::io::AsRawFd::as_raw_fd(&socket),
            true,
        );
    }
    Ok(socket)
}

impl StreamSocket {
    /// Opens a stream socket of the given transport.
    pub fn open(
        reactor: &Arc<Reactor>,
        transport: Transport,
        options: StreamSocketOptions,
    ) -> Result<Arc<StreamSocket>> {
        let socket = new_os_socket(transport, &options)?;
        Self::construct(reactor, socket, Some(transport), options, None, false)
    }

    /// Opens a stream socket over an existing OS handle, taking
    /// ownership: closing the engine closes the handle. A handle with a
    /// peer starts connected.
    pub fn open_with_socket(
        reactor: &Arc<Reactor>,
        socket: Socket,
        options: StreamSocketOptions,
    ) -> Result<Arc<StreamSocket>> {
        socket.set_nonblocking(true)?;
        let connected = socket.peer_addr().is_ok();
        Self::construct(reactor, socket, None, options, None, connected)
    }

    /// Opens a stream socket over another socket's handle, transferring
    /// ownership and leaving `other` closed.
    pub fn open_from(
        reactor: &Arc<Reactor>,
        other: &Arc<StreamSocket>,
        options: StreamSocketOptions,
    ) -> Result<Arc<StreamSocket>> {
        let (socket, acceptor) = {
            let mut inner = other.inner.lock();
            let socket = inner.socket.take().ok_or(Error::Invalid)?;
            let handle = inner.handle;
            inner.handle = crate::INVALID_HANDLE;
            inner.state = Lifecycle::Closed;
            let acceptor = inner.acceptor.take();
            drop(inner);
            let _ = other.reactor.detach_socket(handle, None);
            (socket, acceptor)
        };
        let connected = socket.peer_addr().is_ok();
        Self::construct(reactor, socket, None, options, acceptor, connected)
    }

    pub(crate) fn open_accepted(
        reactor: &Arc<Reactor>,
        socket: Socket,
        options: StreamSocketOptions,
        acceptor: &Arc<ListenerSocket>,
    ) -> Result<Arc<StreamSocket>> {
        socket.set_nonblocking(true)?;
        Self::construct(
            reactor,
            socket,
            None,
            options,
            Some(Arc::downgrade(acceptor)),
            true,
        )
    }

    fn construct(
        reactor: &Arc<Reactor>,
        socket: Socket,
        transport: Option<Transport>,
        options: StreamSocketOptions,
        acceptor: Option<Weak<ListenerSocket>>,
        connected: bool,
    ) -> Result<Arc<StreamSocket>> {
        let handle = std::os::unix::io::AsRawFd::as_raw_fd(&socket);
        let source = socket
            .local_addr()
            .ok()
            .and_then(|addr| Endpoint::from_sock_addr(&addr));
        let remote = socket
            .peer_addr()
            .ok()
            .and_then(|addr| Endpoint::from_sock_addr(&addr));
        let transport = transport.or_else(|| remote.as_ref().map(Endpoint::transport));

        let this = Arc::new_cyclic(|weak| StreamSocket {
            reactor: Arc::clone(reactor),
            self_ref: weak.clone(),
            inner: Mutex::new(Inner {
                state: if connected {
                    Lifecycle::Connected
                } else {
                    Lifecycle::Open
                },
                handle,
                socket: Some(socket),
                transport,
                source,
                remote,
                bound_source: None,
                write_queue: WriteQueue::new(
                    options.write_queue_low_watermark(),
                    options.write_queue_high_watermark(),
                ),
                read_queue: ReadQueue::new(
                    options.read_queue_low_watermark(),
                    options.read_queue_high_watermark(),
                ),
                options,
                session: None,
                manager: None,
                resolver: None,
                strand: None,
                write_limiter: None,
                read_limiter: None,
                blob_factory: Arc::new(DefaultBlobFactory),
                encryption: None,
                upgrade: None,
                staged_sends: Vec::new(),
                acceptor,
                connect: None,
                close_callbacks: Vec::new(),
                send_error: None,
                receive_error: None,
                eof_received: false,
                shutdown_send_pending: false,
                shutdown_sent: false,
                shutdown_received: false,
                shutdown_both_requested: false,
                shown_readable: false,
                shown_writable: false,
                read_flow_applied: None,
                write_flow_applied: None,
                announcements: VecDeque::new(),
                dispatching: false,
            }),
            total_bytes_sent: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            entry_sequence: AtomicU64::new(1),
        });

        let as_reactor_socket: Arc<dyn ReactorSocket> = this.clone();
        reactor.attach_socket(&as_reactor_socket)?;

        if connected {
            let mut inner = this.inner.lock();
            this.show_readable_locked(&mut inner);
        }

        Ok(this)
    }

    fn this(&self) -> Option<Arc<StreamSocket>> {
        self.self_ref.upgrade()
    }

    fn next_id(&self) -> u64 {
        self.entry_sequence.fetch_add(1, Ordering::Relaxed)
    }

    // ===== accessors =====

    /// Returns the OS descriptor, or [`INVALID_HANDLE`] after close.
    ///
    /// [`INVALID_HANDLE`]: crate::INVALID_HANDLE
    pub fn handle(&self) -> Handle {
        self.inner.lock().handle
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> Lifecycle {
        self.inner.lock().state
    }

    /// Returns the transport, once known.
    pub fn transport(&self) -> Option<Transport> {
        self.inner.lock().transport
    }

    /// Returns the source endpoint, once bound or connected.
    pub fn source_endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().source.clone()
    }

    /// Returns the remote endpoint, once connected.
    pub fn remote_endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().remote.clone()
    }

    /// Returns the listener this socket was accepted from, if any.
    pub fn acceptor(&self) -> Option<Arc<ListenerSocket>> {
        self.inner.lock().acceptor.as_ref().and_then(Weak::upgrade)
    }

    /// Returns the serialization strand, if one is set.
    pub fn strand(&self) -> Option<Arc<dyn Strand>> {
        self.inner.lock().strand.clone()
    }

    /// Returns the demultiplexer driving this socket.
    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    /// Returns the peer's certificate from the established encryption
    /// session, if any.
    pub fn remote_certificate(&self) -> Option<Blob> {
        self.inner
            .lock()
            .encryption
            .as_ref()
            .and_then(|encryption| encryption.remote_certificate())
    }

    /// Returns the private key of the established encryption session, if
    /// it discloses one.
    pub fn private_key(&self) -> Option<Blob> {
        self.inner
            .lock()
            .encryption
            .as_ref()
            .and_then(|encryption| encryption.private_key())
    }

    /// Returns the current write queue size in bytes.
    pub fn write_queue_size(&self) -> usize {
        self.inner.lock().write_queue.size()
    }

    /// Returns the current read queue size in bytes.
    pub fn read_queue_size(&self) -> usize {
        self.inner.lock().read_queue.size()
    }

    /// Returns the total bytes copied to the OS send buffer over the
    /// socket's lifetime.
    pub fn total_bytes_sent(&self) -> u64 {
        self.total_bytes_sent.load(Ordering::Relaxed)
    }

    /// Returns the total bytes drained from the OS receive buffer over
    /// the socket's lifetime.
    pub fn total_bytes_received(&self) -> u64 {
        self.total_bytes_received.load(Ordering::Relaxed)
    }

    // ===== registration =====

    /// Installs a session observer for this socket's passive events.
    pub fn register_session(&self, session: Arc<dyn StreamSession>) {
        self.inner.lock().session = Some(SessionTarget::Observer(session));
    }

    /// Installs a single callback receiving every passive event as a
    /// tagged value.
    pub fn register_session_callback(&self, callback: SessionCallback) {
        self.inner.lock().session = Some(SessionTarget::Callback(callback));
    }

    /// Installs a manager observing establishment and close.
    pub fn register_manager(&self, manager: Arc<dyn StreamManager>) {
        self.inner.lock().manager = Some(manager);
    }

    /// Installs the resolver used by bind and connect by name.
    pub fn register_resolver(&self, resolver: Arc<dyn Resolver>) {
        self.inner.lock().resolver = Some(resolver);
    }

    /// Routes this socket's callbacks through a strand.
    pub fn set_strand(&self, strand: Arc<dyn Strand>) {
        self.inner.lock().strand = Some(strand);
    }

    /// Replaces the write queue watermarks.
    pub fn set_write_queue_watermarks(&self, low: usize, high: usize) {
        self.inner.lock().write_queue.set_watermarks(low, high);
    }

    /// Replaces the read queue watermarks.
    pub fn set_read_queue_watermarks(&self, low: usize, high: usize) {
        self.inner.lock().read_queue.set_watermarks(low, high);
    }

    /// Installs a rate limiter consulted before copying bytes to the OS
    /// send buffer.
    pub fn set_write_rate_limiter(&self, limiter: Arc<dyn RateLimiter>) {
        self.inner.lock().write_limiter = Some(limiter);
    }

    /// Installs a rate limiter consulted before draining the OS receive
    /// buffer.
    pub fn set_read_rate_limiter(&self, limiter: Arc<dyn RateLimiter>) {
        self.inner.lock().read_limiter = Some(limiter);
    }

    /// Installs the allocator backing read-queue segments.
    pub fn set_blob_factory(&self, factory: Arc<dyn BlobFactory>) {
        self.inner.lock().blob_factory = factory;
    }

    // ===== announcement plumbing =====

    /// Transfers gathered announcements into the socket's FIFO, in order,
    /// while the state lock is still held.
    fn seal(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        inner.announcements.extend(pending.drain(..));
    }

    /// Drains the announcement FIFO, one item at a time, unless another
    /// thread is already draining it. Items are posted to the socket's
    /// strand when one is set and executed inline otherwise.
    fn dispatch(&self) {
        let this = match self.this() {
            Some(this) => this,
            None => return,
        };
        {
            let mut inner = self.inner.lock();
            if inner.dispatching || inner.announcements.is_empty() {
                return;
            }
            inner.dispatching = true;
        }
        loop {
            let (announcement, strand, session, manager) = {
                let mut inner = self.inner.lock();
                match inner.announcements.pop_front() {
                    Some(announcement) => (
                        announcement,
                        inner.strand.clone(),
                        inner.session.clone(),
                        inner.manager.clone(),
                    ),
                    None => {
                        inner.dispatching = false;
                        return;
                    }
                }
            };
            let socket = Arc::clone(&this);
            let run = move || dispatch_announcement(socket, session, manager, announcement);
            match strand {
                Some(strand) => strand.execute(Box::new(run)),
                None => run(),
            }
        }
    }

    fn show_readable_locked(&self, inner: &mut Inner) {
        if !inner.shown_readable && inner.handle >= 0 && inner.read_flow_applied.is_none() {
            let _ = self
                .reactor
                .show_readable(inner.handle, &EventOptions::new());
            inner.shown_readable = true;
        }
    }

    fn hide_readable_locked(&self, inner: &mut Inner) {
        if inner.shown_readable && inner.handle >= 0 {
            let _ = self.reactor.hide_readable(inner.handle);
            inner.shown_readable = false;
        }
    }

    fn show_writable_locked(&self, inner: &mut Inner) {
        if !inner.shown_writable && inner.handle >= 0 && inner.write_flow_applied.is_none() {
            let _ = self
                .reactor
                .show_writable(inner.handle, &EventOptions::new());
            inner.shown_writable = true;
        }
    }

    fn hide_writable_locked(&self, inner: &mut Inner) {
        if inner.shown_writable && inner.handle >= 0 {
            let _ = self.reactor.hide_writable(inner.handle);
            inner.shown_writable = false;
        }
    }

    fn deadline_timer(
        &self,
        deadline: Instant,
        on_deadline: impl Fn(&Arc<StreamSocket>) + Send + Sync + 'static,
    ) -> Arc<Timer> {
        let weak = self.self_ref.clone();
        let mut options = TimerOptions::new();
        options.set_cancel_event(false).set_close_event(false);
        let timer = self.reactor.create_timer(
            options,
            Arc::new(move |_timer, event| {
                if event == TimerEvent::Deadline {
                    if let Some(socket) = weak.upgrade() {
                        on_deadline(&socket);
                    }
                }
            }),
        );
        let _ = timer.schedule(deadline);
        timer
    }

    // ===== bind and connect =====

    /// Binds the socket to an explicit source endpoint.
    pub fn bind(&self, endpoint: &Endpoint, options: &BindOptions) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.state != Lifecycle::Open {
            return Err(Error::Invalid);
        }
        let socket = inner.socket.as_ref().ok_or(Error::Invalid)?;
        if options.reuse_address() {
            socket.set_reuse_address(true)?;
        }
        socket.bind(&endpoint.to_sock_addr()?)?;
        inner.source = socket
            .local_addr()
            .ok()
            .and_then(|addr| Endpoint::from_sock_addr(&addr));
        inner.bound_source = Some(endpoint.clone());
        inner.state = Lifecycle::Bound;
        Ok(())
    }

    /// Resolves `name` through the registered resolver and binds to the
    /// result. Resolution failures propagate as the bind's failure.
    pub fn bind_name(&self, name: &str, options: &BindOptions, callback: BindCallback) {
        let resolver = self.inner.lock().resolver.clone();
        let weak = self.self_ref.clone();
        let bind_options = options.clone();
        match resolver {
            None => callback(Err(Error::Invalid)),
            Some(resolver) => {
                let resolve_options = ResolveOptions {
                    token: options.token(),
                    ..ResolveOptions::default()
                };
                resolver.resolve_endpoint(
                    name,
                    &resolve_options,
                    Box::new(move |result| match (result, weak.upgrade()) {
                        (Ok(endpoint), Some(socket)) => {
                            callback(socket.bind(&endpoint, &bind_options))
                        }
                        (Err(error), _) => callback(Err(error)),
                        (Ok(_), None) => callback(Err(Error::Invalid)),
                    }),
                );
            }
        }
    }

    /// Connects to an explicit remote endpoint. `bind` may be skipped;
    /// the OS then binds implicitly. Completion is asynchronous; a
    /// connect that reaches its deadline or is cancelled forces the
    /// socket to close.
    pub fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        callback: ConnectCallback,
    ) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, Lifecycle::Open | Lifecycle::Bound) {
                return Err(Error::Invalid);
            }
            if inner.connect.is_some() {
                return Err(Error::Invalid);
            }
            inner.connect = Some(ConnectState {
                callback: Some(callback),
                endpoint: Some(endpoint.clone()),
                name: None,
                retries_remaining: options.retry_count(),
                retry_interval: options.retry_interval(),
                deadline_timer: None,
                token: options.token(),
                attempted: false,
            });
            if let Some(deadline) = options.deadline() {
                let timer = self.deadline_timer(deadline, |socket| socket.connect_expired());
                if let Some(connect) = inner.connect.as_mut() {
                    connect.deadline_timer = Some(timer);
                }
            }
            pending.push(Announcement::Event(StreamEvent::ConnectInitiated));
            let result = self.begin_connect_attempt(&mut inner, &mut pending);
            self.seal(&mut inner, &mut pending);
            result
        };
        self.dispatch();
        result
    }

    /// Resolves `name` through the registered resolver and connects to
    /// the result; retries re-use the resolver.
    pub fn connect_name(
        &self,
        name: &str,
        options: &ConnectOptions,
        callback: ConnectCallback,
    ) -> Result<()> {
        let resolver = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, Lifecycle::Open | Lifecycle::Bound) {
                return Err(Error::Invalid);
            }
            if inner.connect.is_some() {
                return Err(Error::Invalid);
            }
            let resolver = inner.resolver.clone().ok_or(Error::Invalid)?;
            inner.connect = Some(ConnectState {
                callback: Some(callback),
                endpoint: None,
                name: Some(name.to_string()),
                retries_remaining: options.retry_count(),
                retry_interval: options.retry_interval(),
                deadline_timer: None,
                token: options.token(),
                attempted: false,
            });
            if let Some(deadline) = options.deadline() {
                let timer = self.deadline_timer(deadline, |socket| socket.connect_expired());
                if let Some(connect) = inner.connect.as_mut() {
                    connect.deadline_timer = Some(timer);
                }
            }
            inner
                .announcements
                .push_back(Announcement::Event(StreamEvent::ConnectInitiated));
            resolver
        };
        self.dispatch();

        let weak = self.self_ref.clone();
        let resolve_options = ResolveOptions {
            token: options.token(),
            ..ResolveOptions::default()
        };
        resolver.resolve_endpoint(
            name,
            &resolve_options,
            Box::new(move |result| {
                if let Some(socket) = weak.upgrade() {
                    socket.connect_resolved(result);
                }
            }),
        );
        Ok(())
    }

    fn connect_resolved(&self, result: Result<Endpoint>) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            match result {
                Ok(endpoint) => {
                    if let Some(connect) = inner.connect.as_mut() {
                        connect.endpoint = Some(endpoint);
                        let _ = self.begin_connect_attempt(&mut inner, &mut pending);
                    }
                }
                Err(error) => self.fail_connect(&mut inner, &mut pending, error),
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    fn begin_connect_attempt(
        &self,
        inner: &mut Inner,
        pending: &mut Vec<Announcement>,
    ) -> Result<()> {
        let endpoint = match inner.connect.as_ref().and_then(|c| c.endpoint.clone()) {
            Some(endpoint) => endpoint,
            None => return Ok(()),
        };

        // Re-attempts need a fresh descriptor; a failed nonblocking
        // connect leaves the old one unusable.
        let retrying = inner.connect.as_ref().map(|c| c.attempted).unwrap_or(false);
        if retrying {
            let transport = inner
                .transport
                .unwrap_or_else(|| endpoint.transport());
            let fresh = new_os_socket(transport, &inner.options)?;
            let stale = inner.handle;
            let _ = self.reactor.detach_socket(stale, None);
            inner.handle = std::os::unix::io::AsRawFd::as_raw_fd(&fresh);
            inner.socket = Some(fresh);
            inner.shown_readable = false;
            inner.shown_writable = false;
            if let (Some(source), Some(socket)) = (inner.bound_source.clone(), &inner.socket) {
                let _ = socket.bind(&source.to_sock_addr()?);
            }
            if let Some(this) = self.this() {
                let as_reactor_socket: Arc<dyn ReactorSocket> = this;
                self.reactor.attach_socket(&as_reactor_socket)?;
            }
        }

        if let Some(connect) = inner.connect.as_mut() {
            connect.attempted = true;
        }
        if inner.transport.is_none() {
            inner.transport = Some(endpoint.transport());
        }

        let socket = inner.socket.as_ref().ok_or(Error::Invalid)?;
        let address = endpoint.to_sock_addr()?;
        match socket.connect(&address) {
            Ok(()) => {}
            Err(error) => {
                let in_progress = error.raw_os_error() == Some(libc::EINPROGRESS)
                    || error.kind() == std::io::ErrorKind::WouldBlock;
                if !in_progress {
                    self.retry_or_fail_connect(inner, pending, Error::from(error));
                    return Ok(());
                }
            }
        }
        inner.state = Lifecycle::Connecting;
        inner.remote = Some(endpoint);
        self.show_writable_locked(inner);
        Ok(())
    }

    fn retry_or_fail_connect(
        &self,
        inner: &mut Inner,
        pending: &mut Vec<Announcement>,
        error: Error,
    ) {
        let retry = match inner.connect.as_mut() {
            Some(connect) if connect.retries_remaining > 0 => {
                connect.retries_remaining -= 1;
                Some(connect.retry_interval)
            }
            _ => None,
        };
        match retry {
            Some(interval) => {
                trace!("connect attempt failed ({}); retrying", error);
                inner.state = if inner.bound_source.is_some() {
                    Lifecycle::Bound
                } else {
                    Lifecycle::Open
                };
                let _ = self.deadline_timer(Instant::now() + interval, |socket| {
                    socket.connect_retry();
                });
            }
            None => self.fail_connect(inner, pending, error),
        }
    }

    fn fail_connect(&self, inner: &mut Inner, pending: &mut Vec<Announcement>, error: Error) {
        if let Some(mut connect) = inner.connect.take() {
            if let Some(timer) = connect.deadline_timer.take() {
                timer.close();
            }
            if let Some(callback) = connect.callback.take() {
                pending.push(Announcement::Connect(callback, Err(error)));
            }
        }
        inner.state = if inner.bound_source.is_some() {
            Lifecycle::Bound
        } else {
            Lifecycle::Open
        };
        self.hide_writable_locked(inner);
    }

    fn connect_retry(&self) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.connect.is_none() || inner.state == Lifecycle::Closing {
                return;
            }
            let name = inner.connect.as_ref().and_then(|c| c.name.clone());
            match (name, inner.resolver.clone()) {
                (Some(name), Some(resolver)) => {
                    drop(inner);
                    let weak = self.self_ref.clone();
                    resolver.resolve_endpoint(
                        &name,
                        &ResolveOptions::default(),
                        Box::new(move |result| {
                            if let Some(socket) = weak.upgrade() {
                                socket.connect_resolved(result);
                            }
                        }),
                    );
                    return;
                }
                _ => {
                    let _ = self.begin_connect_attempt(&mut inner, &mut pending);
                }
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    fn connect_expired(&self) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.connect.is_some() {
                self.fail_connect(&mut inner, &mut pending, Error::WouldBlock);
            } else {
                return;
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
        // Reaching the connect deadline forces the socket to close.
        self.close(None);
    }

    fn complete_connect(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        let probe = inner
            .socket
            .as_ref()
            .and_then(|socket| socket.take_error().ok())
            .flatten();
        match probe {
            None => {
                inner.state = Lifecycle::Connected;
                if let Some(socket) = &inner.socket {
                    inner.source = socket
                        .local_addr()
                        .ok()
                        .and_then(|addr| Endpoint::from_sock_addr(&addr));
                    inner.remote = socket
                        .peer_addr()
                        .ok()
                        .and_then(|addr| Endpoint::from_sock_addr(&addr))
                        .or_else(|| inner.remote.take());
                }
                if let Some(mut connect) = inner.connect.take() {
                    if let Some(timer) = connect.deadline_timer.take() {
                        timer.close();
                    }
                    if let Some(callback) = connect.callback.take() {
                        pending.push(Announcement::Connect(callback, Ok(())));
                    }
                }
                pending.push(Announcement::Event(StreamEvent::ConnectComplete));
                pending.push(Announcement::Established);
                self.show_readable_locked(inner);
                if inner.write_queue.is_empty() {
                    self.hide_writable_locked(inner);
                }
            }
            Some(error) => {
                self.retry_or_fail_connect(inner, pending, Error::from(error));
            }
        }
    }

    // ===== send =====

    /// Sends `data`, discarding the completion.
    ///
    /// Returns `Ok` when the data was queued or copied; `WouldBlock`
    /// synchronously when the pre-send write queue size already exceeds
    /// the high watermark; `Eof` when the send side is already shut
    /// down; any other error is fatal for all further sends.
    pub fn send(&self, data: Data, options: &SendOptions) -> Result<()> {
        self.send_internal(data, options, None)
    }

    /// Sends `data` and announces completion to `callback` once the last
    /// byte has been copied to the OS send buffer.
    pub fn send_with(
        &self,
        data: Data,
        options: &SendOptions,
        callback: SendCallback,
    ) -> Result<()> {
        self.send_internal(data, options, Some(callback))
    }

    fn send_internal(
        &self,
        data: Data,
        options: &SendOptions,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let result = self.send_locked(&mut inner, data, options, callback, &mut pending);
            self.seal(&mut inner, &mut pending);
            result
        };
        self.dispatch();
        result
    }

    fn send_locked(
        &self,
        inner: &mut Inner,
        data: Data,
        options: &SendOptions,
        callback: Option<SendCallback>,
        pending: &mut Vec<Announcement>,
    ) -> Result<()> {
        if let Some(error) = inner.send_error {
            return Err(error);
        }
        if inner.shutdown_sent || inner.shutdown_send_pending {
            return Err(Error::Eof);
        }
        match inner.state {
            Lifecycle::Connecting
            | Lifecycle::Connected
            | Lifecycle::Upgrading
            | Lifecycle::Established
            | Lifecycle::Downgrading
            | Lifecycle::ShutdownReceive => {}
            Lifecycle::ShutdownSend | Lifecycle::ShutdownBoth => return Err(Error::Eof),
            _ => return Err(Error::Invalid),
        }
        if data.is_empty() {
            return Err(Error::Invalid);
        }

        // While the handshake is in flight, application data waits for
        // the session to establish, then flows through it in order.
        if inner.state == Lifecycle::Upgrading {
            inner.staged_sends.push((data, *options, callback));
            return Ok(());
        }

        let data = self.through_encryption(inner, data)?;
        let size = data.size();

        let deny = inner
            .write_limiter
            .as_ref()
            .map(|limiter| limiter.acquire(size))
            .filter(|acquire| !acquire.allowed);

        let immediate = inner.write_queue.is_empty()
            && deny.is_none()
            && inner.write_flow_applied.is_none()
            && inner.state != Lifecycle::Connecting;

        if !immediate {
            if inner.write_queue.would_block() {
                return Err(Error::WouldBlock);
            }
            if let Some(acquire) = deny {
                if let Some(retry_at) = acquire.retry_at {
                    let _ = self.deadline_timer(retry_at, |socket| socket.resume_write());
                }
            }
            self.enqueue_send(inner, data, size, options, callback, false, pending);
            return Ok(());
        }

        // Queue empty and the limiter permits: attempt an immediate copy
        // to the OS send buffer; any residual is enqueued whole.
        let mut data = data;
        let mut copied = 0usize;
        let mut scratch = Vec::new();
        loop {
            if copied == size {
                break;
            }
            let chunks = data.front_chunks(&mut scratch, MAX_SEND_CHUNKS)?;
            if chunks.is_empty() {
                break;
            }
            let slices: Vec<IoSlice<'_>> = chunks.iter().map(|chunk| IoSlice::new(chunk)).collect();
            let socket = inner.socket.as_ref().ok_or(Error::Invalid)?;
            match socket.send_vectored(&slices) {
                Ok(n) => {
                    drop(slices);
                    data.pop(n);
                    copied += n;
                    self.total_bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    let error = Error::from(error);
                    inner.send_error = Some(error);
                    pending.push(Announcement::Event(StreamEvent::Error { error }));
                    return Err(error);
                }
            }
        }

        if copied == size {
            if let Some(callback) = callback {
                pending.push(Announcement::Send(
                    callback,
                    Ok(()),
                    SendContext {
                        bytes_copied: size,
                        token: options.token(),
                    },
                ));
            }
            return Ok(());
        }

        let remaining = size - copied;
        self.enqueue_send_partial(inner, data, size, remaining, options, callback, pending);
        Ok(())
    }

    fn through_encryption(&self, inner: &mut Inner, data: Data) -> Result<Data> {
        if inner.state != Lifecycle::Established {
            return Ok(data);
        }
        let encryption = match inner.encryption.as_mut() {
            Some(encryption) => encryption,
            None => return Ok(data),
        };
        let mut plaintext = data.to_blob()?;
        let mut ciphertext = Blob::new();
        encryption.encrypt(&mut plaintext, &mut ciphertext)?;
        Ok(Data::Blob(ciphertext))
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue_send_partial(
        &self,
        inner: &mut Inner,
        data: Data,
        initial: usize,
        remaining: usize,
        options: &SendOptions,
        callback: Option<SendCallback>,
        pending: &mut Vec<Announcement>,
    ) {
        let id = self.next_id();
        let deadline = options.deadline().map(|deadline| {
            self.deadline_timer(deadline, move |socket| socket.send_expired(id))
        });
        let entry = SendEntry {
            id,
            data,
            initial,
            remaining,
            token: options.token(),
            deadline,
            callback,
            handshake: false,
        };
        if inner.write_queue.push(entry) {
            pending.push(Announcement::Event(StreamEvent::WriteQueueHighWatermark {
                size: inner.write_queue.size(),
            }));
        }
        self.show_writable_locked(inner);
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue_send(
        &self,
        inner: &mut Inner,
        data: Data,
        size: usize,
        options: &SendOptions,
        callback: Option<SendCallback>,
        handshake: bool,
        pending: &mut Vec<Announcement>,
    ) {
        let id = self.next_id();
        let deadline = options.deadline().map(|deadline| {
            self.deadline_timer(deadline, move |socket| socket.send_expired(id))
        });
        let entry = SendEntry {
            id,
            data,
            initial: size,
            remaining: size,
            token: options.token(),
            deadline,
            callback,
            handshake,
        };
        if inner.write_queue.push(entry) {
            pending.push(Announcement::Event(StreamEvent::WriteQueueHighWatermark {
                size: inner.write_queue.size(),
            }));
        }
        if inner.state != Lifecycle::Connecting {
            self.show_writable_locked(inner);
        }
    }

    fn send_expired(&self, id: u64) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if let Some(mut entry) = inner.write_queue.remove_unprogressed(id) {
                if let Some(callback) = entry.callback.take() {
                    pending.push(Announcement::Send(
                        callback,
                        Err(Error::WouldBlock),
                        SendContext {
                            bytes_copied: 0,
                            token: entry.token,
                        },
                    ));
                }
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    fn resume_write(&self) {
        let mut inner = self.inner.lock();
        if !inner.write_queue.is_empty() && inner.state != Lifecycle::Closing {
            self.show_writable_locked(&mut inner);
        }
    }

    fn drain_write_queue(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        if inner.write_flow_applied.is_some() {
            self.hide_writable_locked(inner);
            return;
        }
        let mut scratch = Vec::new();
        loop {
            let remaining = match inner.write_queue.front_mut() {
                Some(entry) => entry.remaining,
                None => {
                    self.hide_writable_locked(inner);
                    if inner.shutdown_send_pending {
                        self.finish_shutdown_send(inner, pending);
                    }
                    break;
                }
            };

            if let Some(limiter) = inner.write_limiter.clone() {
                let acquire = limiter.acquire(remaining);
                if !acquire.allowed {
                    self.hide_writable_locked(inner);
                    if let Some(retry_at) = acquire.retry_at {
                        let _ = self.deadline_timer(retry_at, |socket| socket.resume_write());
                    }
                    break;
                }
            }

            let entry = inner.write_queue.front_mut().expect("head present");
            let chunks = match entry.data.front_chunks(&mut scratch, MAX_SEND_CHUNKS) {
                Ok(chunks) => chunks,
                Err(error) => {
                    self.fail_send_direction(inner, pending, error);
                    break;
                }
            };
            let slices: Vec<IoSlice<'_>> = chunks.iter().map(|chunk| IoSlice::new(chunk)).collect();
            let socket = match inner.socket.as_ref() {
                Some(socket) => socket,
                None => break,
            };
            match socket.send_vectored(&slices) {
                Ok(n) => {
                    drop(slices);
                    let entry = inner.write_queue.front_mut().expect("head present");
                    entry.data.pop(n);
                    entry.remaining -= n;
                    let completed = entry.remaining == 0;
                    let was_handshake = entry.handshake;
                    inner.write_queue.record_progress(n);
                    self.total_bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                    if was_handshake {
                        if let Some(upgrade) = inner.upgrade.as_mut() {
                            upgrade.handshake_bytes_sent = true;
                        }
                    }
                    if completed {
                        let mut entry = inner.write_queue.pop_front().expect("head present");
                        if let Some(timer) = entry.deadline.take() {
                            timer.close();
                        }
                        if let Some(callback) = entry.callback.take() {
                            pending.push(Announcement::Send(
                                callback,
                                Ok(()),
                                SendContext {
                                    bytes_copied: entry.initial,
                                    token: entry.token,
                                },
                            ));
                        }
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    self.show_writable_locked(inner);
                    break;
                }
                Err(error) => {
                    self.fail_send_direction(inner, pending, Error::from(error));
                    break;
                }
            }
        }

        if inner.write_queue.drained_to_low() {
            pending.push(Announcement::Event(StreamEvent::WriteQueueLowWatermark {
                size: inner.write_queue.size(),
            }));
        }
    }

    fn fail_send_direction(&self, inner: &mut Inner, pending: &mut Vec<Announcement>, error: Error) {
        inner.send_error = Some(error);
        for mut entry in inner.write_queue.take_all() {
            if let Some(timer) = entry.deadline.take() {
                timer.close();
            }
            if let Some(callback) = entry.callback.take() {
                let copied = entry.copied();
                pending.push(Announcement::Send(
                    callback,
                    Err(error),
                    SendContext {
                        bytes_copied: copied,
                        token: entry.token,
                    },
                ));
            }
        }
        self.hide_writable_locked(inner);
        pending.push(Announcement::Event(StreamEvent::Error { error }));
    }

    // ===== receive =====

    /// Synchronously dequeues up to `max_size` read-queue bytes into
    /// `data`, which must be undefined or blob-backed.
    ///
    /// Returns `WouldBlock` when fewer than `min_size` bytes are queued,
    /// and `Eof` once the peer has shut down its send direction and the
    /// queue cannot satisfy the request.
    pub fn receive(&self, data: &mut Data, options: &ReceiveOptions) -> Result<usize> {
        let mut pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, Lifecycle::Closing | Lifecycle::Closed) {
                return Err(Error::Invalid);
            }
            if let Some(error) = inner.receive_error {
                return Err(error);
            }
            let available = inner.read_queue.size();
            let result = if !matches!(data, Data::Undefined | Data::Blob(_)) {
                Err(Error::Invalid)
            } else if available >= options.min_size().max(1) {
                let take = available.min(options.max_size());
                let delivery = inner.read_queue.buffer_mut().split_to(take);
                match data {
                    Data::Undefined => *data = Data::Blob(delivery),
                    Data::Blob(blob) => blob.append_blob(&delivery),
                    _ => unreachable!("destination checked above"),
                }
                self.after_read_queue_drain(&mut inner, &mut pending);
                Ok(take)
            } else if inner.eof_received {
                Err(Error::Eof)
            } else {
                Err(Error::WouldBlock)
            };
            self.seal(&mut inner, &mut pending);
            result
        };
        self.dispatch();
        result
    }

    /// Receives asynchronously: appends a receive entry satisfied once
    /// `min_size` bytes are queued, delivering at most `max_size` bytes
    /// to `callback`. If data is already available the callback is still
    /// dispatched through the socket's strand.
    pub fn receive_with(&self, options: &ReceiveOptions, callback: ReceiveCallback) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, Lifecycle::Closing | Lifecycle::Closed) {
                return Err(Error::Invalid);
            }
            if let Some(error) = inner.receive_error {
                return Err(error);
            }

            let id = self.next_id();
            let deadline = options.deadline().map(|deadline| {
                self.deadline_timer(deadline, move |socket| socket.receive_expired(id))
            });
            let entry = ReceiveEntry {
                id,
                min_size: options.min_size().max(1),
                max_size: options.max_size(),
                token: options.token(),
                deadline,
                callback: Some(callback),
            };
            inner.read_queue.push_entry(entry);
            self.satisfy_receives(&mut inner, &mut pending);

            // The peer may already have shut down; a queued entry that
            // can never be satisfied completes with end-of-stream.
            if inner.eof_received {
                self.complete_pending_receives_with_eof(&mut inner, &mut pending);
            } else {
                self.show_readable_locked(&mut inner);
            }
            self.seal(&mut inner, &mut pending);
            Ok(())
        };
        self.dispatch();
        result
    }

    fn receive_expired(&self, id: u64) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if let Some(mut entry) = inner.read_queue.remove_entry(id) {
                if let Some(callback) = entry.callback.take() {
                    pending.push(Announcement::Receive(
                        callback,
                        Err(Error::WouldBlock),
                        ReceiveContext {
                            data: Data::Undefined,
                            bytes: 0,
                            token: entry.token,
                        },
                    ));
                }
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    fn resume_read(&self) {
        let mut inner = self.inner.lock();
        if inner.state != Lifecycle::Closing && inner.state != Lifecycle::Closed {
            self.show_readable_locked(&mut inner);
        }
    }

    fn satisfy_receives(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        while let Some((mut entry, delivery)) = inner.read_queue.satisfy_head() {
            if let Some(timer) = entry.deadline.take() {
                timer.close();
            }
            let bytes = delivery.length();
            if let Some(callback) = entry.callback.take() {
                pending.push(Announcement::Receive(
                    callback,
                    Ok(()),
                    ReceiveContext {
                        data: Data::Blob(delivery),
                        bytes,
                        token: entry.token,
                    },
                ));
            }
        }
        self.after_read_queue_drain(inner, pending);
    }

    fn after_read_queue_drain(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        if inner.read_queue.drained_to_low() {
            pending.push(Announcement::Event(StreamEvent::ReadQueueLowWatermark {
                size: inner.read_queue.size(),
            }));
            if inner.read_flow_applied == Some(FlowControlOrigin::Automatic) {
                inner.read_flow_applied = None;
                pending.push(Announcement::Event(StreamEvent::ReadQueueFlowControlRelaxed));
                if !inner.eof_received {
                    self.show_readable_locked(inner);
                }
            }
        }
    }

    fn complete_pending_receives_with_eof(
        &self,
        inner: &mut Inner,
        pending: &mut Vec<Announcement>,
    ) {
        for mut entry in inner.read_queue.take_entries() {
            if let Some(timer) = entry.deadline.take() {
                timer.close();
            }
            if let Some(callback) = entry.callback.take() {
                pending.push(Announcement::Receive(
                    callback,
                    Err(Error::Eof),
                    ReceiveContext {
                        data: Data::Undefined,
                        bytes: 0,
                        token: entry.token,
                    },
                ));
            }
        }
    }

    fn handle_eof(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        inner.eof_received = true;
        inner.shutdown_received = true;
        inner.state = if inner.shutdown_sent {
            Lifecycle::ShutdownBoth
        } else {
            Lifecycle::ShutdownReceive
        };
        pending.push(Announcement::Event(StreamEvent::ShutdownReceive));
        self.hide_readable_locked(inner);
        self.satisfy_receives(inner, pending);
        self.complete_pending_receives_with_eof(inner, pending);
    }

    fn fail_receive_direction(
        &self,
        inner: &mut Inner,
        pending: &mut Vec<Announcement>,
        error: Error,
    ) {
        inner.receive_error = Some(error);
        for mut entry in inner.read_queue.take_entries() {
            if let Some(timer) = entry.deadline.take() {
                timer.close();
            }
            if let Some(callback) = entry.callback.take() {
                pending.push(Announcement::Receive(
                    callback,
                    Err(error),
                    ReceiveContext {
                        data: Data::Undefined,
                        bytes: 0,
                        token: entry.token,
                    },
                ));
            }
        }
        self.hide_readable_locked(inner);
        pending.push(Announcement::Event(StreamEvent::Error { error }));
    }

    fn drain_receive_buffer(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        for _ in 0..MAX_READS_PER_EVENT {
            if inner.read_flow_applied.is_some() {
                break;
            }
            if let Some(limiter) = inner.read_limiter.clone() {
                let acquire = limiter.acquire(READ_SEGMENT_SIZE);
                if !acquire.allowed {
                    self.hide_readable_locked(inner);
                    if let Some(retry_at) = acquire.retry_at {
                        let _ = self.deadline_timer(retry_at, |socket| socket.resume_read());
                    }
                    break;
                }
            }

            let mut segment = inner.blob_factory.create_segment(READ_SEGMENT_SIZE);
            let socket = match inner.socket.as_ref() {
                Some(socket) => socket,
                None => break,
            };
            let n = {
                let spare = segment.spare_capacity_mut();
                match socket.recv(spare) {
                    Ok(n) => n,
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(error) => {
                        self.fail_receive_direction(inner, pending, Error::from(error));
                        return;
                    }
                }
            };
            if n == 0 {
                self.handle_eof(inner, pending);
                return;
            }
            unsafe { segment.set_len(n) };
            self.total_bytes_received
                .fetch_add(n as u64, Ordering::Relaxed);
            let arrived = segment.freeze();

            if inner.state == Lifecycle::Upgrading {
                if let Some(upgrade) = inner.upgrade.as_mut() {
                    upgrade.incoming.append(arrived);
                }
                self.pump_handshake(inner, pending);
                continue;
            }

            if inner.encryption.is_some() && inner.state == Lifecycle::Established {
                let mut ciphertext = Blob::new();
                ciphertext.append(arrived);
                let mut plaintext = Blob::new();
                let decrypt = inner
                    .encryption
                    .as_mut()
                    .expect("encryption present")
                    .decrypt(&mut ciphertext, &mut plaintext);
                if let Err(error) = decrypt {
                    self.fail_receive_direction(inner, pending, error);
                    return;
                }
                inner.read_queue.buffer_mut().append_blob(&plaintext);
            } else {
                inner.read_queue.buffer_mut().append(arrived);
            }

            self.satisfy_receives(inner, pending);

            if inner.read_queue.crossed_high() {
                pending.push(Announcement::Event(StreamEvent::ReadQueueHighWatermark {
                    size: inner.read_queue.size(),
                }));
                inner.read_flow_applied = Some(FlowControlOrigin::Automatic);
                pending.push(Announcement::Event(StreamEvent::ReadQueueFlowControlApplied {
                    origin: FlowControlOrigin::Automatic,
                }));
                self.hide_readable_locked(inner);
                break;
            }
        }
    }

    // ===== shutdown =====

    /// Shuts down the socket in the given direction.
    ///
    /// A graceful send shutdown completes queued data first; an
    /// immediate one discards it. Events are announced in order:
    /// initiated, then send and/or receive as appropriate, then
    /// complete.
    pub fn shutdown(&self, direction: ShutdownDirection, mode: ShutdownMode) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, Lifecycle::Closing | Lifecycle::Closed) {
                return Err(Error::Invalid);
            }
            pending.push(Announcement::Event(StreamEvent::ShutdownInitiated));

            if direction == ShutdownDirection::Both {
                inner.shutdown_both_requested = true;
            }

            if matches!(direction, ShutdownDirection::Send | ShutdownDirection::Both)
                && !inner.shutdown_sent
                && !inner.shutdown_send_pending
            {
                if mode == ShutdownMode::Graceful && !inner.write_queue.is_empty() {
                    inner.shutdown_send_pending = true;
                    self.show_writable_locked(&mut inner);
                } else {
                    if mode == ShutdownMode::Immediate {
                        self.discard_write_queue(&mut inner, &mut pending);
                    }
                    self.finish_shutdown_send(&mut inner, &mut pending);
                }
            }

            if matches!(
                direction,
                ShutdownDirection::Receive | ShutdownDirection::Both
            ) && !inner.shutdown_received
            {
                if let Some(socket) = &inner.socket {
                    let _ = socket.shutdown(std::net::Shutdown::Read);
                }
                inner.shutdown_received = true;
                inner.eof_received = true;
                pending.push(Announcement::Event(StreamEvent::ShutdownReceive));
                self.satisfy_receives(&mut inner, &mut pending);
                self.complete_pending_receives_with_eof(&mut inner, &mut pending);
                self.hide_readable_locked(&mut inner);
                if direction == ShutdownDirection::Receive {
                    pending.push(Announcement::Event(StreamEvent::ShutdownComplete));
                }
            }

            self.update_shutdown_state(&mut inner);
            self.seal(&mut inner, &mut pending);
            Ok(())
        };
        self.dispatch();
        result
    }

    fn discard_write_queue(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        let size = inner.write_queue.size();
        if size == 0 {
            return;
        }
        for mut entry in inner.write_queue.take_all() {
            if let Some(timer) = entry.deadline.take() {
                timer.close();
            }
            if let Some(callback) = entry.callback.take() {
                let copied = entry.copied();
                pending.push(Announcement::Send(
                    callback,
                    Err(Error::Cancelled),
                    SendContext {
                        bytes_copied: copied,
                        token: entry.token,
                    },
                ));
            }
        }
        pending.push(Announcement::Event(StreamEvent::WriteQueueDiscarded { size }));
    }

    fn finish_shutdown_send(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        if inner.shutdown_sent {
            return;
        }
        if let Some(socket) = &inner.socket {
            let _ = socket.shutdown(std::net::Shutdown::Write);
        }
        inner.shutdown_sent = true;
        inner.shutdown_send_pending = false;
        pending.push(Announcement::Event(StreamEvent::ShutdownSend));
        if !inner.shutdown_both_requested || inner.shutdown_received {
            pending.push(Announcement::Event(StreamEvent::ShutdownComplete));
        }
        self.update_shutdown_state(inner);
    }

    fn update_shutdown_state(&self, inner: &mut Inner) {
        if matches!(inner.state, Lifecycle::Closing | Lifecycle::Closed) {
            return;
        }
        inner.state = match (inner.shutdown_sent, inner.shutdown_received) {
            (true, true) => Lifecycle::ShutdownBoth,
            (true, false) => Lifecycle::ShutdownSend,
            (false, true) => Lifecycle::ShutdownReceive,
            (false, false) => inner.state,
        };
    }

    // ===== upgrade and downgrade =====

    /// Upgrades the connection into an encryption session. The upgrade
    /// direction is taken from `options`, falling back to the session's
    /// role. Send and receive route through the session once the
    /// handshake completes; `callback` observes completion.
    pub fn upgrade(
        &self,
        encryption: Box<dyn Encryption>,
        options: &UpgradeOptions,
        callback: UpgradeCallback,
    ) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if inner.state != Lifecycle::Connected {
                return Err(Error::Invalid);
            }
            let role = options.role().unwrap_or_else(|| encryption.role());
            inner.encryption = Some(encryption);
            // Peer handshake bytes may already have been drained into the
            // read queue; they belong to the handshake.
            let buffered = inner.read_queue.size();
            let incoming = inner.read_queue.buffer_mut().split_to(buffered);
            inner.upgrade = Some(UpgradeState {
                callback: Some(callback),
                incoming,
                token: options.token(),
                deadline_timer: options.deadline().map(|deadline| {
                    self.deadline_timer(deadline, |socket| socket.upgrade_expired())
                }),
                handshake_bytes_sent: false,
            });
            inner.state = Lifecycle::Upgrading;
            pending.push(Announcement::Event(StreamEvent::UpgradeInitiated));
            trace!("upgrade initiated; role={:?}", role);

            // The connector speaks first; the acceptor's first step
            // usually produces nothing until peer bytes arrive.
            self.pump_handshake(&mut inner, &mut pending);
            self.show_readable_locked(&mut inner);
            self.seal(&mut inner, &mut pending);
            Ok(())
        };
        self.dispatch();
        result
    }

    fn pump_handshake(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        let step = {
            let upgrade = match inner.upgrade.as_mut() {
                Some(upgrade) => upgrade,
                None => return,
            };
            let encryption = match inner.encryption.as_mut() {
                Some(encryption) => encryption,
                None => return,
            };
            let mut outgoing = Blob::new();
            let result = encryption.handshake(&mut upgrade.incoming, &mut outgoing);
            (result, outgoing)
        };

        match step {
            (Ok(state), outgoing) => {
                if !outgoing.is_empty() {
                    self.enqueue_send(
                        inner,
                        Data::Blob(outgoing.clone()),
                        outgoing.length(),
                        &SendOptions::new(),
                        None,
                        true,
                        pending,
                    );
                }
                if state == HandshakeState::Established {
                    self.finish_upgrade(inner, pending);
                }
            }
            (Err(error), _) => {
                inner.encryption = None;
                inner.state = Lifecycle::Connected;
                if let Some(mut upgrade) = inner.upgrade.take() {
                    if let Some(timer) = upgrade.deadline_timer.take() {
                        timer.close();
                    }
                    if let Some(callback) = upgrade.callback.take() {
                        pending.push(Announcement::Upgrade(callback, Err(error)));
                    }
                }
            }
        }
    }

    fn finish_upgrade(&self, inner: &mut Inner, pending: &mut Vec<Announcement>) {
        inner.state = Lifecycle::Established;
        let leftover = match inner.upgrade.as_mut() {
            Some(upgrade) => std::mem::take(&mut upgrade.incoming),
            None => Blob::new(),
        };
        if let Some(mut upgrade) = inner.upgrade.take() {
            if let Some(timer) = upgrade.deadline_timer.take() {
                timer.close();
            }
            if let Some(callback) = upgrade.callback.take() {
                pending.push(Announcement::Upgrade(callback, Ok(())));
            }
        }
        pending.push(Announcement::Event(StreamEvent::UpgradeComplete));

        // Ciphertext that trailed the handshake bytes.
        if !leftover.is_empty() {
            let mut ciphertext = leftover;
            let mut plaintext = Blob::new();
            let decrypt = inner
                .encryption
                .as_mut()
                .expect("encryption present")
                .decrypt(&mut ciphertext, &mut plaintext);
            match decrypt {
                Ok(()) => {
                    inner.read_queue.buffer_mut().append_blob(&plaintext);
                    self.satisfy_receives(inner, pending);
                }
                Err(error) => {
                    self.fail_receive_direction(inner, pending, error);
                }
            }
        }

        // Application data staged while the handshake was in flight.
        let staged = std::mem::take(&mut inner.staged_sends);
        for (data, options, callback) in staged {
            match self.through_encryption(inner, data) {
                Ok(data) => {
                    let size = data.size();
                    self.enqueue_send(inner, data, size, &options, callback, false, pending);
                }
                Err(error) => {
                    if let Some(callback) = callback {
                        pending.push(Announcement::Send(
                            callback,
                            Err(error),
                            SendContext::default(),
                        ));
                    }
                }
            }
        }
    }

    fn upgrade_expired(&self) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != Lifecycle::Upgrading {
                return;
            }
            inner.encryption = None;
            inner.state = Lifecycle::Connected;
            if let Some(mut upgrade) = inner.upgrade.take() {
                if let Some(callback) = upgrade.callback.take() {
                    pending.push(Announcement::Upgrade(callback, Err(Error::WouldBlock)));
                }
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    /// Cleanly terminates the encryption session without closing the
    /// socket.
    pub fn downgrade(&self) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if inner.state != Lifecycle::Established {
                return Err(Error::Invalid);
            }
            pending.push(Announcement::Event(StreamEvent::DowngradeInitiated));
            let mut closing = Blob::new();
            let terminated = inner
                .encryption
                .as_mut()
                .map(|encryption| encryption.shutdown(&mut closing))
                .unwrap_or(Ok(()));
            let result = match terminated {
                Ok(()) => {
                    if !closing.is_empty() {
                        self.enqueue_send(
                            &mut inner,
                            Data::Blob(closing.clone()),
                            closing.length(),
                            &SendOptions::new(),
                            None,
                            true,
                            &mut pending,
                        );
                    }
                    inner.encryption = None;
                    inner.state = Lifecycle::Connected;
                    pending.push(Announcement::Event(StreamEvent::DowngradeComplete));
                    Ok(())
                }
                Err(error) => Err(error),
            };
            self.seal(&mut inner, &mut pending);
            result
        };
        self.dispatch();
        result
    }

    // ===== flow control =====

    /// Applies user flow control in the given direction: paused
    /// directions stop moving bytes between the queues and the OS.
    pub fn apply_flow_control(&self, direction: FlowControlDirection) -> Result<()> {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if matches!(
                direction,
                FlowControlDirection::Send | FlowControlDirection::Both
            ) && inner.write_flow_applied.is_none()
            {
                inner.write_flow_applied = Some(FlowControlOrigin::Manual);
                self.hide_writable_locked(&mut inner);
                pending.push(Announcement::Event(StreamEvent::WriteQueueFlowControlApplied {
                    origin: FlowControlOrigin::Manual,
                }));
            }
            if matches!(
                direction,
                FlowControlDirection::Receive | FlowControlDirection::Both
            ) && inner.read_flow_applied.is_none()
            {
                inner.read_flow_applied = Some(FlowControlOrigin::Manual);
                self.hide_readable_locked(&mut inner);
                pending.push(Announcement::Event(StreamEvent::ReadQueueFlowControlApplied {
                    origin: FlowControlOrigin::Manual,
                }));
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
        Ok(())
    }

    /// Relaxes previously applied flow control in the given direction.
    pub fn relax_flow_control(&self, direction: FlowControlDirection) -> Result<()> {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if matches!(
                direction,
                FlowControlDirection::Send | FlowControlDirection::Both
            ) && inner.write_flow_applied.is_some()
            {
                inner.write_flow_applied = None;
                if !inner.write_queue.is_empty() {
                    self.show_writable_locked(&mut inner);
                }
                pending.push(Announcement::Event(StreamEvent::WriteQueueFlowControlRelaxed));
            }
            if matches!(
                direction,
                FlowControlDirection::Receive | FlowControlDirection::Both
            ) && inner.read_flow_applied.is_some()
            {
                inner.read_flow_applied = None;
                if !inner.eof_received {
                    self.show_readable_locked(&mut inner);
                }
                pending.push(Announcement::Event(StreamEvent::ReadQueueFlowControlRelaxed));
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
        Ok(())
    }

    // ===== cancellation =====

    /// Cancels the pending operation carrying `token`.
    ///
    /// Cancellation is cooperative: an operation that has already passed
    /// its point of no return (a send or upgrade with bytes in the OS
    /// send buffer) fails the cancellation with [`Error::Invalid`] and
    /// completes normally. Cancelling a pending connect closes the
    /// socket; cancelling a send, receive, or upgrade does not.
    pub fn cancel(&self, token: CancelToken) -> Result<()> {
        let mut pending = Vec::new();
        let mut close_socket = false;
        let result = {
            let mut inner = self.inner.lock();

            let result = if inner
                .connect
                .as_ref()
                .map(|connect| connect.token == Some(token))
                .unwrap_or(false)
            {
                self.fail_connect(&mut inner, &mut pending, Error::Cancelled);
                close_socket = true;
                Ok(())
            } else if inner
                .upgrade
                .as_ref()
                .map(|upgrade| upgrade.token == Some(token))
                .unwrap_or(false)
            {
                let sent = inner
                    .upgrade
                    .as_ref()
                    .map(|upgrade| upgrade.handshake_bytes_sent)
                    .unwrap_or(false);
                if sent {
                    Err(Error::Invalid)
                } else {
                    inner.encryption = None;
                    inner.state = Lifecycle::Connected;
                    if let Some(mut upgrade) = inner.upgrade.take() {
                        if let Some(timer) = upgrade.deadline_timer.take() {
                            timer.close();
                        }
                        if let Some(callback) = upgrade.callback.take() {
                            pending.push(Announcement::Upgrade(callback, Err(Error::Cancelled)));
                        }
                    }
                    Ok(())
                }
            } else {
                match inner.write_queue.cancel(token) {
                    Cancelled::Removed(mut entry) => {
                        if let Some(timer) = entry.deadline.take() {
                            timer.close();
                        }
                        if let Some(callback) = entry.callback.take() {
                            pending.push(Announcement::Send(
                                callback,
                                Err(Error::Cancelled),
                                SendContext {
                                    bytes_copied: 0,
                                    token: entry.token,
                                },
                            ));
                        }
                        Ok(())
                    }
                    Cancelled::TooLate => Err(Error::Invalid),
                    Cancelled::NotFound => match inner.read_queue.cancel(token) {
                        Cancelled::Removed(mut entry) => {
                            if let Some(timer) = entry.deadline.take() {
                                timer.close();
                            }
                            if let Some(callback) = entry.callback.take() {
                                pending.push(Announcement::Receive(
                                    callback,
                                    Err(Error::Cancelled),
                                    ReceiveContext {
                                        data: Data::Undefined,
                                        bytes: 0,
                                        token: entry.token,
                                    },
                                ));
                            }
                            Ok(())
                        }
                        Cancelled::TooLate => Err(Error::Invalid),
                        Cancelled::NotFound => Err(Error::Invalid),
                    },
                }
            };
            self.seal(&mut inner, &mut pending);
            result
        };
        self.dispatch();
        if close_socket {
            self.close(None);
        }
        result
    }

    // ===== close =====

    /// Initiates an asynchronous close, discarding queued data.
    ///
    /// The socket is detached from the demultiplexer; `callback` (if
    /// given) is invoked after the detach has been announced and every
    /// in-flight announcement has drained. The object remains valid
    /// afterwards; every operation with a failure mode returns an error.
    pub fn close(&self, callback: Option<CloseCallback>) {
        let mut pending = Vec::new();
        let mut detach_handle = None;
        {
            let mut inner = self.inner.lock();
            match inner.state {
                Lifecycle::Closing => {
                    if let Some(callback) = callback {
                        inner.close_callbacks.push(callback);
                    }
                    return;
                }
                Lifecycle::Closed => {
                    if let Some(callback) = callback {
                        inner.announcements.push_back(Announcement::Close(callback));
                    }
                    drop(inner);
                    self.dispatch();
                    return;
                }
                _ => {}
            }
            inner.state = Lifecycle::Closing;
            if let Some(callback) = callback {
                inner.close_callbacks.push(callback);
            }

            if let Some(mut connect) = inner.connect.take() {
                if let Some(timer) = connect.deadline_timer.take() {
                    timer.close();
                }
                if let Some(callback) = connect.callback.take() {
                    pending.push(Announcement::Connect(callback, Err(Error::Cancelled)));
                }
            }
            if let Some(mut upgrade) = inner.upgrade.take() {
                if let Some(timer) = upgrade.deadline_timer.take() {
                    timer.close();
                }
                if let Some(callback) = upgrade.callback.take() {
                    pending.push(Announcement::Upgrade(callback, Err(Error::Cancelled)));
                }
            }
            inner.encryption = None;

            self.discard_write_queue(&mut inner, &mut pending);

            let dropped = inner.read_queue.discard_buffer();
            if dropped > 0 {
                pending.push(Announcement::Event(StreamEvent::ReadQueueDiscarded {
                    size: dropped,
                }));
            }
            self.complete_pending_receives_with_cancel(&mut inner, &mut pending);

            if inner.handle >= 0 {
                detach_handle = Some(inner.handle);
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();

        let weak = self.self_ref.clone();
        let finish = Box::new(move |_handle: Handle| {
            if let Some(socket) = weak.upgrade() {
                socket.finish_close();
            }
        });
        match detach_handle {
            Some(handle) => {
                if self.reactor.detach_socket(handle, Some(finish)).is_err() {
                    // Not attached (or already detaching): preserve the
                    // asynchronous contract through the deferred queue.
                    let weak = self.self_ref.clone();
                    self.reactor.execute(Box::new(move || {
                        if let Some(socket) = weak.upgrade() {
                            socket.finish_close();
                        }
                    }));
                }
            }
            None => {
                let weak = self.self_ref.clone();
                self.reactor.execute(Box::new(move || {
                    if let Some(socket) = weak.upgrade() {
                        socket.finish_close();
                    }
                }));
            }
        }
    }

    fn complete_pending_receives_with_cancel(
        &self,
        inner: &mut Inner,
        pending: &mut Vec<Announcement>,
    ) {
        for mut entry in inner.read_queue.take_entries() {
            if let Some(timer) = entry.deadline.take() {
                timer.close();
            }
            if let Some(callback) = entry.callback.take() {
                pending.push(Announcement::Receive(
                    callback,
                    Err(Error::Cancelled),
                    ReceiveContext {
                        data: Data::Undefined,
                        bytes: 0,
                        token: entry.token,
                    },
                ));
            }
        }
    }

    fn finish_close(&self) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state == Lifecycle::Closed {
                return;
            }
            inner.state = Lifecycle::Closed;
            // Dropping the owned socket closes the descriptor, including
            // one imported at open.
            inner.socket = None;
            inner.handle = crate::INVALID_HANDLE;
            pending.push(Announcement::SocketClosed);
            let callbacks: Vec<CloseCallback> = inner.close_callbacks.drain(..).collect();
            for callback in callbacks {
                pending.push(Announcement::Close(callback));
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }
}

fn dispatch_announcement(
    socket: Arc<StreamSocket>,
    session: Option<SessionTarget>,
    manager: Option<Arc<dyn StreamManager>>,
    announcement: Announcement,
) {
    match announcement {
        Announcement::Event(event) => dispatch_event(&socket, &session, &event),
        Announcement::Send(callback, result, context) => callback(result, context),
        Announcement::Receive(callback, result, context) => callback(result, context),
        Announcement::Connect(callback, result) => callback(result),
        Announcement::Upgrade(callback, result) => callback(result),
        Announcement::Close(callback) => callback(),
        Announcement::Established => {
            if let Some(manager) = &manager {
                manager.on_established(&socket);
            }
        }
        Announcement::SocketClosed => {
            if let Some(manager) = &manager {
                manager.on_closed(&socket);
            }
        }
    }
}

impl ReactorSocket for StreamSocket {
    fn handle(&self) -> Handle {
        self.inner.lock().handle
    }

    fn process_readable(&self, _event: &ReactorEvent) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, Lifecycle::Closing | Lifecycle::Closed) {
                return;
            }
            self.drain_receive_buffer(&mut inner, &mut pending);
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    fn process_writable(&self, _event: &ReactorEvent) {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, Lifecycle::Closing | Lifecycle::Closed) {
                return;
            }
            if inner.state == Lifecycle::Connecting {
                self.complete_connect(&mut inner, &mut pending);
            }
            if inner.state != Lifecycle::Connecting {
                self.drain_write_queue(&mut inner, &mut pending);
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    fn process_error(&self, event: &ReactorEvent) {
        let error = event.last_error().unwrap_or(Error::ConnectionDead);
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, Lifecycle::Closing | Lifecycle::Closed) {
                return;
            }
            if inner.state == Lifecycle::Connecting {
                self.retry_or_fail_connect(&mut inner, &mut pending, error);
            } else {
                self.fail_send_direction(&mut inner, &mut pending, error);
                inner.receive_error = Some(error);
                self.complete_pending_receives_with_cancel(&mut inner, &mut pending);
                self.hide_readable_locked(&mut inner);
            }
            self.seal(&mut inner, &mut pending);
        }
        self.dispatch();
    }

    fn process_notifications(&self, queue: &NotificationQueue) {
        trace!(
            "notifications; fd={} count={}",
            queue.handle(),
            queue.notifications().len()
        );
    }

    fn process_close_all(&self) {
        self.close(None);
    }
}

impl std::fmt::Debug for StreamSocket {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        fmt.debug_struct("StreamSocket")
            .field("handle", &inner.handle)
            .field("state", &inner.state)
            .field("source", &inner.source)
            .field("remote", &inner.remote)
            .field("write_queue", &inner.write_queue.size())
            .field("read_queue", &inner.read_queue.size())
            .finish()
    }
}
