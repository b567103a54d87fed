use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use log::trace;
use parking_lot::Mutex;
use socket2::{Domain, Socket, Type};

use crate::chronology::{Timer, TimerEvent, TimerOptions};
use crate::endpoint::{Endpoint, Transport};
use crate::error::{Error, Result};
use crate::event::ReactorEvent;
use crate::interest::EventOptions;
use crate::reactor::Reactor;
use crate::registry::ReactorSocket;
use crate::stream::{BindOptions, CloseCallback, StreamSocket, StreamSocketOptions};
use crate::token::CancelToken;
use crate::Handle;

/// Completion of an asynchronous accept.
pub type AcceptCallback = Box<dyn FnOnce(Result<Arc<StreamSocket>>) + Send>;

/// Configuration of a listener socket.
#[derive(Debug, Clone)]
pub struct ListenerSocketOptions {
    reuse_address: bool,
    backlog: i32,
    stream_options: StreamSocketOptions,
}

impl ListenerSocketOptions {
    /// Returns the default options.
    pub fn new() -> ListenerSocketOptions {
        ListenerSocketOptions::default()
    }

    /// Permits binding an address in `TIME_WAIT`.
    pub fn set_reuse_address(&mut self, reuse_address: bool) -> &mut Self {
        self.reuse_address = reuse_address;
        self
    }

    /// Sets the listen backlog.
    pub fn set_backlog(&mut self, backlog: i32) -> &mut Self {
        self.backlog = backlog;
        self
    }

    /// Sets the options applied to accepted stream sockets.
    pub fn set_stream_options(&mut self, options: StreamSocketOptions) -> &mut Self {
        self.stream_options = options;
        self
    }
}

impl Default for ListenerSocketOptions {
    fn default() -> ListenerSocketOptions {
        ListenerSocketOptions {
            reuse_address: true,
            backlog: 1024,
            stream_options: StreamSocketOptions::new(),
        }
    }
}

/// Options qualifying an accept.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptOptions {
    deadline: Option<Instant>,
    token: Option<CancelToken>,
}

impl AcceptOptions {
    /// Returns default accept options.
    pub fn new() -> AcceptOptions {
        AcceptOptions::default()
    }

    /// Sets the absolute deadline; an unsatisfied accept completes with
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Open,
    Bound,
    Listening,
    Closing,
    Closed,
}

struct AcceptEntry {
    id: u64,
    callback: Option<AcceptCallback>,
    deadline: Option<Arc<Timer>>,
    token: Option<CancelToken>,
}

struct ListenerInner {
    state: ListenerState,
    socket: Option<Socket>,
    handle: Handle,
    transport: Transport,
    source: Option<Endpoint>,
    options: ListenerSocketOptions,
    accept_queue: VecDeque<AcceptEntry>,
    ready: VecDeque<Socket>,
    shown_readable: bool,
    close_callbacks: Vec<CloseCallback>,
}

/// An accept-side stream socket.
///
/// Accepted connections surface as [`StreamSocket`]s carrying a reference
/// back to their acceptor.
pub struct ListenerSocket {
    reactor: Arc<Reactor>,
    self_ref: Weak<ListenerSocket>,
    inner: Mutex<ListenerInner>,
    entry_sequence: AtomicU64,
}

type Delivery = (AcceptCallback, Result<Arc<StreamSocket>>);

impl ListenerSocket {
    /// Opens a listener of the given transport.
    pub fn open(
        reactor: &Arc<Reactor>,
        transport: Transport,
        options: ListenerSocketOptions,
    ) -> Result<Arc<ListenerSocket>> {
        let domain = match transport {
            Transport::TcpIpv4 => Domain::IPV4,
            Transport::TcpIpv6 => Domain::IPV6,
            Transport::Local => Domain::UNIX,
        };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_nonblocking(true)?;
        if options.reuse_address {
            socket.set_reuse_address(true)?;
        }
        let handle = std::os::unix::io::AsRawFd::as_raw_fd(&socket);

        let this = Arc::new_cyclic(|weak| ListenerSocket {
            reactor: Arc::clone(reactor),
            self_ref: weak.clone(),
            inner: Mutex::new(ListenerInner {
                state: ListenerState::Open,
                socket: Some(socket),
                handle,
                transport,
                source: None,
                options,
                accept_queue: VecDeque::new(),
                ready: VecDeque::new(),
                shown_readable: false,
                close_callbacks: Vec::new(),
            }),
            entry_sequence: AtomicU64::new(1),
        });

        let as_reactor_socket: Arc<dyn ReactorSocket> = this.clone();
        reactor.attach_socket(&as_reactor_socket)?;
        Ok(this)
    }

    /// Returns the OS descriptor, or [`INVALID_HANDLE`] after close.
    ///
    /// [`INVALID_HANDLE`]: crate::INVALID_HANDLE
    pub fn handle(&self) -> Handle {
        self.inner.lock().handle
    }

    /// Returns the listener's transport.
    pub fn transport(&self) -> Transport {
        self.inner.lock().transport
    }

    /// Returns the bound source endpoint.
    pub fn source_endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().source.clone()
    }

    /// Binds the listener to a source endpoint.
    pub fn bind(&self, endpoint: &Endpoint, options: &BindOptions) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.state != ListenerState::Open {
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
        inner.state = ListenerState::Bound;
        Ok(())
    }

    /// Starts listening for connections.
    pub fn listen(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ListenerState::Bound {
            return Err(Error::Invalid);
        }
        let backlog = inner.options.backlog;
        let socket = inner.socket.as_ref().ok_or(Error::Invalid)?;
        socket.listen(backlog)?;
        inner.state = ListenerState::Listening;
        trace!("listening; fd={}", inner.handle);
        Ok(())
    }

    /// Accepts the next connection, delivering an established
    /// [`StreamSocket`] to `callback`.
    pub fn accept(&self, options: &AcceptOptions, callback: AcceptCallback) -> Result<()> {
        let mut deliveries: Vec<Delivery> = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if inner.state != ListenerState::Listening {
                return Err(Error::Invalid);
            }
            if let Some(ready) = inner.ready.pop_front() {
                let accepted = self.make_accepted(&inner, ready);
                deliveries.push((callback, accepted));
                Ok(())
            } else {
                let id = self.entry_sequence.fetch_add(1, Ordering::Relaxed);
                let deadline = options.deadline.map(|deadline| {
                    let weak = self.self_ref.clone();
                    let mut timer_options = TimerOptions::new();
                    timer_options.set_cancel_event(false).set_close_event(false);
                    let timer = self.reactor.create_timer(
                        timer_options,
                        Arc::new(move |_timer, event| {
                            if event == TimerEvent::Deadline {
                                if let Some(listener) = weak.upgrade() {
                                    listener.accept_expired(id);
                                }
                            }
                        }),
                    );
                    let _ = timer.schedule(deadline);
                    timer
                });
                inner.accept_queue.push_back(AcceptEntry {
                    id,
                    callback: Some(callback),
                    deadline,
                    token: options.token,
                });
                self.show_readable_locked(&mut inner);
                Ok(())
            }
        };
        deliver(deliveries);
        result
    }

    /// Cancels the pending accept carrying `token`.
    pub fn cancel(&self, token: CancelToken) -> Result<()> {
        let mut deliveries: Vec<Delivery> = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let index = inner
                .accept_queue
                .iter()
                .position(|entry| entry.token == Some(token));
            match index {
                Some(index) => {
                    let mut entry = inner.accept_queue.remove(index).expect("index in range");
                    if let Some(timer) = entry.deadline.take() {
                        timer.close();
                    }
                    if let Some(callback) = entry.callback.take() {
                        deliveries.push((callback, Err(Error::Cancelled)));
                    }
                    Ok(())
                }
                None => Err(Error::Invalid),
            }
        };
        deliver(deliveries);
        result
    }

    /// Initiates an asynchronous close. `callback` (if given) is invoked
    /// after the listener has been safely detached.
    pub fn close(&self, callback: Option<CloseCallback>) {
        let mut deliveries: Vec<Delivery> = Vec::new();
        let detach_handle = {
            let mut inner = self.inner.lock();
            match inner.state {
                ListenerState::Closing => {
                    if let Some(callback) = callback {
                        inner.close_callbacks.push(callback);
                    }
                    return;
                }
                ListenerState::Closed => {
                    drop(inner);
                    if let Some(callback) = callback {
                        callback();
                    }
                    return;
                }
                _ => {}
            }
            inner.state = ListenerState::Closing;
            if let Some(callback) = callback {
                inner.close_callbacks.push(callback);
            }
            for mut entry in std::mem::take(&mut inner.accept_queue) {
                if let Some(timer) = entry.deadline.take() {
                    timer.close();
                }
                if let Some(callback) = entry.callback.take() {
                    deliveries.push((callback, Err(Error::Cancelled)));
                }
            }
            inner.ready.clear();
            if inner.handle >= 0 {
                Some(inner.handle)
            } else {
                None
            }
        };
        deliver(deliveries);

        let weak = self.self_ref.clone();
        let finish = Box::new(move |_handle: Handle| {
            if let Some(listener) = weak.upgrade() {
                listener.finish_close();
            }
        });
        match detach_handle {
            Some(handle) => {
                if self.reactor.detach_socket(handle, Some(finish)).is_err() {
                    let weak = self.self_ref.clone();
                    self.reactor.execute(Box::new(move || {
                        if let Some(listener) = weak.upgrade() {
                            listener.finish_close();
                        }
                    }));
                }
            }
            None => {
                let weak = self.self_ref.clone();
                self.reactor.execute(Box::new(move || {
                    if let Some(listener) = weak.upgrade() {
                        listener.finish_close();
                    }
                }));
            }
        }
    }

    fn finish_close(&self) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state == ListenerState::Closed {
                return;
            }
            inner.state = ListenerState::Closed;
            inner.socket = None;
            inner.handle = crate::INVALID_HANDLE;
            std::mem::take(&mut inner.close_callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    fn accept_expired(&self, id: u64) {
        let mut deliveries: Vec<Delivery> = Vec::new();
        {
            let mut inner = self.inner.lock();
            let index = inner.accept_queue.iter().position(|entry| entry.id == id);
            if let Some(index) = index {
                let mut entry = inner.accept_queue.remove(index).expect("index in range");
                if let Some(callback) = entry.callback.take() {
                    deliveries.push((callback, Err(Error::WouldBlock)));
                }
            }
        }
        deliver(deliveries);
    }

    fn make_accepted(&self, inner: &ListenerInner, socket: Socket) -> Result<Arc<StreamSocket>> {
        let this = self.self_ref.upgrade().ok_or(Error::Invalid)?;
        StreamSocket::open_accepted(
            &self.reactor,
            socket,
            inner.options.stream_options.clone(),
            &this,
        )
    }

    fn show_readable_locked(&self, inner: &mut ListenerInner) {
        if !inner.shown_readable && inner.handle >= 0 {
            let _ = self
                .reactor
                .show_readable(inner.handle, &EventOptions::new());
            inner.shown_readable = true;
        }
    }

    fn hide_readable_locked(&self, inner: &mut ListenerInner) {
        if inner.shown_readable && inner.handle >= 0 {
            let _ = self.reactor.hide_readable(inner.handle);
            inner.shown_readable = false;
        }
    }
}

fn deliver(deliveries: Vec<Delivery>) {
    for (callback, result) in deliveries {
        callback(result);
    }
}

impl ReactorSocket for ListenerSocket {
    fn handle(&self) -> Handle {
        self.inner.lock().handle
    }

    fn process_readable(&self, _event: &ReactorEvent) {
        let mut deliveries: Vec<Delivery> = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.state != ListenerState::Listening {
                return;
            }
            loop {
                let socket = match inner.socket.as_ref() {
                    Some(socket) => socket,
                    None => break,
                };
                match socket.accept() {
                    Ok((accepted, _address)) => {
                        match inner.accept_queue.pop_front() {
                            Some(mut entry) => {
                                if let Some(timer) = entry.deadline.take() {
                                    timer.close();
                                }
                                let stream = self.make_accepted(inner, accepted);
                                if let Some(callback) = entry.callback.take() {
                                    deliveries.push((callback, stream));
                                }
                            }
                            None => {
                                inner.ready.push_back(accepted);
                            }
                        }
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(error) => {
                        let error = Error::from(error);
                        if let Some(mut entry) = inner.accept_queue.pop_front() {
                            if let Some(timer) = entry.deadline.take() {
                                timer.close();
                            }
                            if let Some(callback) = entry.callback.take() {
                                deliveries.push((callback, Err(error)));
                            }
                        }
                        break;
                    }
                }
            }
            if inner.accept_queue.is_empty() && !inner.ready.is_empty() {
                // Connections are waiting for the application; stop
                // accepting until it asks for them.
                self.hide_readable_locked(inner);
            }
        }
        deliver(deliveries);
    }

    fn process_writable(&self, _event: &ReactorEvent) {}

    fn process_error(&self, event: &ReactorEvent) {
        let error = event.last_error().unwrap_or(Error::ConnectionDead);
        let mut deliveries: Vec<Delivery> = Vec::new();
        {
            let mut inner = self.inner.lock();
            for mut entry in std::mem::take(&mut inner.accept_queue) {
                if let Some(timer) = entry.deadline.take() {
                    timer.close();
                }
                if let Some(callback) = entry.callback.take() {
                    deliveries.push((callback, Err(error)));
                }
            }
        }
        deliver(deliveries);
    }

    fn process_close_all(&self) {
        self.close(None);
    }
}

impl std::fmt::Debug for ListenerSocket {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        fmt.debug_struct("ListenerSocket")
            .field("handle", &inner.handle)
            .field("state", &inner.state)
            .field("source", &inner.source)
            .field("pending_accepts", &inner.accept_queue.len())
            .finish()
    }
}
