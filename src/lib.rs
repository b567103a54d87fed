//! An asynchronous network I/O framework centered on connection-oriented
//! streaming sockets.
//!
//! Rivulet provides a uniform asynchronous programming model over
//! readiness-based operating system primitives without exposing the
//! backend choice to application code. The core is four tightly coupled
//! subsystems:
//!
//! * [`Reactor`] — the event demultiplexer: the loop that waits on
//!   descriptor readiness, dispatches it, and coordinates multi-threaded
//!   waiter progress, detachment safety, and delivery modes.
//! * [`StreamSocket`] — the stream-socket engine: the ordered, atomic
//!   write queue; the prefix-match read queue; shutdown sequencing;
//!   optional encryption upgrade; timeouts and cancellation.
//! * [`registry`] — the descriptor registry: the mapping from OS
//!   descriptors to per-socket interest, callbacks, and processing
//!   state, including the protocol for safely detaching a descriptor
//!   while events may be in flight.
//! * [`Chronology`] — the monotonic timer schedule and deferred-work
//!   FIFO integrated with the demultiplexer loop.
//!
//! # Examples
//!
//! An echo client against a listener on loopback:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rivulet::{
//!     ConnectOptions, Data, Endpoint, ListenerSocket, ListenerSocketOptions, Reactor,
//!     ReactorConfig, SendOptions, StreamSocket, StreamSocketOptions, Transport, WaiterOptions,
//! };
//!
//! fn main() -> rivulet::Result<()> {
//!     let reactor = Arc::new(Reactor::new(ReactorConfig::new())?);
//!
//!     let listener = ListenerSocket::open(
//!         &reactor,
//!         Transport::TcpIpv4,
//!         ListenerSocketOptions::new(),
//!     )?;
//!     listener.bind(&"127.0.0.1:0".parse()?, &Default::default())?;
//!     listener.listen()?;
//!     listener.accept(&Default::default(), Box::new(|result| {
//!         let server = result.expect("accept failed");
//!         println!("accepted from {:?}", server.remote_endpoint());
//!     }))?;
//!
//!     let client = StreamSocket::open(
//!         &reactor,
//!         Transport::TcpIpv4,
//!         StreamSocketOptions::new(),
//!     )?;
//!     let remote = listener.source_endpoint().unwrap();
//!     client.connect(&remote, &ConnectOptions::new(), Box::new(|result| {
//!         result.expect("connect failed");
//!     }))?;
//!     client.send(Data::from("Hello, server!"), &SendOptions::new())?;
//!
//!     let mut waiter = reactor.register_waiter(WaiterOptions::new());
//!     reactor.run(&mut waiter);
//!     Ok(())
//! }
//! ```

#![cfg(unix)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs)]

/// An opaque integer naming an OS socket descriptor.
pub type Handle = std::os::unix::io::RawFd;

/// The handle value denoting "no descriptor".
pub const INVALID_HANDLE: Handle = -1;

mod chronology;
mod controller;
mod crypto;
mod data;
mod endpoint;
mod error;
mod event;
mod guard;
mod interest;
mod listener;
mod pace;
mod reactor;
pub mod registry;
mod resolve;
mod strand;
mod stream;
mod sync;
mod sys;
mod token;

pub use chronology::{
    Chronology, Timer, TimerCallback, TimerEvent, TimerOptions, TimerSession,
};
pub use controller::Controller;
pub use crypto::{Encryption, EncryptionRole, HandshakeState};
pub use data::{Blob, BlobFactory, Data, DefaultBlobFactory, FileRegion};
pub use endpoint::{Endpoint, Transport};
pub use error::{Error, Result};
pub use event::{Notification, NotificationQueue, ReactorEvent, ReactorEventKind};
pub use guard::CloseGuard;
pub use interest::{EventOptions, Interest, Trigger, Want};
pub use listener::{AcceptCallback, AcceptOptions, ListenerSocket, ListenerSocketOptions};
pub use pace::{Acquire, RateLimiter};
pub use reactor::{Reactor, ReactorConfig, Waiter, WaiterOptions};
pub use resolve::{ResolveCallback, ResolveOptions, Resolver};
pub use strand::{Strand, Task};
pub use stream::{
    BindCallback, BindOptions, CloseCallback, ConnectCallback, ConnectOptions,
    FlowControlDirection, FlowControlOrigin, Lifecycle, ReceiveCallback, ReceiveContext,
    ReceiveOptions, SendCallback, SendContext, SendOptions, SessionCallback, ShutdownDirection,
    ShutdownMode, StreamEvent, StreamManager, StreamSession, StreamSocket, StreamSocketOptions,
    UpgradeCallback, UpgradeOptions,
};
pub use sys::Backend;
pub use token::CancelToken;
