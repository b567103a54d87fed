use std::sync::mpsc::channel;
use std::sync::Arc;

use rivulet::{
    CloseGuard, Data, Error, ReceiveOptions, SendOptions, ShutdownDirection, ShutdownMode,
    StreamEvent,
};

mod util;

use util::{connected_pair, recv_within, wait_until, EventLog, Runner};

// After the peer shuts down writes, exactly one pending receive
// completes with end-of-stream and all subsequent receives complete
// synchronously with end-of-stream.
#[test]
fn peer_shutdown_is_observed_as_eof() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let (eof_tx, eof_rx) = channel();
    server
        .receive_with(
            &ReceiveOptions::new(),
            Box::new(move |result, _context| {
                eof_tx.send(result).unwrap();
            }),
        )
        .expect("unable to queue receive");

    client
        .shutdown(ShutdownDirection::Send, ShutdownMode::Graceful)
        .expect("shutdown failed");

    assert_eq!(recv_within(&eof_rx, "pending receive eof"), Err(Error::Eof));

    // Later receives fail synchronously.
    let mut sink = Data::Undefined;
    assert_eq!(
        server.receive(&mut sink, &ReceiveOptions::new()),
        Err(Error::Eof)
    );

    client.close(None);
    server.close(None);
}

// A graceful send shutdown completes queued data before the FIN: the
// peer still receives every byte.
#[test]
fn graceful_shutdown_flushes_queued_data() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let events = EventLog::new();
    events.install(&client);

    client
        .send(Data::from(vec![b'f'; 64 * 1024]), &SendOptions::new())
        .expect("send failed");
    client
        .shutdown(ShutdownDirection::Send, ShutdownMode::Graceful)
        .expect("shutdown failed");

    let (received_tx, received_rx) = channel();
    let mut options = ReceiveOptions::new();
    options.set_size(64 * 1024, 64 * 1024);
    server
        .receive_with(
            &options,
            Box::new(move |result, context| {
                received_tx.send((result, context.bytes)).unwrap();
            }),
        )
        .expect("unable to queue receive");

    let (result, bytes) = recv_within(&received_rx, "flushed bytes");
    result.expect("receive failed");
    assert_eq!(bytes, 64 * 1024);

    // After the flush, the peer observes end-of-stream.
    let (eof_tx, eof_rx) = channel();
    server
        .receive_with(
            &ReceiveOptions::new(),
            Box::new(move |result, _context| eof_tx.send(result).unwrap()),
        )
        .expect("unable to queue receive");
    assert_eq!(recv_within(&eof_rx, "eof after flush"), Err(Error::Eof));

    wait_until("shutdown event sequence", || {
        let events = events.snapshot();
        let initiated = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ShutdownInitiated));
        let send = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ShutdownSend));
        let complete = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ShutdownComplete));
        matches!((initiated, send, complete), (Some(i), Some(s), Some(c)) if i < s && s < c)
    });

    // Sends after a send-side shutdown fail with end-of-stream.
    assert_eq!(
        client.send(Data::from("late"), &SendOptions::new()),
        Err(Error::Eof)
    );

    client.close(None);
    server.close(None);
}

// Closing is asynchronous and idempotent; the object stays valid and
// every operation with a failure mode returns an error afterwards.
#[test]
fn close_retires_the_socket() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let (closed_tx, closed_rx) = channel();
    client.close(Some(Box::new(move || closed_tx.send(()).unwrap())));
    recv_within(&closed_rx, "close completion");

    assert_eq!(client.handle(), rivulet::INVALID_HANDLE);
    assert_eq!(
        client.send(Data::from("dead"), &SendOptions::new()),
        Err(Error::Invalid)
    );
    let mut sink = Data::Undefined;
    assert_eq!(
        client.receive(&mut sink, &ReceiveOptions::new()),
        Err(Error::Invalid)
    );
    assert_eq!(
        client
            .shutdown(ShutdownDirection::Both, ShutdownMode::Immediate)
            .unwrap_err(),
        Error::Invalid
    );

    // Closing again completes promptly.
    let (again_tx, again_rx) = channel();
    client.close(Some(Box::new(move || again_tx.send(()).unwrap())));
    recv_within(&again_rx, "second close completion");

    server.close(None);
}

// The close guard blocks scope exit until the asynchronous close has
// completed.
#[test]
fn close_guard_blocks_until_closed() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    {
        let guard = CloseGuard::new(Arc::clone(&client));
        assert!(guard.socket().is_some());
    }
    assert_eq!(client.state(), rivulet::Lifecycle::Closed);

    // A released guard leaves the socket open.
    let guard = CloseGuard::new(Arc::clone(&server));
    let released = guard.release().expect("socket present");
    assert_ne!(released.state(), rivulet::Lifecycle::Closed);
    released.close(None);
}
