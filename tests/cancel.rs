use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use rivulet::{
    CancelToken, Data, Error, FlowControlDirection, ReceiveOptions, SendOptions,
};

mod util;

use util::{connected_pair, recv_within, Runner};

// A send cancelled before any byte has entered the OS send buffer
// completes with `cancelled`.
#[test]
fn cancel_wins_before_any_byte_is_copied() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    // Pause transmission so the entry stays entirely un-copied.
    client
        .apply_flow_control(FlowControlDirection::Send)
        .expect("unable to pause sends");

    let token = CancelToken::next();
    let mut options = SendOptions::new();
    options.set_token(token);

    let (completed_tx, completed_rx) = channel();
    client
        .send_with(
            Data::from("never on the wire"),
            &options,
            Box::new(move |result, context| {
                completed_tx.send((result, context.bytes_copied)).unwrap();
            }),
        )
        .expect("send failed");
    assert!(client.write_queue_size() > 0);

    client.cancel(token).expect("cancel failed");
    let (result, copied) = recv_within(&completed_rx, "cancelled send");
    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(copied, 0);
    assert_eq!(client.write_queue_size(), 0);

    client.close(None);
    server.close(None);
}

// A send whose bytes have already entered the OS send buffer is past
// the point of no return; its cancellation fails with `invalid`.
#[test]
fn cancel_loses_after_bytes_are_copied() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let token = CancelToken::next();
    let mut options = SendOptions::new();
    options.set_token(token);

    let (completed_tx, completed_rx) = channel();
    client
        .send_with(
            Data::from("already copied"),
            &options,
            Box::new(move |result, _context| {
                completed_tx.send(result).unwrap();
            }),
        )
        .expect("send failed");

    // The send completed synchronously into the empty OS buffer.
    recv_within(&completed_rx, "send completion").expect("send failed");
    assert_eq!(client.cancel(token), Err(Error::Invalid));

    client.close(None);
    server.close(None);
}

// A pending receive cancels cleanly; bytes delivered to earlier
// completed receives are unaffected.
#[test]
fn cancel_pending_receive() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let token = CancelToken::next();
    let mut options = ReceiveOptions::new();
    options.set_size(1024, 1024);
    options.set_token(token);

    let (completed_tx, completed_rx) = channel();
    server
        .receive_with(
            &options,
            Box::new(move |result, _context| {
                completed_tx.send(result).unwrap();
            }),
        )
        .expect("unable to queue receive");

    server.cancel(token).expect("cancel failed");
    assert_eq!(
        recv_within(&completed_rx, "cancelled receive"),
        Err(Error::Cancelled)
    );

    // Cancelling the same token again finds nothing.
    assert_eq!(server.cancel(token), Err(Error::Invalid));

    client.close(None);
    server.close(None);
}

// An unsatisfied receive whose deadline arrives completes with
// `would-block`.
#[test]
fn receive_deadline_expires_as_would_block() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let mut options = ReceiveOptions::new();
    options.set_size(1, usize::MAX);
    options.set_deadline(Instant::now() + Duration::from_millis(100));

    let (completed_tx, completed_rx) = channel();
    server
        .receive_with(
            &options,
            Box::new(move |result, _context| {
                completed_tx.send(result).unwrap();
            }),
        )
        .expect("unable to queue receive");

    assert_eq!(
        recv_within(&completed_rx, "expired receive"),
        Err(Error::WouldBlock)
    );

    client.close(None);
    server.close(None);
}

// A queued send whose deadline arrives before any byte is copied
// completes with `would-block` and leaves the queue.
#[test]
fn send_deadline_expires_as_would_block() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    client
        .apply_flow_control(FlowControlDirection::Send)
        .expect("unable to pause sends");

    let mut options = SendOptions::new();
    options.set_deadline(Instant::now() + Duration::from_millis(100));

    let (completed_tx, completed_rx) = channel();
    client
        .send_with(
            Data::from("too late"),
            &options,
            Box::new(move |result, context| {
                completed_tx.send((result, context.bytes_copied)).unwrap();
            }),
        )
        .expect("send failed");

    let (result, copied) = recv_within(&completed_rx, "expired send");
    assert_eq!(result, Err(Error::WouldBlock));
    assert_eq!(copied, 0);
    assert_eq!(client.write_queue_size(), 0);

    client.close(None);
    server.close(None);
}
