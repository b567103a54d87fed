use std::sync::mpsc::channel;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use rivulet::{Data, ReceiveOptions, SendOptions};

mod util;

use util::{connected_pair, data_to_vec, recv_within, Runner};

// Two threads send 1000-byte runs concurrently; the receiver's stream is
// one run followed by the other, never an interleaving.
#[test]
fn concurrent_sends_are_atomic() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let barrier = Arc::new(Barrier::new(2));
    let mut senders = Vec::new();
    for fill in [b'a', b'b'] {
        let socket = Arc::clone(&client);
        let barrier = Arc::clone(&barrier);
        senders.push(thread::spawn(move || {
            barrier.wait();
            socket
                .send(Data::from(vec![fill; 1000]), &SendOptions::new())
                .expect("send failed");
        }));
    }
    for sender in senders {
        sender.join().unwrap();
    }

    let (received_tx, received_rx) = channel();
    let mut options = ReceiveOptions::new();
    options.set_size(2000, 2000);
    server
        .receive_with(
            &options,
            Box::new(move |result, context| {
                result.expect("receive failed");
                received_tx.send(data_to_vec(&context.data)).unwrap();
            }),
        )
        .expect("unable to queue receive");

    let stream = recv_within(&received_rx, "2000 bytes");
    let a_then_b = [vec![b'a'; 1000], vec![b'b'; 1000]].concat();
    let b_then_a = [vec![b'b'; 1000], vec![b'a'; 1000]].concat();
    assert!(
        stream == a_then_b || stream == b_then_a,
        "received stream interleaves the two sends"
    );

    client.close(None);
    server.close(None);
}

// Send completions fire in the order the sends were initiated.
#[test]
fn send_completions_preserve_initiation_order() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = channel();

    const SENDS: usize = 32;
    for index in 0..SENDS {
        let order = Arc::clone(&order);
        let done = done_tx.clone();
        client
            .send_with(
                Data::from(vec![index as u8; 512]),
                &SendOptions::new(),
                Box::new(move |result, _context| {
                    result.expect("send failed");
                    order.lock().unwrap().push(index);
                    done.send(()).unwrap();
                }),
            )
            .expect("send failed");
    }
    for _ in 0..SENDS {
        recv_within(&done_rx, "send completion");
    }
    let completed = order.lock().unwrap().clone();
    assert_eq!(completed, (0..SENDS).collect::<Vec<_>>());

    client.close(None);
    server.close(None);
}

// Receive completions fire in the order the receives were initiated,
// and each delivery is a prefix of what remains.
#[test]
fn receive_completions_preserve_initiation_order() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let (received_tx, received_rx) = channel();
    for index in 0..4usize {
        let received = received_tx.clone();
        let mut options = ReceiveOptions::new();
        options.set_size(8, 8);
        server
            .receive_with(
                &options,
                Box::new(move |result, context| {
                    result.expect("receive failed");
                    received.send((index, data_to_vec(&context.data))).unwrap();
                }),
            )
            .expect("unable to queue receive");
    }

    client
        .send(
            Data::from(b"00000000111111112222222233333333".to_vec()),
            &SendOptions::new(),
        )
        .expect("send failed");

    for expected in 0..4usize {
        let (index, bytes) = recv_within(&received_rx, "ordered receive");
        assert_eq!(index, expected);
        assert_eq!(bytes, vec![b'0' + expected as u8; 8]);
    }

    client.close(None);
    server.close(None);
}
