use std::sync::mpsc::channel;

use rivulet::{
    Data, Error, ReceiveOptions, SendOptions, ShutdownDirection, ShutdownMode,
};

mod util;

use util::{connected_pair, data_to_vec, recv_within, Runner};

const CLIENT_GREETING: &[u8] = b"Hello, server!";
const SERVER_GREETING: &[u8] = b"Hello, client!";

#[test]
fn echo_pair() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    assert!(client.remote_endpoint().is_some());
    assert!(server.remote_endpoint().is_some());
    assert!(server.acceptor().is_none(), "listener already closed");

    // Client speaks first.
    client
        .send(Data::from(CLIENT_GREETING.to_vec()), &SendOptions::new())
        .expect("client send failed");

    let (server_rx_tx, server_rx) = channel();
    let mut options = ReceiveOptions::new();
    options.set_size(CLIENT_GREETING.len(), CLIENT_GREETING.len());
    server
        .receive_with(
            &options,
            Box::new(move |result, context| {
                server_rx_tx.send((result, data_to_vec(&context.data))).unwrap();
            }),
        )
        .expect("server receive failed");

    let (result, delivered) = recv_within(&server_rx, "server receive");
    result.expect("server receive completed with error");
    assert_eq!(delivered, CLIENT_GREETING);

    // Server answers.
    let (sent_tx, sent_rx) = channel();
    server
        .send_with(
            Data::from(SERVER_GREETING.to_vec()),
            &SendOptions::new(),
            Box::new(move |result, context| {
                sent_tx.send((result, context.bytes_copied)).unwrap();
            }),
        )
        .expect("server send failed");
    let (result, copied) = recv_within(&sent_rx, "server send completion");
    result.expect("server send completed with error");
    assert_eq!(copied, SERVER_GREETING.len());

    let (client_rx_tx, client_rx) = channel();
    let mut options = ReceiveOptions::new();
    options.set_size(SERVER_GREETING.len(), SERVER_GREETING.len());
    client
        .receive_with(
            &options,
            Box::new(move |result, context| {
                client_rx_tx.send((result, data_to_vec(&context.data))).unwrap();
            }),
        )
        .expect("client receive failed");
    let (result, delivered) = recv_within(&client_rx, "client receive");
    result.expect("client receive completed with error");
    assert_eq!(delivered, SERVER_GREETING);

    assert_eq!(client.total_bytes_sent(), CLIENT_GREETING.len() as u64);
    assert_eq!(client.total_bytes_received(), SERVER_GREETING.len() as u64);

    // Client shuts down its send direction; the server observes
    // end-of-stream on its next receive.
    client
        .shutdown(ShutdownDirection::Send, ShutdownMode::Graceful)
        .expect("client shutdown failed");

    let (eof_tx, eof_rx) = channel();
    server
        .receive_with(
            &ReceiveOptions::new(),
            Box::new(move |result, _context| {
                eof_tx.send(result).unwrap();
            }),
        )
        .expect("server eof receive failed");
    assert_eq!(recv_within(&eof_rx, "server eof"), Err(Error::Eof));

    // And symmetrically.
    server
        .shutdown(ShutdownDirection::Send, ShutdownMode::Graceful)
        .expect("server shutdown failed");

    let (eof_tx, eof_rx) = channel();
    client
        .receive_with(
            &ReceiveOptions::new(),
            Box::new(move |result, _context| {
                eof_tx.send(result).unwrap();
            }),
        )
        .expect("client eof receive failed");
    assert_eq!(recv_within(&eof_rx, "client eof"), Err(Error::Eof));

    let (closed_tx, closed_rx) = channel();
    let notify = closed_tx.clone();
    client.close(Some(Box::new(move || notify.send("client").unwrap())));
    server.close(Some(Box::new(move || closed_tx.send("server").unwrap())));
    let mut closed = vec![
        recv_within(&closed_rx, "first close"),
        recv_within(&closed_rx, "second close"),
    ];
    closed.sort_unstable();
    assert_eq!(closed, vec!["client", "server"]);
}

#[test]
fn random_payload_round_trips_intact() {
    use rand::RngCore;

    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let mut payload = vec![0u8; 100 * 1024];
    rand::rng().fill_bytes(&mut payload);

    client
        .send(Data::from(payload.clone()), &SendOptions::new())
        .expect("send failed");

    let (received_tx, received_rx) = channel();
    let mut options = ReceiveOptions::new();
    options.set_size(payload.len(), payload.len());
    server
        .receive_with(
            &options,
            Box::new(move |result, context| {
                result.expect("receive failed");
                received_tx.send(data_to_vec(&context.data)).unwrap();
            }),
        )
        .expect("unable to queue receive");

    assert_eq!(recv_within(&received_rx, "random payload"), payload);

    client.close(None);
    server.close(None);
}

#[test]
fn synchronous_receive_drains_buffered_bytes() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    client
        .send(Data::from("0123456789"), &SendOptions::new())
        .expect("send failed");

    util::wait_until("read queue to fill", || server.read_queue_size() >= 10);

    let mut delivered = Data::Undefined;
    let mut options = ReceiveOptions::new();
    options.set_size(4, 4);
    let bytes = server
        .receive(&mut delivered, &options)
        .expect("synchronous receive failed");
    assert_eq!(bytes, 4);
    assert_eq!(data_to_vec(&delivered), b"0123");

    // The remainder is still queued.
    assert_eq!(server.read_queue_size(), 6);

    let mut rest = Data::Undefined;
    let mut options = ReceiveOptions::new();
    options.set_size(1, usize::MAX);
    let bytes = server.receive(&mut rest, &options).expect("second receive");
    assert_eq!(bytes, 6);
    assert_eq!(data_to_vec(&rest), b"456789");

    // Nothing further is available.
    let mut empty = Data::Undefined;
    assert_eq!(
        server.receive(&mut empty, &ReceiveOptions::new()),
        Err(Error::WouldBlock)
    );

    client.close(None);
    server.close(None);
}
