use rivulet::{
    Data, Error, FlowControlDirection, ReceiveOptions, SendOptions, StreamEvent,
    StreamSocketOptions,
};

mod util;

use util::{connected_pair_with, data_to_vec, wait_until, EventLog, Runner};

const HIGH: usize = 1024;
const LOW: usize = 256;
const CHUNK: usize = 64 * 1024;

// Fill the write queue past its high watermark while the peer is not
// reading, then let the peer drain and observe exactly one
// high-watermark announcement followed by exactly one low-watermark
// announcement.
#[test]
fn write_queue_watermarks_alternate() {
    let runner = Runner::start();

    let mut client_options = StreamSocketOptions::new();
    client_options.set_write_queue_watermarks(LOW, HIGH);
    let (client, server) =
        connected_pair_with(runner.reactor(), client_options, StreamSocketOptions::new());

    let events = EventLog::new();
    events.install(&client);

    // Stop the peer from draining so the kernel buffers, then the write
    // queue, fill up.
    server
        .apply_flow_control(FlowControlDirection::Receive)
        .expect("unable to pause server");

    let mut queued = 0usize;
    while client.write_queue_size() <= HIGH {
        match client.send(Data::from(vec![b'w'; CHUNK]), &SendOptions::new()) {
            Ok(()) => queued += CHUNK,
            Err(Error::WouldBlock) => break,
            Err(error) => panic!("send failed: {}", error),
        }
        assert!(queued < 256 * 1024 * 1024, "kernel buffers never filled");
    }

    wait_until("high watermark announcement", || {
        events.count(|event| matches!(event, StreamEvent::WriteQueueHighWatermark { .. })) == 1
    });

    // Once above the high watermark, further sends are refused
    // synchronously.
    wait_until("write queue above high watermark", || {
        client.write_queue_size() > HIGH
    });
    assert_eq!(
        client.send(Data::from("refused"), &SendOptions::new()),
        Err(Error::WouldBlock)
    );

    // Drain the peer; the write queue empties and announces low.
    server
        .relax_flow_control(FlowControlDirection::Receive)
        .expect("unable to resume server");

    drain_forever(&server);

    wait_until("low watermark announcement", || {
        events.count(|event| matches!(event, StreamEvent::WriteQueueLowWatermark { .. })) == 1
    });

    let sequence: Vec<&str> = events
        .snapshot()
        .iter()
        .filter_map(|event| match event {
            StreamEvent::WriteQueueHighWatermark { .. } => Some("high"),
            StreamEvent::WriteQueueLowWatermark { .. } => Some("low"),
            _ => None,
        })
        .collect();
    assert_eq!(sequence, vec!["high", "low"]);

    client.close(None);
    server.close(None);
}

// Keep a receive pending forever so arriving bytes are consumed.
fn drain_forever(socket: &std::sync::Arc<rivulet::StreamSocket>) {
    let weak = std::sync::Arc::downgrade(socket);
    let mut options = ReceiveOptions::new();
    options.set_size(1, usize::MAX);
    let _ = socket.receive_with(
        &options,
        Box::new(move |result, _context| {
            if result.is_ok() {
                if let Some(socket) = weak.upgrade() {
                    drain_forever(&socket);
                }
            }
        }),
    );
}

// The read queue applies automatic flow control above its high
// watermark and relaxes it at the low watermark.
#[test]
fn read_queue_watermarks_apply_flow_control() {
    let runner = Runner::start();

    let mut server_options = StreamSocketOptions::new();
    server_options.set_read_queue_watermarks(LOW, HIGH);
    let (client, server) =
        connected_pair_with(runner.reactor(), StreamSocketOptions::new(), server_options);

    let events = EventLog::new();
    events.install(&server);

    // Push well past the read queue high watermark with nobody reading.
    client
        .send(Data::from(vec![b'r'; 8 * HIGH]), &SendOptions::new())
        .expect("send failed");

    wait_until("read queue high watermark", || {
        events.count(|event| matches!(event, StreamEvent::ReadQueueHighWatermark { .. })) == 1
    });
    wait_until("automatic read flow control", || {
        events.count(|event| {
            matches!(
                event,
                StreamEvent::ReadQueueFlowControlApplied {
                    origin: rivulet::FlowControlOrigin::Automatic
                }
            )
        }) == 1
    });

    // Drain buffered bytes; the low watermark announcement re-arms
    // draining.
    wait_until("read queue drained to low watermark", || {
        let mut sink = Data::Undefined;
        let mut options = ReceiveOptions::new();
        options.set_size(1, HIGH / 2);
        match server.receive(&mut sink, &options) {
            Ok(bytes) => {
                assert!(!data_to_vec(&sink).is_empty() && bytes > 0);
            }
            Err(Error::WouldBlock) => {}
            Err(error) => panic!("receive failed: {}", error),
        }
        events.count(|event| matches!(event, StreamEvent::ReadQueueLowWatermark { .. })) == 1
    });

    wait_until("read flow control relaxed", || {
        events.count(|event| matches!(event, StreamEvent::ReadQueueFlowControlRelaxed)) == 1
    });

    client.close(None);
    server.close(None);
}
