use std::sync::mpsc::channel;

use bytes::Bytes;
use rivulet::{
    Blob, Data, Encryption, EncryptionRole, Error, HandshakeState, ReceiveOptions, Result,
    SendOptions, StreamEvent,
};

mod util;

use util::{connected_pair, data_to_vec, recv_within, wait_until, EventLog, Runner};

const CLIENT_HELLO: &[u8] = b"xor-cipher:client-hello";
const SERVER_HELLO: &[u8] = b"xor-cipher:server-hello";
const KEY: u8 = 0x5a;

/// An in-memory stand-in for a real encryption session: a fixed-greeting
/// handshake and a byte-wise XOR transform.
struct XorCipher {
    role: EncryptionRole,
    sent_hello: bool,
}

impl XorCipher {
    fn client() -> Box<XorCipher> {
        Box::new(XorCipher {
            role: EncryptionRole::Client,
            sent_hello: false,
        })
    }

    fn server() -> Box<XorCipher> {
        Box::new(XorCipher {
            role: EncryptionRole::Server,
            sent_hello: false,
        })
    }
}

fn transform(source: &mut Blob, dest: &mut Blob) {
    let bytes: Vec<u8> = source.to_vec().iter().map(|byte| byte ^ KEY).collect();
    source.pop_front(source.length());
    dest.append(Bytes::from(bytes));
}

impl Encryption for XorCipher {
    fn role(&self) -> EncryptionRole {
        self.role
    }

    fn handshake(&mut self, incoming: &mut Blob, outgoing: &mut Blob) -> Result<HandshakeState> {
        match self.role {
            EncryptionRole::Client => {
                if !self.sent_hello {
                    outgoing.extend_from_slice(CLIENT_HELLO);
                    self.sent_hello = true;
                }
                if incoming.length() >= SERVER_HELLO.len() {
                    let greeting = incoming.split_to(SERVER_HELLO.len());
                    if greeting.to_vec() != SERVER_HELLO {
                        return Err(Error::Invalid);
                    }
                    return Ok(HandshakeState::Established);
                }
                Ok(HandshakeState::InProgress)
            }
            EncryptionRole::Server => {
                if incoming.length() >= CLIENT_HELLO.len() {
                    let greeting = incoming.split_to(CLIENT_HELLO.len());
                    if greeting.to_vec() != CLIENT_HELLO {
                        return Err(Error::Invalid);
                    }
                    outgoing.extend_from_slice(SERVER_HELLO);
                    return Ok(HandshakeState::Established);
                }
                Ok(HandshakeState::InProgress)
            }
        }
    }

    fn encrypt(&mut self, plaintext: &mut Blob, ciphertext: &mut Blob) -> Result<()> {
        transform(plaintext, ciphertext);
        Ok(())
    }

    fn decrypt(&mut self, ciphertext: &mut Blob, plaintext: &mut Blob) -> Result<()> {
        transform(ciphertext, plaintext);
        Ok(())
    }

    fn shutdown(&mut self, _outgoing: &mut Blob) -> Result<()> {
        Ok(())
    }
}

#[test]
fn upgrade_routes_data_through_the_session() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let client_events = EventLog::new();
    client_events.install(&client);

    // The acceptor upgrades first so the connector's hello finds a
    // handshake in progress.
    let (server_upgraded_tx, server_upgraded_rx) = channel();
    server
        .upgrade(
            XorCipher::server(),
            &rivulet::UpgradeOptions::new(),
            Box::new(move |result| server_upgraded_tx.send(result).unwrap()),
        )
        .expect("server upgrade failed");

    let (client_upgraded_tx, client_upgraded_rx) = channel();
    client
        .upgrade(
            XorCipher::client(),
            &rivulet::UpgradeOptions::new(),
            Box::new(move |result| client_upgraded_tx.send(result).unwrap()),
        )
        .expect("client upgrade failed");

    recv_within(&server_upgraded_rx, "server upgrade").expect("server handshake failed");
    recv_within(&client_upgraded_rx, "client upgrade").expect("client handshake failed");

    assert_eq!(client.state(), rivulet::Lifecycle::Established);
    assert_eq!(server.state(), rivulet::Lifecycle::Established);

    wait_until("upgrade events", || {
        client_events.count(|e| matches!(e, StreamEvent::UpgradeInitiated)) == 1
            && client_events.count(|e| matches!(e, StreamEvent::UpgradeComplete)) == 1
    });

    // Application data crosses the session transparently.
    client
        .send(Data::from("a confidential payload"), &SendOptions::new())
        .expect("send failed");

    let (received_tx, received_rx) = channel();
    let mut options = ReceiveOptions::new();
    options.set_size("a confidential payload".len(), usize::MAX);
    server
        .receive_with(
            &options,
            Box::new(move |result, context| {
                result.expect("receive failed");
                received_tx.send(data_to_vec(&context.data)).unwrap();
            }),
        )
        .expect("unable to queue receive");

    assert_eq!(
        recv_within(&received_rx, "decrypted payload"),
        b"a confidential payload"
    );

    client.close(None);
    server.close(None);
}

#[test]
fn downgrade_terminates_the_session_without_closing() {
    let runner = Runner::start();
    let (client, server) = connected_pair(runner.reactor());

    let (server_upgraded_tx, server_upgraded_rx) = channel();
    server
        .upgrade(
            XorCipher::server(),
            &rivulet::UpgradeOptions::new(),
            Box::new(move |result| server_upgraded_tx.send(result).unwrap()),
        )
        .expect("server upgrade failed");
    let (client_upgraded_tx, client_upgraded_rx) = channel();
    client
        .upgrade(
            XorCipher::client(),
            &rivulet::UpgradeOptions::new(),
            Box::new(move |result| client_upgraded_tx.send(result).unwrap()),
        )
        .expect("client upgrade failed");
    recv_within(&server_upgraded_rx, "server upgrade").expect("server handshake failed");
    recv_within(&client_upgraded_rx, "client upgrade").expect("client handshake failed");

    let events = EventLog::new();
    events.install(&client);

    client.downgrade().expect("client downgrade failed");
    server.downgrade().expect("server downgrade failed");
    assert_eq!(client.state(), rivulet::Lifecycle::Connected);

    wait_until("downgrade events", || {
        events.count(|e| matches!(e, StreamEvent::DowngradeInitiated)) == 1
            && events.count(|e| matches!(e, StreamEvent::DowngradeComplete)) == 1
    });

    // Plaintext flows again.
    client
        .send(Data::from("in the clear"), &SendOptions::new())
        .expect("send failed");

    let (received_tx, received_rx) = channel();
    let mut options = ReceiveOptions::new();
    options.set_size("in the clear".len(), usize::MAX);
    server
        .receive_with(
            &options,
            Box::new(move |result, context| {
                result.expect("receive failed");
                received_tx.send(data_to_vec(&context.data)).unwrap();
            }),
        )
        .expect("unable to queue receive");
    assert_eq!(recv_within(&received_rx, "plaintext payload"), b"in the clear");

    client.close(None);
    server.close(None);
}
