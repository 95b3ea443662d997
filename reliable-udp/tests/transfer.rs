//! Integration tests for reliable data transfer.
//!
//! The sender is the passive side, as in the CLI: it listens, sends one or
//! more messages and closes.  The receiver connects and reads until the
//! sender's FIN.  Fault-injection tests wrap either side in a
//! [`LossyTransport`] with a fixed seed.

use std::net::SocketAddr;
use std::time::Duration;

use reliable_udp::{
    simulator::{LossyTransport, SimulatorConfig},
    Config, Connection, ConnectionState, Error, Socket, Transport, MSS,
};

const LIMIT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> Config {
    Config::default()
        .with_time_unit(Duration::from_millis(40))
        .with_recv_timeout(Some(Duration::from_secs(10)))
}

async fn socket() -> Socket {
    Socket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind loopback socket")
}

async fn lossy(config: SimulatorConfig) -> LossyTransport<Socket> {
    LossyTransport::new(socket().await, config)
}

/// Deterministic, non-repeating-looking test data.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

async fn open<S, C>(server: S, client: C, config: Config) -> (Connection<S>, Connection<C>)
where
    S: Transport + 'static,
    C: Transport + 'static,
{
    let server_addr = server.local_addr().unwrap();
    let mut server = Connection::new(server, config.clone()).unwrap();
    server.listen().unwrap();
    let accept = tokio::spawn(async move {
        server.accept().await.expect("server accept failed");
        server
    });

    let mut client = Connection::new(client, config).unwrap();
    client.connect(server_addr).await.expect("client connect failed");
    (accept.await.expect("server task panicked"), client)
}

/// Send `messages` from server to client, close both ends and return what the
/// client read.
///
/// The server runs accept, send and close in one task so the client can keep
/// answering repeated handshake segments while the server is still opening.
async fn transfer<S, C>(server: S, client: C, config: Config, messages: Vec<Vec<u8>>) -> Vec<u8>
where
    S: Transport + 'static,
    C: Transport + 'static,
{
    let server_addr = server.local_addr().unwrap();
    let mut server = Connection::new(server, config.clone()).unwrap();
    let mut client = Connection::new(client, config).unwrap();

    let run = async move {
        server.listen().unwrap();
        let sender = tokio::spawn(async move {
            server.accept().await.expect("server accept failed");
            for message in &messages {
                server.send(message).await.expect("send failed");
            }
            server.close().await.expect("server close failed");
            server
        });

        client.connect(server_addr).await.expect("client connect failed");
        let received = client.read_to_end().await.expect("read failed");
        client.close().await.expect("client close failed");
        let server = sender.await.expect("sender panicked");

        assert_eq!(server.state(), ConnectionState::Closed);
        assert_eq!(client.state(), ConnectionState::Closed);
        received
    };
    tokio::time::timeout(LIMIT, run)
        .await
        .expect("transfer timed out")
}

// ---------------------------------------------------------------------------
// Clean network
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_message() {
    let got = transfer(socket().await, socket().await, config(), vec![b"hello".to_vec()]).await;
    assert_eq!(got, b"hello");
}

/// 3000 bytes with W=3: segments of 1460, 1460 and 80 bytes.
#[tokio::test]
async fn single_window_stream() {
    let data = pattern(3000);
    let got = transfer(socket().await, socket().await, config(), vec![data.clone()]).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn multi_window_stream() {
    let data = pattern(200_000);
    let cfg = config().with_window_size(4);
    let got = transfer(socket().await, socket().await, cfg, vec![data.clone()]).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn stop_and_wait_window() {
    let data = pattern(10 * MSS + 17);
    let cfg = config().with_window_size(1);
    let got = transfer(socket().await, socket().await, cfg, vec![data.clone()]).await;
    assert_eq!(got, data);
}

/// A stream that is an exact multiple of MSS ends on the PSH flag, so one
/// `recv` call returns the whole message.
#[tokio::test]
async fn exact_mss_multiple_ends_on_push() {
    let data = pattern(2 * MSS);
    let (mut server, mut client) = open(socket().await, socket().await, config()).await;
    let expected = data.clone();
    let sender = tokio::spawn(async move {
        server.send(&data).await.unwrap();
        server
    });

    let mut buf = Vec::new();
    let n = tokio::time::timeout(LIMIT, client.recv(&mut buf, usize::MAX))
        .await
        .expect("recv timed out")
        .unwrap();
    assert_eq!(n, 2 * MSS);
    assert_eq!(buf, expected);

    let mut server = sender.await.unwrap();
    assert!(server.window().is_finished());
    assert_eq!(server.window().lar(), client.ack_number());

    let (a, b) = tokio::join!(server.close(), client.close());
    a.unwrap();
    b.unwrap();
}

/// A `recv` whose length runs out mid-message returns what fits; the next
/// call picks up where it stopped and the sender still completes.
#[tokio::test]
async fn recv_stops_at_requested_length() {
    let data = pattern(3 * MSS);
    let cfg = config().with_recv_timeout(Some(Duration::from_secs(3)));
    let (mut server, mut client) = open(socket().await, socket().await, cfg).await;
    let message = data.clone();
    let sender = tokio::spawn(async move {
        let sent = server.send(&message).await;
        (sent, server)
    });

    let mut buf = Vec::new();
    for round in 1..=3 {
        let n = tokio::time::timeout(LIMIT, client.recv(&mut buf, MSS))
            .await
            .expect("recv timed out")
            .unwrap();
        assert_eq!(n, MSS, "call {round}");
        assert_eq!(buf.len(), round * MSS);
    }
    assert_eq!(buf, data);

    let (sent, mut server) = tokio::time::timeout(LIMIT, sender)
        .await
        .expect("sender timed out")
        .unwrap();
    sent.unwrap();
    assert!(server.window().is_finished());

    let (a, b) = tokio::join!(server.close(), client.close());
    a.unwrap();
    b.unwrap();
}

/// A read that fills its length on a full segment stops there; the next
/// read returns the short tail of the same message.
#[tokio::test]
async fn partial_read_resumes_the_message() {
    let data = pattern(MSS + 100);
    let (mut server, mut client) = open(socket().await, socket().await, config()).await;
    let message = data.clone();
    let sender = tokio::spawn(async move {
        server.send(&message).await.unwrap();
        server
    });

    let mut buf = Vec::new();
    assert_eq!(client.recv(&mut buf, MSS).await.unwrap(), MSS);
    assert_eq!(client.recv(&mut buf, MSS).await.unwrap(), 100);
    assert_eq!(buf, data);

    let mut server = sender.await.unwrap();
    let (a, b) = tokio::join!(server.close(), client.close());
    a.unwrap();
    b.unwrap();
}

/// Each `send` is one message; each `recv` returns exactly one.
#[tokio::test]
async fn message_boundaries_are_kept() {
    let first = pattern(MSS + 5);
    let second = b"second".to_vec();
    let (mut server, mut client) = open(socket().await, socket().await, config()).await;
    let messages = vec![first.clone(), second.clone()];
    let sender = tokio::spawn(async move {
        for m in &messages {
            server.send(m).await.unwrap();
        }
        server.close().await.unwrap();
    });

    let mut a = Vec::new();
    let mut b = Vec::new();
    assert_eq!(client.recv(&mut a, usize::MAX).await.unwrap(), first.len());
    assert_eq!(client.recv(&mut b, usize::MAX).await.unwrap(), second.len());
    assert_eq!((a, b), (first, second));

    let mut rest = Vec::new();
    assert_eq!(client.recv(&mut rest, usize::MAX).await.unwrap(), 0);
    assert_eq!(client.state(), ConnectionState::LastAck);
    client.close().await.unwrap();
    sender.await.unwrap();
}

#[tokio::test]
async fn empty_send_is_rejected() {
    let (mut server, mut client) = open(socket().await, socket().await, config()).await;
    assert!(matches!(server.send(b"").await, Err(Error::CallerContract(_))));
    assert_eq!(server.state(), ConnectionState::Established);
    assert!(server.window().is_finished());

    let closer = tokio::spawn(async move {
        server.close().await.unwrap();
    });
    assert!(client.read_to_end().await.unwrap().is_empty());
    client.close().await.unwrap();
    closer.await.unwrap();
}

// ---------------------------------------------------------------------------
// Faulty network
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovers_from_data_loss() {
    let data = pattern(40_000);
    let sender = lossy(SimulatorConfig {
        loss_rate: 0.1,
        drop_sends: vec![3, 4],
        seed: 42,
        ..Default::default()
    })
    .await;
    let got = transfer(sender, socket().await, config(), vec![data.clone()]).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn recovers_from_ack_loss() {
    let data = pattern(30_000);
    let receiver = lossy(SimulatorConfig {
        loss_rate: 0.2,
        seed: 7,
        ..Default::default()
    })
    .await;
    let got = transfer(socket().await, receiver, config(), vec![data.clone()]).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn corrupted_segments_are_dropped_and_resent() {
    let data = pattern(30_000);
    let sender = lossy(SimulatorConfig {
        corrupt_rate: 0.1,
        seed: 3,
        ..Default::default()
    })
    .await;
    let got = transfer(sender, socket().await, config(), vec![data.clone()]).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn duplicated_datagrams_are_harmless() {
    let data = pattern(30_000);
    let sender = lossy(SimulatorConfig {
        duplicate_rate: 0.2,
        seed: 11,
        ..Default::default()
    })
    .await;
    let got = transfer(sender, socket().await, config(), vec![data.clone()]).await;
    assert_eq!(got, data);
}

/// A receiver that vanishes mid-stream makes the sender give up after the
/// configured number of fruitless retransmission rounds.
#[tokio::test]
async fn sender_gives_up_on_vanished_peer() {
    let cfg = config()
        .with_time_unit(Duration::from_millis(10))
        .with_max_retransmissions(2);
    let (mut server, client) = open(socket().await, socket().await, cfg).await;
    drop(client);

    let err = tokio::time::timeout(LIMIT, server.send(&pattern(5000)))
        .await
        .expect("send should give up on its own")
        .unwrap_err();
    assert!(matches!(err, Error::RetriesExceeded));
    assert_eq!(server.window().consecutive_timeouts(), 3);
}
