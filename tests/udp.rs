//! Real UDP sockets on the loopback interface

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use datagram_protocol::config::{NetworkConfig, TransportConfig, MAX_PACKET_SIZE};
use datagram_protocol::protocol::{Client, ClientEvent, ClientState, Server, ServerEvent};
use datagram_protocol::service::{run_client, run_server, ClientEndpoint, ServerCommand, ServerEndpoint};
use datagram_protocol::transport::udp::UdpTransport;
use datagram_protocol::transport::DatagramSocket;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// A loopback port that was free a moment ago.
fn free_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_datagrams_cross_the_loopback() {
    let mut a = UdpTransport::bind(loopback()).await.unwrap();
    let mut b = UdpTransport::bind(loopback()).await.unwrap();
    let b_addr = b.local_addr().unwrap();

    let mut buf = [0u8; 64];
    assert!(b.receive_datagram(&mut buf).unwrap().is_none());

    a.send_datagram(b_addr, b"ping").unwrap();
    timeout(Duration::from_secs(2), b.readable()).await.unwrap().unwrap();

    let (len, from) = b.receive_datagram(&mut buf).unwrap().unwrap();
    assert_eq!(&buf[..len], b"ping");
    assert_eq!(from, a.local_addr().unwrap());
}

#[tokio::test]
async fn test_endpoints_handshake_over_udp() {
    let config = NetworkConfig::default();
    let transport = TransportConfig::default();

    let server_socket = UdpTransport::bind(loopback()).await.unwrap();
    let server_addr = server_socket.local_addr().unwrap();
    let mut server = ServerEndpoint::new(server_socket, Server::new(&config.server, 5), &transport);

    let client_socket = UdpTransport::bind(loopback()).await.unwrap();
    let mut client = ClientEndpoint::new(client_socket, Client::new(config.client.timing(), 6), &transport);

    let start = Instant::now();
    let now = || start.elapsed().as_secs_f64();
    client.connect(server_addr, now()).unwrap();

    let mut server_events = Vec::new();
    while client.state() != ClientState::Connected {
        assert!(start.elapsed() < Duration::from_secs(5), "stuck in {}", client.state());
        client.tick(now()).unwrap();
        server_events.extend(server.tick(now()).unwrap());
        sleep(Duration::from_millis(5)).await;
    }
    server_events.extend(server.tick(now()).unwrap());

    assert_eq!(server.server().num_connected(), 1);
    assert!(server_events.iter().any(|event| matches!(
        event,
        ServerEvent::ClientConnected { address, .. } if *address == client.local_addr().unwrap()
    )));

    // fragmented on the way out, reassembled on the far side
    let data: Vec<u8> = (0..6000u32).map(|i| (i % 199) as u8).collect();
    client.send_payload(data.clone(), now()).unwrap();

    let mut received = None;
    while received.is_none() {
        assert!(start.elapsed() < Duration::from_secs(5), "payload never arrived");
        sleep(Duration::from_millis(5)).await;
        client.tick(now()).unwrap();
        received = server.tick(now()).unwrap().into_iter().find_map(|event| match event {
            ServerEvent::Payload { data, .. } => Some(data),
            _ => None,
        });
    }
    assert_eq!(received.unwrap(), data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runners_exchange_payloads() {
    let port = free_port();
    let mut config = NetworkConfig::default();
    config.server.address = format!("127.0.0.1:{port}");
    config.client.address = "127.0.0.1:0".to_string();
    config.client.server_address = format!("127.0.0.1:{port}");

    let shutdown = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::channel(16);
    let (server_event_tx, mut server_event_rx) = mpsc::channel(64);
    let server = tokio::spawn(run_server(
        config.clone(),
        command_rx,
        server_event_tx,
        shutdown.child_token(),
    ));
    // let the server bind before the first request goes out
    sleep(Duration::from_millis(50)).await;

    let (outbound_tx, outbound_rx) = mpsc::channel(16);
    let (client_event_tx, mut client_event_rx) = mpsc::channel(64);
    let client_shutdown = shutdown.child_token();
    let client = tokio::spawn(run_client(
        config,
        outbound_rx,
        client_event_tx,
        client_shutdown.clone(),
    ));

    let wait = Duration::from_secs(5);
    let client_index = timeout(wait, async {
        loop {
            match server_event_rx.recv().await {
                Some(ServerEvent::ClientConnected { client_index, .. }) => break client_index,
                Some(_) => continue,
                None => panic!("server stopped"),
            }
        }
    })
    .await
    .unwrap();

    timeout(wait, async {
        loop {
            match client_event_rx.recv().await {
                Some(ClientEvent::StateChanged { to: ClientState::Connected, .. }) => break,
                Some(_) => continue,
                None => panic!("client stopped"),
            }
        }
    })
    .await
    .unwrap();

    // too large to fragment: dropped without ending the session
    outbound_tx.send(vec![0u8; MAX_PACKET_SIZE]).await.unwrap();
    outbound_tx.send(b"hello server".to_vec()).await.unwrap();
    let upstream = timeout(wait, async {
        loop {
            if let Some(ServerEvent::Payload { data, .. }) = server_event_rx.recv().await {
                break data;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(upstream, b"hello server");

    command_tx
        .send(ServerCommand::Send {
            client_index,
            data: b"hello client".to_vec(),
        })
        .await
        .unwrap();
    let downstream = timeout(wait, async {
        loop {
            if let Some(ClientEvent::Payload(data)) = client_event_rx.recv().await {
                break data;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(downstream, b"hello client");

    client_shutdown.cancel();
    let final_state = timeout(wait, client).await.unwrap().unwrap().unwrap();
    assert_eq!(final_state, ClientState::Disconnected);

    shutdown.cancel();
    timeout(wait, server).await.unwrap().unwrap().unwrap();
}
