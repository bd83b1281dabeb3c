//! End-to-end exchanges between the tunnel client and server over loopback UDP

use http_over_dns::{
    fragment, CapacityPlanner, ClientConfig, DnsTunnelClient, DnsTunnelServer, EchoHandler,
    PayloadHandler, Reassembler, ServerConfig, SessionId, SessionStore, TunnelError, TunnelServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

const DOMAIN: &str = "t.example.com";

fn planner() -> Arc<CapacityPlanner> {
    Arc::new(CapacityPlanner::with_domain(DOMAIN).unwrap())
}

fn client_config(server_addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        server_addr,
        query_timeout: Duration::from_millis(500),
        max_retries: 2,
        poll_interval: Duration::from_millis(10),
        poll_limit: 20,
    }
}

async fn spawn_server<H: PayloadHandler + 'static>(handler: H) -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let server = DnsTunnelServer::new(planner(), handler, ServerConfig::default());

    let handle = tokio::spawn(async move {
        let _ = server.serve(socket).await;
    });
    (addr, handle)
}

#[tokio::test]
async fn test_echo_small_payload() {
    let (addr, server) = spawn_server(EchoHandler).await;
    let mut client = assert_ok!(DnsTunnelClient::connect(planner(), client_config(addr)).await);

    let response = assert_ok!(client.exchange(b"hello world").await);
    assert_eq!(response, b"hello world");

    server.abort();
}

#[tokio::test]
async fn test_echo_multi_frame_payload() {
    let (addr, server) = spawn_server(EchoHandler).await;
    let mut client = assert_ok!(DnsTunnelClient::connect(planner(), client_config(addr)).await);

    // several frames in both directions
    let request: Vec<u8> = (0..2000u32).map(|i| (i * 7 % 251) as u8).collect();
    let response = assert_ok!(client.exchange(&request).await);
    assert_eq!(response, request);

    // the same client can go again, including with an empty payload
    let response = assert_ok!(client.exchange(b"").await);
    assert!(response.is_empty());

    server.abort();
}

#[tokio::test]
async fn test_handler_transforms_payload() {
    let upper = |_: SessionId, request: Vec<u8>| -> http_over_dns::Result<Vec<u8>> {
        Ok(request.to_ascii_uppercase())
    };
    let (addr, server) = spawn_server(upper).await;
    let mut client = assert_ok!(DnsTunnelClient::connect(planner(), client_config(addr)).await);

    let response = assert_ok!(client.exchange(b"get / http/1.1").await);
    assert_eq!(response, b"GET / HTTP/1.1");

    server.abort();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (addr, server) = spawn_server(EchoHandler).await;

    let tasks: Vec<_> = (0..8u8)
        .map(|i| {
            tokio::spawn(async move {
                let mut client = DnsTunnelClient::connect(planner(), client_config(addr))
                    .await
                    .unwrap();
                let request = vec![i; 300 + i as usize * 50];
                // distinct session ids so the clients never share state
                let response = client.exchange_in(i, &request).await.unwrap();
                assert_eq!(response, request);
            })
        })
        .collect();

    for task in tasks {
        assert_ok!(task.await);
    }

    server.abort();
}

#[tokio::test]
async fn test_client_gives_up_without_server() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = client_config(silent.local_addr().unwrap());
    config.query_timeout = Duration::from_millis(20);
    config.max_retries = 0;

    let mut client = DnsTunnelClient::connect(planner(), config).await.unwrap();
    let err = assert_err!(client.exchange(b"anyone?").await);
    assert!(matches!(err, TunnelError::Timeout(_)));
}

#[test]
fn test_core_handles_shuffled_uplink() {
    let planner = planner();
    let server = TunnelServer::new(planner.clone(), EchoHandler);
    let codec = server.codec().clone();

    let request = vec![0x42u8; planner.uplink_capacity() * 2 + 3];
    let mut frames = fragment(11, &request, planner.uplink_capacity()).unwrap();
    frames.reverse();
    frames.push(frames[2].clone());

    for (id, frame) in frames.iter().enumerate() {
        let query = codec.to_query(frame, id as u16).unwrap().encode().unwrap();
        assert!(server.respond(&query).is_some());
    }

    let retrieve = codec
        .to_query(&http_over_dns::TunnelFrame::retrieve(11, 0), 99)
        .unwrap()
        .encode()
        .unwrap();
    let response = server.respond(&retrieve).unwrap();
    let (message, _) = http_over_dns::Message::decode(&response, 0).unwrap();
    let frame = codec.from_response(&message).unwrap().unwrap();

    let store = SessionStore::new();
    let downlink = Reassembler::new(planner.resource_record_capacity());
    assert_eq!(downlink.reassemble(&store, frame).unwrap(), Some(request));
}

#[test]
fn test_server_core_from_blocking_context() {
    // the async server can also be driven without #[tokio::test]
    tokio_test::block_on(async {
        let (addr, server) = spawn_server(EchoHandler).await;
        let mut client = DnsTunnelClient::connect(planner(), client_config(addr))
            .await
            .unwrap();
        assert_eq!(client.exchange(b"ping").await.unwrap(), b"ping");
        server.abort();
    });
}
