//! Test utilities for Sockrelay integration tests
//!
//! Spawns proxy servers and upstream peers on ephemeral loopback ports.

#![allow(dead_code)]

use sockrelay::config::ServerConfig;
use sockrelay::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single step of a test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Server configuration for tests: loopback only, short waits
pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1".to_string(),
        port: 0,
        reject_wait_ms: 200,
        shutdown_grace_secs: 3,
        allow_loopback: true,
        ..ServerConfig::default()
    }
}

/// A proxy server running on its own task
pub struct TestProxy {
    pub addr: SocketAddr,
    pub server: Arc<Server>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<bool>,
}

impl TestProxy {
    /// Cancel the server and wait for `run` to return
    pub async fn stop(self) -> bool {
        self.shutdown.cancel();
        tokio::time::timeout(STEP_TIMEOUT, self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
    }
}

/// Bind and run a proxy server with `config`
pub async fn spawn_proxy(config: ServerConfig) -> TestProxy {
    let server = Arc::new(Server::bind(&config).await.unwrap());
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = {
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };
    TestProxy {
        addr,
        server,
        shutdown,
        handle,
    }
}

/// Upstream that echoes every byte and half-closes after the client does
pub async fn spawn_echo_upstream() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });
    addr
}

/// Upstream that reads until end of stream, then answers with a byte count
pub async fn spawn_counting_upstream() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut received = Vec::new();
                if stream.read_to_end(&mut received).await.is_ok() {
                    let answer = format!("got {}", received.len());
                    let _ = stream.write_all(answer.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            });
        }
    });
    addr
}

/// CONNECT request for an IPv4 target
pub fn ipv4_connect_request(target: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = target else {
        panic!("expected an IPv4 target");
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&v4.ip().octets());
    request.extend_from_slice(&v4.port().to_be_bytes());
    request
}

/// CONNECT request for a domain target
pub fn domain_connect_request(domain: &str, port: u16) -> Vec<u8> {
    let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    request.extend_from_slice(domain.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}

/// Read an IPv4 reply and return its code and bound address
pub async fn read_ipv4_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut reply = [0u8; 10];
    tokio::time::timeout(STEP_TIMEOUT, stream.read_exact(&mut reply))
        .await
        .expect("no reply")
        .unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[2], 0x00);
    assert_eq!(reply[3], 0x01);
    let ip = std::net::Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);
    let port = u16::from_be_bytes([reply[8], reply[9]]);
    (reply[1], SocketAddr::from((ip, port)))
}

/// Connect to the proxy and complete the no-auth greeting
pub async fn greet_no_auth(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await.unwrap();
    assert_eq!(selection, [0x05, 0x00]);
    stream
}

/// Open a tunnel to `target` and assert it succeeded
pub async fn open_tunnel(proxy: SocketAddr, target: SocketAddr) -> TcpStream {
    let mut stream = greet_no_auth(proxy).await;
    stream.write_all(&ipv4_connect_request(target)).await.unwrap();
    let (code, _) = read_ipv4_reply(&mut stream).await;
    assert_eq!(code, 0x00);
    stream
}

/// Read until end of stream or error, with a deadline
pub async fn read_until_closed(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut received = Vec::new();
    tokio::time::timeout(STEP_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("stream was not closed")?;
    Ok(received)
}
