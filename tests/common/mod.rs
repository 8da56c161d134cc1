//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use inteli_proxy::agent::{AgentClient, AgentConfig};
use inteli_proxy::control::auth::{generate_keypair, public_key_pem, CertStore};
use inteli_proxy::control::protocol::{HostPayload, HostTarget};
use inteli_proxy::{ProxyConfig, ProxyServer};
use rsa::RsaPrivateKey;

/// Key shared by every agent in a test binary.
pub fn agent_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(1024).unwrap())
}

/// A key no certificate store knows about.
pub fn rogue_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(1024).unwrap())
}

/// Certificate store in a temp dir with `agents` installed under `agent_key()`.
pub async fn cert_store(agents: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let store = CertStore::new(dir.path());
    let pem = public_key_pem(agent_key()).unwrap();
    for agent in agents {
        store.store_key(agent, &pem).await.unwrap();
    }
    dir
}

/// Loopback config on ephemeral ports with short timeouts.
pub fn test_config(certstore: &Path) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.gateway.bind_address = "127.0.0.1:0".into();
    config.control.bind_address = "127.0.0.1:0".into();
    config.auth.certstore_dir = certstore.to_path_buf();
    config.shutdown.close_timeout_ms = 500;
    config.timeouts.connect_secs = 1;
    config.timeouts.request_secs = 2;
    config
}

pub async fn start_proxy(config: ProxyConfig) -> ProxyServer {
    let mut server = ProxyServer::new(config);
    assert!(server.start().await.unwrap());
    server
}

pub fn agent_config(server: &ProxyServer, agent_id: &str) -> AgentConfig {
    let addr = server.control_addr().unwrap();
    AgentConfig::new(format!("ws://{}", addr), agent_id, agent_key().clone())
}

pub async fn connect_agent(server: &ProxyServer, agent_id: &str) -> AgentClient {
    AgentClient::connect(&agent_config(server, agent_id)).await.unwrap()
}

pub fn host(agent_id: &str, rule: &str, port: u16) -> HostPayload {
    HostPayload {
        host_id: agent_id.to_string(),
        version: "1.0.0".to_string(),
        rule: rule.to_string(),
        target: HostTarget {
            host: "127.0.0.1".to_string(),
            port,
        },
        options: None,
    }
}

/// Connect `agent_id`, register it and wait until the registry holds `expected` targets.
pub async fn register(server: &ProxyServer, agent_id: &str, rule: &str, port: u16, expected: usize) -> AgentClient {
    let mut agent = connect_agent(server, agent_id).await;
    agent.register(&host(agent_id, rule, port)).await.unwrap();
    let registry = server.registry().clone();
    wait_until(Duration::from_secs(2), || registry.len() == expected).await;
    agent
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Start a mock backend on an ephemeral port that answers every request with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_backend(move |_| body.to_string()).await
}

/// Start a mock backend that answers with the Host header it received.
pub async fn start_host_echo_backend() -> SocketAddr {
    start_backend(|head| {
        head.lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("host").then(|| value.trim().to_string())
            })
            .unwrap_or_default()
    })
    .await
}

/// Serve `respond(request head)` as a 200 text/plain body on an ephemeral port.
async fn start_backend<F>(respond: F) -> SocketAddr
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let body = respond(&String::from_utf8_lossy(&buf));
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A loopback port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
