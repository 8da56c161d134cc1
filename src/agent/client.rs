//! Control channel client used by backends and the sysadmin tool.

use futures_util::{SinkExt, StreamExt};
use rsa::RsaPrivateKey;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::control::auth::Credentials;
use crate::control::protocol::{ControlEvent, HostPayload, DEFAULT_SUBPROTOCOL};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("handshake rejected with status {0}")]
    Rejected(StatusCode),

    #[error("invalid header value: {0}")]
    Header(#[from] header::InvalidHeaderValue),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timed out waiting for the proxy")]
    Timeout,
}

/// How an agent reaches and identifies itself to the proxy.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Control endpoint, e.g. `ws://localhost:3001`.
    pub url: String,
    pub agent_id: String,
    pub private_key: RsaPrivateKey,
    pub subprotocol: String,
    pub origin: Option<String>,
}

impl AgentConfig {
    pub fn new(url: impl Into<String>, agent_id: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self {
            url: url.into(),
            agent_id: agent_id.into(),
            private_key,
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            origin: None,
        }
    }

    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// An authenticated control connection.
pub struct AgentClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    credentials: Credentials,
}

impl AgentClient {
    /// Open the control connection and complete the authenticated upgrade.
    pub async fn connect(config: &AgentConfig) -> Result<Self, AgentError> {
        let credentials = Credentials::signed(&config.agent_id, &config.private_key);

        let mut request = config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&credentials.to_authorization())?);
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&config.subprotocol)?);
        if let Some(origin) = &config.origin {
            headers.insert(header::ORIGIN, HeaderValue::from_str(origin)?);
        }

        let (stream, _response) = connect_async(request).await.map_err(|e| match e {
            tungstenite::Error::Http(response) => AgentError::Rejected(response.status()),
            other => AgentError::WebSocket(other),
        })?;

        tracing::debug!(agent_id = %config.agent_id, url = %config.url, "Connected to proxy control channel");
        Ok(Self { stream, credentials })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn send_event(&mut self, event: &ControlEvent) -> Result<(), AgentError> {
        let text = serde_json::to_string(event)?;
        self.send_text(text).await
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), AgentError> {
        let text: String = text.into();
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Advertise this backend (`webServer/open`).
    pub async fn register(&mut self, host: &HostPayload) -> Result<(), AgentError> {
        let event = ControlEvent::web_server_open(self.credentials.clone(), host)?;
        self.send_event(&event).await
    }

    /// Withdraw this backend (`webServer/close`). The proxy closes the connection.
    pub async fn deregister(&mut self) -> Result<(), AgentError> {
        let event = ControlEvent::web_server_close(self.credentials.clone());
        self.send_event(&event).await
    }

    /// Close the connection from our side.
    pub async fn close(mut self) -> Result<(), AgentError> {
        let frame = CloseFrame {
            code: WsCloseCode::Normal,
            reason: Utf8Bytes::from_static("agent shutdown"),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read until the proxy closes the connection. Returns its close code, or
    /// None when the stream ended without a close frame.
    pub async fn next_close(&mut self) -> Result<Option<u16>, AgentError> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Close(frame)) => return Ok(frame.map(|f| u16::from(f.code))),
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// `next_close` bounded by `timeout`.
    pub async fn next_close_within(&mut self, timeout: Duration) -> Result<Option<u16>, AgentError> {
        tokio::time::timeout(timeout, self.next_close())
            .await
            .map_err(|_| AgentError::Timeout)?
    }
}
