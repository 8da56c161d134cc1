//! Control message dispatch.
//!
//! # Responsibilities
//! - Decode the JSON envelope and re-verify its credential
//! - Apply `webServer` events to the target registry
//! - Apply `sysadmin` events to the certificate store
//! - Hand every other event type to the pluggable custom handler
//!
//! # Design Decisions
//! - Dispatch returns a `Resolution`; the session maps it to a close code
//! - Only genuine failures (bad JSON, I/O) surface as errors

use async_trait::async_trait;
use std::sync::Arc;

use crate::control::auth::{Authenticator, CertStore};
use crate::control::protocol::{
    CertPayload, CloseCode, ControlEvent, HostPayload, ACTION_ADD, ACTION_CLOSE, ACTION_OPEN, ACTION_REMOVE,
    TYPE_SYSADMIN, TYPE_WEB_SERVER,
};
use crate::control::ControlError;
use crate::load_balancer::{Target, TargetAddress, TargetRegistry};
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::routing::RouteRule;

/// Outcome of handling one control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handled; the connection stays open.
    Valid,
    /// The agent asked to close its registration.
    CloseRequested,
    /// Unknown action or unusable content.
    Invalid,
    /// The credential did not verify, or the agent lacks the privilege.
    Unauthorized,
}

impl Resolution {
    /// Close code to send, or None when the session continues.
    pub fn close_code(self) -> Option<CloseCode> {
        match self {
            Resolution::Valid => None,
            Resolution::CloseRequested => Some(CloseCode::Normal),
            Resolution::Invalid => Some(CloseCode::ProtocolError),
            Resolution::Unauthorized => Some(CloseCode::PolicyViolation),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Valid => "valid",
            Resolution::CloseRequested => "close",
            Resolution::Invalid => "invalid",
            Resolution::Unauthorized => "unauthorized",
        }
    }
}

/// What a custom handler may look at.
pub struct EventContext<'a> {
    pub connection_id: ConnectionId,
    pub registry: &'a TargetRegistry,
}

/// Handler for event types the proxy does not know.
#[async_trait]
pub trait CustomEventHandler: Send + Sync {
    async fn handle(&self, ctx: &EventContext<'_>, event: &ControlEvent) -> Result<Resolution, ControlError>;
}

/// Default custom handler: every unknown event is invalid.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectUnknownEvents;

#[async_trait]
impl CustomEventHandler for RejectUnknownEvents {
    async fn handle(&self, _ctx: &EventContext<'_>, _event: &ControlEvent) -> Result<Resolution, ControlError> {
        Ok(Resolution::Invalid)
    }
}

/// Routes decoded control events to the registry, the certificate store or
/// the custom handler.
pub struct EventDispatcher {
    registry: Arc<TargetRegistry>,
    authenticator: Arc<dyn Authenticator>,
    cert_store: CertStore,
    custom: Arc<dyn CustomEventHandler>,
    sysadmin_agent_id: String,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<TargetRegistry>,
        authenticator: Arc<dyn Authenticator>,
        cert_store: CertStore,
        sysadmin_agent_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            authenticator,
            cert_store,
            custom: Arc::new(RejectUnknownEvents),
            sysadmin_agent_id: sysadmin_agent_id.into(),
        }
    }

    /// Replace the handler for unknown event types.
    pub fn with_custom_handler(mut self, custom: Arc<dyn CustomEventHandler>) -> Self {
        self.custom = custom;
        self
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Handle one text frame received on `connection_id`.
    pub async fn dispatch(&self, connection_id: ConnectionId, text: &str) -> Result<Resolution, ControlError> {
        let event: ControlEvent = serde_json::from_str(text)?;

        if let Err(e) = self.authenticator.verify(&event.authentication).await {
            tracing::warn!(
                connection_id = %connection_id,
                agent_id = ?event.authentication.agent_id,
                error = %e,
                "Control message failed authentication"
            );
            metrics::record_control_event(metric_type(&event), Resolution::Unauthorized.as_str());
            return Ok(Resolution::Unauthorized);
        }

        let resolution = match event.header.event_type.as_str() {
            TYPE_WEB_SERVER => self.web_server(connection_id, &event)?,
            TYPE_SYSADMIN => self.sysadmin(connection_id, &event).await?,
            _ => {
                let ctx = EventContext {
                    connection_id,
                    registry: &self.registry,
                };
                self.custom.handle(&ctx, &event).await?
            }
        };
        metrics::record_control_event(metric_type(&event), resolution.as_str());
        Ok(resolution)
    }

    fn web_server(&self, connection_id: ConnectionId, event: &ControlEvent) -> Result<Resolution, ControlError> {
        match event.header.action.as_str() {
            ACTION_OPEN => {
                let host: HostPayload = event.payload_as().map_err(ControlError::Payload)?;
                let rule = match RouteRule::new(&host.rule) {
                    Ok(rule) => rule,
                    Err(e) => {
                        tracing::warn!(connection_id = %connection_id, rule = %host.rule, error = %e, "Rejecting unparseable rule");
                        return Ok(Resolution::Invalid);
                    }
                };
                let address = TargetAddress::new(host.target.host, host.target.port);
                if let Err(e) = address.base_url() {
                    tracing::warn!(connection_id = %connection_id, target = %address, error = %e, "Rejecting unroutable target");
                    return Ok(Resolution::Invalid);
                }
                let target = Target::new(host.host_id, rule, address, host.version);
                self.registry.add_host(connection_id, target);
                Ok(Resolution::Valid)
            }
            ACTION_CLOSE => Ok(Resolution::CloseRequested),
            _ => Ok(Resolution::Invalid),
        }
    }

    async fn sysadmin(&self, connection_id: ConnectionId, event: &ControlEvent) -> Result<Resolution, ControlError> {
        let agent_id = event.authentication.agent_id.as_deref().unwrap_or_default();
        if agent_id != self.sysadmin_agent_id {
            tracing::warn!(connection_id = %connection_id, agent_id = %agent_id, "Sysadmin event from non-sysadmin agent");
            return Ok(Resolution::Unauthorized);
        }

        match event.header.action.as_str() {
            ACTION_ADD => {
                let cert: CertPayload = event.payload_as().map_err(ControlError::Payload)?;
                let pem = cert.public_key.ok_or(ControlError::MissingPublicKey)?;
                let path = self.cert_store.store_key(&cert.host_id, &pem).await?;
                tracing::info!(host_id = %cert.host_id, path = ?path, "Public key added to certificate store");
                Ok(Resolution::Valid)
            }
            ACTION_REMOVE => {
                let cert: CertPayload = event.payload_as().map_err(ControlError::Payload)?;
                let path = self.cert_store.remove_key(&cert.host_id).await?;
                tracing::info!(host_id = %cert.host_id, path = ?path, "Public key removed from certificate store");
                Ok(Resolution::Valid)
            }
            _ => Ok(Resolution::Invalid),
        }
    }
}

/// Metric label for an event type; custom types share one label.
fn metric_type(event: &ControlEvent) -> &'static str {
    match event.header.event_type.as_str() {
        TYPE_WEB_SERVER => TYPE_WEB_SERVER,
        TYPE_SYSADMIN => TYPE_SYSADMIN,
        _ => "custom",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::auth::{generate_keypair, public_key_pem, CertStoreAuthenticator, Credentials};
    use rsa::RsaPrivateKey;
    use serde_json::json;
    use std::sync::OnceLock;

    fn key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| generate_keypair(1024).unwrap())
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: CertStore,
        registry: Arc<TargetRegistry>,
        dispatcher: EventDispatcher,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        let pem = public_key_pem(key()).unwrap();
        for agent in ["WEB001", "sysadmin"] {
            store.store_key(agent, &pem).await.unwrap();
        }
        let registry = Arc::new(TargetRegistry::default());
        let dispatcher = EventDispatcher::new(
            registry.clone(),
            Arc::new(CertStoreAuthenticator::new(store.clone())),
            store.clone(),
            "sysadmin",
        );
        Fixture {
            _dir: dir,
            store,
            registry,
            dispatcher,
        }
    }

    fn open_event(agent: &str, rule: &str, port: u16) -> String {
        json!({
            "header": { "type": "webServer", "action": "open" },
            "authentication": Credentials::signed(agent, key()),
            "payload": {
                "hostId": agent,
                "version": "1.0.0",
                "rule": rule,
                "target": { "host": "localhost", "port": port }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn open_registers_target() {
        let fx = fixture().await;
        let conn = ConnectionId::new();

        let resolution = fx.dispatcher.dispatch(conn, &open_event("WEB001", "/", 4242)).await.unwrap();
        assert_eq!(resolution, Resolution::Valid);
        assert_eq!(fx.registry.get_target_host("/").unwrap().address.port, 4242);
    }

    #[tokio::test]
    async fn close_requests_normal_close() {
        let fx = fixture().await;
        let event = ControlEvent::web_server_close(Credentials::signed("WEB001", key()));
        let text = serde_json::to_string(&event).unwrap();

        let resolution = fx.dispatcher.dispatch(ConnectionId::new(), &text).await.unwrap();
        assert_eq!(resolution, Resolution::CloseRequested);
        assert_eq!(resolution.close_code(), Some(CloseCode::Normal));
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let fx = fixture().await;
        let mut event: serde_json::Value = serde_json::from_str(&open_event("WEB001", "/", 1)).unwrap();
        event["authentication"]["signature"] = json!("00ff");

        let resolution = fx.dispatcher.dispatch(ConnectionId::new(), &event.to_string()).await.unwrap();
        assert_eq!(resolution, Resolution::Unauthorized);
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_and_type_are_invalid() {
        let fx = fixture().await;
        let creds = Credentials::signed("WEB001", key());
        for (ty, action) in [("webServer", "restart"), ("metrics", "push")] {
            let event = ControlEvent::new(ty, action, creds.clone(), serde_json::Value::Null);
            let text = serde_json::to_string(&event).unwrap();
            let resolution = fx.dispatcher.dispatch(ConnectionId::new(), &text).await.unwrap();
            assert_eq!(resolution, Resolution::Invalid, "{}/{}", ty, action);
        }
    }

    #[tokio::test]
    async fn invalid_rule_is_rejected() {
        let fx = fixture().await;
        let resolution = fx
            .dispatcher
            .dispatch(ConnectionId::new(), &open_event("WEB001", "/(unclosed", 1))
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Invalid);
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn empty_target_host_is_rejected() {
        let fx = fixture().await;
        let mut event: serde_json::Value = serde_json::from_str(&open_event("WEB001", "/", 1)).unwrap();
        event["payload"]["target"]["host"] = json!("");

        let resolution = fx.dispatcher.dispatch(ConnectionId::new(), &event.to_string()).await.unwrap();
        assert_eq!(resolution, Resolution::Invalid);
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn malformed_input_is_an_error() {
        let fx = fixture().await;
        let conn = ConnectionId::new();
        assert!(matches!(
            fx.dispatcher.dispatch(conn, "not json").await,
            Err(ControlError::Decode(_))
        ));

        let mut event: serde_json::Value = serde_json::from_str(&open_event("WEB001", "/", 1)).unwrap();
        event["payload"] = json!({ "hostId": "WEB001" });
        assert!(matches!(
            fx.dispatcher.dispatch(conn, &event.to_string()).await,
            Err(ControlError::Payload(_))
        ));
    }

    #[tokio::test]
    async fn sysadmin_manages_cert_store() {
        let fx = fixture().await;
        let admin = Credentials::signed("sysadmin", key());
        let other = generate_keypair(1024).unwrap();

        let add = ControlEvent::sysadmin_add(admin.clone(), "WEB009", &public_key_pem(&other).unwrap()).unwrap();
        let resolution = fx
            .dispatcher
            .dispatch(ConnectionId::new(), &serde_json::to_string(&add).unwrap())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Valid);
        assert!(fx.store.key_path("WEB009").unwrap().exists());

        let remove = ControlEvent::sysadmin_remove(admin, "WEB009").unwrap();
        let resolution = fx
            .dispatcher
            .dispatch(ConnectionId::new(), &serde_json::to_string(&remove).unwrap())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Valid);
        assert!(!fx.store.key_path("WEB009").unwrap().exists());
    }

    #[tokio::test]
    async fn sysadmin_requires_privilege() {
        let fx = fixture().await;
        let event = ControlEvent::sysadmin_remove(Credentials::signed("WEB001", key()), "sysadmin").unwrap();
        let resolution = fx
            .dispatcher
            .dispatch(ConnectionId::new(), &serde_json::to_string(&event).unwrap())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Unauthorized);
        assert!(fx.store.key_path("sysadmin").unwrap().exists());
    }

    #[tokio::test]
    async fn removing_missing_key_is_an_error() {
        let fx = fixture().await;
        let event = ControlEvent::sysadmin_remove(Credentials::signed("sysadmin", key()), "WEB404").unwrap();
        let result = fx
            .dispatcher
            .dispatch(ConnectionId::new(), &serde_json::to_string(&event).unwrap())
            .await;
        assert!(matches!(result, Err(ControlError::Auth(_))));
    }

    struct Echo;

    #[async_trait]
    impl CustomEventHandler for Echo {
        async fn handle(&self, ctx: &EventContext<'_>, event: &ControlEvent) -> Result<Resolution, ControlError> {
            assert!(ctx.registry.is_empty());
            Ok(if event.header.action == "ping" {
                Resolution::Valid
            } else {
                Resolution::Invalid
            })
        }
    }

    #[tokio::test]
    async fn custom_handler_receives_unknown_types() {
        let fx = fixture().await;
        let dispatcher = EventDispatcher::new(
            fx.registry.clone(),
            Arc::new(CertStoreAuthenticator::new(fx.store.clone())),
            fx.store.clone(),
            "sysadmin",
        )
        .with_custom_handler(Arc::new(Echo));

        let event = ControlEvent::new("health", "ping", Credentials::signed("WEB001", key()), serde_json::Value::Null);
        let resolution = dispatcher
            .dispatch(ConnectionId::new(), &serde_json::to_string(&event).unwrap())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Valid);
    }
}
