//! Control channel wire format.
//!
//! Every frame is a JSON text message:
//!
//! ```text
//! {
//!   "header": { "type": "webServer", "action": "open" },
//!   "authentication": { "agentId": "WEB001", "signature": "..." },
//!   "payload": { ... }
//! }
//! ```
//!
//! `authentification` is accepted on input for older agents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::control::auth::Credentials;

pub const TYPE_WEB_SERVER: &str = "webServer";
pub const TYPE_SYSADMIN: &str = "sysadmin";

pub const ACTION_OPEN: &str = "open";
pub const ACTION_CLOSE: &str = "close";
pub const ACTION_ADD: &str = "add";
pub const ACTION_REMOVE: &str = "remove";

/// Sub-protocol negotiated during the upgrade when none is configured.
pub const DEFAULT_SUBPROTOCOL: &str = "inteli";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    #[serde(rename = "type")]
    pub event_type: String,
    pub action: String,
}

/// Envelope of every control message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEvent {
    pub header: EventHeader,
    #[serde(default, alias = "authentification")]
    pub authentication: Credentials,
    #[serde(default)]
    pub payload: Value,
}

impl ControlEvent {
    pub fn new(event_type: &str, action: &str, authentication: Credentials, payload: Value) -> Self {
        Self {
            header: EventHeader {
                event_type: event_type.to_string(),
                action: action.to_string(),
            },
            authentication,
            payload,
        }
    }

    pub fn web_server_open(authentication: Credentials, host: &HostPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(TYPE_WEB_SERVER, ACTION_OPEN, authentication, serde_json::to_value(host)?))
    }

    pub fn web_server_close(authentication: Credentials) -> Self {
        Self::new(TYPE_WEB_SERVER, ACTION_CLOSE, authentication, Value::Null)
    }

    pub fn sysadmin_add(authentication: Credentials, host_id: &str, public_key: &str) -> Result<Self, serde_json::Error> {
        let payload = CertPayload {
            host_id: host_id.to_string(),
            public_key: Some(public_key.to_string()),
        };
        Ok(Self::new(TYPE_SYSADMIN, ACTION_ADD, authentication, serde_json::to_value(payload)?))
    }

    pub fn sysadmin_remove(authentication: Credentials, host_id: &str) -> Result<Self, serde_json::Error> {
        let payload = CertPayload {
            host_id: host_id.to_string(),
            public_key: None,
        };
        Ok(Self::new(TYPE_SYSADMIN, ACTION_REMOVE, authentication, serde_json::to_value(payload)?))
    }

    /// Decode the payload as `T`.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

fn default_rule() -> String {
    "/".to_string()
}

/// Backend address advertised in `webServer/open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub host: String,
    pub port: u16,
}

/// Payload of `webServer/open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPayload {
    pub host_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_rule")]
    pub rule: String,
    pub target: HostTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Payload of `sysadmin/add` and `sysadmin/remove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertPayload {
    pub host_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// WebSocket close codes used by the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    ProtocolError,
    InvalidData,
    PolicyViolation,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::InvalidData => 1007,
            CloseCode::PolicyViolation => 1008,
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(CloseCode::Normal),
            1001 => Some(CloseCode::GoingAway),
            1002 => Some(CloseCode::ProtocolError),
            1007 => Some(CloseCode::InvalidData),
            1008 => Some(CloseCode::PolicyViolation),
            _ => None,
        }
    }

    /// Reason text sent with the close frame.
    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "NORMAL CLOSE",
            CloseCode::GoingAway => "SERVER SHUTDOWN",
            CloseCode::ProtocolError => "PROTOCOL ERROR",
            CloseCode::InvalidData => "INVALID DATA",
            CloseCode::PolicyViolation => "UNAUTHORIZED",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_event() {
        let raw = json!({
            "header": { "type": "webServer", "action": "open" },
            "authentication": { "agentId": "WEB001", "signature": "beef" },
            "payload": {
                "hostId": "WEB001",
                "version": "1.0.0",
                "rule": "/test",
                "target": { "host": "localhost", "port": 4242 }
            }
        });
        let event: ControlEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.header.event_type, TYPE_WEB_SERVER);
        assert_eq!(event.authentication.agent_id.as_deref(), Some("WEB001"));

        let host: HostPayload = event.payload_as().unwrap();
        assert_eq!(host.rule, "/test");
        assert_eq!(host.target, HostTarget { host: "localhost".into(), port: 4242 });
    }

    #[test]
    fn accepts_legacy_authentication_spelling() {
        let raw = r#"{"header":{"type":"webServer","action":"close"},"authentification":{"agentId":"WEB001","signature":"ab"}}"#;
        let event: ControlEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.authentication, Credentials::new("WEB001", "ab"));
        assert!(event.payload.is_null());
    }

    #[test]
    fn rule_defaults_to_root() {
        let host: HostPayload =
            serde_json::from_value(json!({ "hostId": "a", "target": { "host": "h", "port": 1 } })).unwrap();
        assert_eq!(host.rule, "/");
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let result: Result<HostPayload, _> =
            serde_json::from_value(json!({ "hostId": "a", "target": { "host": "h", "port": 70000 } }));
        assert!(result.is_err());
    }

    #[test]
    fn sysadmin_remove_omits_key() {
        let event = ControlEvent::sysadmin_remove(Credentials::new("sysadmin", "00"), "WEB001").unwrap();
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["payload"], json!({ "hostId": "WEB001" }));
        assert_eq!(encoded["header"], json!({ "type": "sysadmin", "action": "remove" }));
    }

    #[test]
    fn close_codes() {
        for code in [
            CloseCode::Normal,
            CloseCode::GoingAway,
            CloseCode::ProtocolError,
            CloseCode::InvalidData,
            CloseCode::PolicyViolation,
        ] {
            assert_eq!(CloseCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(CloseCode::from_u16(1004), None);
    }
}
