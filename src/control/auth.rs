//! Agent authentication.
//!
//! # Responsibilities
//! - Parse the `INTELI-SHA256` authorization header
//! - Verify RSA SHA-256 signatures of agent ids against the certificate store
//! - Maintain the certificate store (sysadmin add/remove)
//! - Decide whether an upgrade request's origin is acceptable
//!
//! # Design Decisions
//! - Public keys live on disk as `<agentId>_publicKey.pem` (SPKI PEM)
//! - Signatures are hex encoded PKCS#1 v1.5 over the raw agent id bytes
//! - Agent ids are used as file names, so path separators are refused

use async_trait::async_trait;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::PathBuf;
use thiserror::Error;

/// Scheme name carried in the Authorization header.
pub const AUTH_SCHEME: &str = "INTELI-SHA256";

const PUBLIC_KEY_SUFFIX: &str = "_publicKey.pem";

/// Key size used by `generate_keypair` callers that have no preference.
pub const DEFAULT_KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("credentials are incomplete")]
    MissingCredentials,

    #[error("invalid agent id {0:?}")]
    InvalidAgentId(String),

    #[error("no public key registered for agent {0}")]
    UnknownAgent(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signature is not valid hex: {0}")]
    SignatureEncoding(#[from] hex::FromHexError),

    #[error("signature verification failed")]
    BadSignature,

    #[error("key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    #[error("certificate store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Agent credential: an agent id and its hex signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Credentials {
    pub fn new(agent_id: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            signature: Some(signature.into()),
        }
    }

    /// Sign `agent_id` with `key` and wrap the result.
    pub fn signed(agent_id: &str, key: &RsaPrivateKey) -> Self {
        Self::new(agent_id, sign_agent_id(key, agent_id))
    }

    /// Parse `INTELI-SHA256 AgentId=<id>, Signature=<sig>`.
    pub fn from_authorization(value: &str) -> Result<Self, AuthError> {
        let rest = value
            .trim()
            .strip_prefix(AUTH_SCHEME)
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .ok_or(AuthError::MalformedHeader)?;

        let mut credentials = Self::default();
        for part in rest.split(',') {
            let (key, val) = part.trim().split_once('=').ok_or(AuthError::MalformedHeader)?;
            let val = val.trim();
            if val.is_empty() {
                return Err(AuthError::MalformedHeader);
            }
            match key.trim() {
                "AgentId" => credentials.agent_id = Some(val.to_string()),
                "Signature" => credentials.signature = Some(val.to_string()),
                _ => return Err(AuthError::MalformedHeader),
            }
        }

        if credentials.agent_id.is_none() || credentials.signature.is_none() {
            return Err(AuthError::MalformedHeader);
        }
        Ok(credentials)
    }

    /// Render as an Authorization header value.
    pub fn to_authorization(&self) -> String {
        format!(
            "{} AgentId={}, Signature={}",
            AUTH_SCHEME,
            self.agent_id.as_deref().unwrap_or_default(),
            self.signature.as_deref().unwrap_or_default()
        )
    }

    fn parts(&self) -> Result<(&str, &str), AuthError> {
        match (self.agent_id.as_deref(), self.signature.as_deref()) {
            (Some(id), Some(sig)) if !id.is_empty() && !sig.is_empty() => Ok((id, sig)),
            _ => Err(AuthError::MissingCredentials),
        }
    }
}

/// Answers "is this credential authentic".
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<(), AuthError>;
}

/// Directory of agent public keys.
#[derive(Debug, Clone)]
pub struct CertStore {
    dir: PathBuf,
}

impl CertStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the public key for `agent_id`.
    pub fn key_path(&self, agent_id: &str) -> Result<PathBuf, AuthError> {
        validate_agent_id(agent_id)?;
        Ok(self.dir.join(format!("{}{}", agent_id, PUBLIC_KEY_SUFFIX)))
    }

    pub async fn load_key(&self, agent_id: &str) -> Result<RsaPublicKey, AuthError> {
        let path = self.key_path(agent_id)?;
        let pem = match tokio::fs::read_to_string(&path).await {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::UnknownAgent(agent_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        parse_public_key(&pem)
    }

    /// Write `pem` as the public key of `agent_id`, replacing any previous one.
    pub async fn store_key(&self, agent_id: &str, pem: &str) -> Result<PathBuf, AuthError> {
        parse_public_key(pem)?;
        let path = self.key_path(agent_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, pem).await?;
        Ok(path)
    }

    /// Delete the public key of `agent_id`.
    pub async fn remove_key(&self, agent_id: &str) -> Result<PathBuf, AuthError> {
        let path = self.key_path(agent_id)?;
        tokio::fs::remove_file(&path).await?;
        Ok(path)
    }
}

/// Verifies credentials against public keys in a [`CertStore`].
#[derive(Debug, Clone)]
pub struct CertStoreAuthenticator {
    store: CertStore,
}

impl CertStoreAuthenticator {
    pub fn new(store: CertStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Authenticator for CertStoreAuthenticator {
    async fn verify(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let (agent_id, signature) = credentials.parts()?;
        let key = self.store.load_key(agent_id).await?;
        verify_signature(&key, agent_id, signature)
    }
}

/// Decides whether an upgrade request's `Origin` is acceptable.
pub trait OriginPolicy: Send + Sync {
    fn allows(&self, origin: Option<&str>) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyOrigin;

impl OriginPolicy for AllowAnyOrigin {
    fn allows(&self, _origin: Option<&str>) -> bool {
        true
    }
}

/// Accepts only listed origins. Requests without an Origin are refused.
#[derive(Debug, Clone)]
pub struct OriginAllowList {
    origins: Vec<String>,
}

impl OriginAllowList {
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }
}

impl OriginPolicy for OriginAllowList {
    fn allows(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|o| self.origins.iter().any(|allowed| allowed == o))
    }
}

fn validate_agent_id(agent_id: &str) -> Result<(), AuthError> {
    let bad = agent_id.is_empty()
        || agent_id == "."
        || agent_id == ".."
        || agent_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(AuthError::InvalidAgentId(agent_id.to_string()));
    }
    Ok(())
}

pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, AuthError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| AuthError::InvalidKey(e.to_string()))
}

pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, AuthError> {
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| AuthError::InvalidKey(e.to_string()))
}

/// Hex encoded signature of `agent_id`.
pub fn sign_agent_id(key: &RsaPrivateKey, agent_id: &str) -> String {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    hex::encode(signing_key.sign(agent_id.as_bytes()).to_bytes())
}

pub fn verify_signature(key: &RsaPublicKey, agent_id: &str, signature_hex: &str) -> Result<(), AuthError> {
    let raw = hex::decode(signature_hex)?;
    let signature = Signature::try_from(raw.as_slice()).map_err(|_| AuthError::BadSignature)?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(agent_id.as_bytes(), &signature)
        .map_err(|_| AuthError::BadSignature)
}

/// A fresh RSA keypair.
pub fn generate_keypair(bits: usize) -> Result<RsaPrivateKey, AuthError> {
    let mut rng = rand::thread_rng();
    Ok(RsaPrivateKey::new(&mut rng, bits)?)
}

/// PKCS#8 PEM of `key`.
pub fn private_key_pem(key: &RsaPrivateKey) -> Result<String, AuthError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.as_str().to_owned())
        .map_err(|e| AuthError::InvalidKey(e.to_string()))
}

/// SPKI PEM of the public half of `key`.
pub fn public_key_pem(key: &RsaPrivateKey) -> Result<String, AuthError> {
    key.to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AuthError::InvalidKey(e.to_string()))
}
