//! Access scope for the destination bucket
//!
//! An export run needs one [`Capability`]: credentials scoped to a bucket and
//! key prefix, the permitted operations, and optionally an encryption key.
//! It is obtained from one of two kinds of access material:
//!
//! - a root credential (`ACCESS_KEY_ID:SECRET`) plus an encryption passphrase,
//!   from which the key is derived
//! - a serialized capability token produced earlier by [`Capability::serialize`],
//!   possibly with some permissions removed
//!
//! Both resolve to the same `Capability`, so the writer never needs to know
//! which one was configured.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::DestinationConfig;
use crate::error::{AccessError, Result};

/// Token format version written by [`Capability::serialize`]
const TOKEN_VERSION: u8 = 1;

/// Hash rounds used to stretch the passphrase
const KEY_ROUNDS: usize = 4096;

/// Domain separator mixed into the key derivation salt
const KEY_SALT_CONTEXT: &[u8] = b"mongobucket/sse-c/v1";

/// Operation on the destination bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Operations a capability allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
        }
    }
}

/// Permissions to strip when sharing a capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Restrictions {
    pub disallow_reads: bool,
    pub disallow_writes: bool,
    pub disallow_deletes: bool,
}

impl Restrictions {
    pub fn from_config(config: &DestinationConfig) -> Self {
        Self {
            disallow_reads: config.disallow_reads,
            disallow_writes: config.disallow_writes,
            disallow_deletes: config.disallow_deletes,
        }
    }
}

/// Access material, as configured
#[derive(Clone, PartialEq, Eq)]
pub enum AccessGrant {
    /// Full access from a root credential; the passphrase yields the encryption key
    Derived {
        root_credential: String,
        passphrase: String,
        restrictions: Restrictions,
    },
    /// A previously serialized capability
    Opaque { serialized: String },
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessGrant::Derived { restrictions, .. } => f
                .debug_struct("Derived")
                .field("root_credential", &"****")
                .field("passphrase", &"****")
                .field("restrictions", restrictions)
                .finish(),
            AccessGrant::Opaque { .. } => f
                .debug_struct("Opaque")
                .field("serialized", &"****")
                .finish(),
        }
    }
}

impl AccessGrant {
    /// Pick the access material from a destination configuration
    ///
    /// A serialized token takes precedence over the root credential.
    pub fn from_config(config: &DestinationConfig) -> Self {
        match config.serialized_access.as_deref() {
            Some(token) if !token.trim().is_empty() => AccessGrant::Opaque {
                serialized: token.trim().to_string(),
            },
            _ => AccessGrant::Derived {
                root_credential: config.api_key.clone(),
                passphrase: config.encryption_passphrase.clone(),
                restrictions: Restrictions::from_config(config),
            },
        }
    }

    /// Restrictions to apply when this grant is shared
    ///
    /// An opaque token was restricted when it was serialized, so it adds none.
    pub fn restrictions(&self) -> Restrictions {
        match self {
            AccessGrant::Derived { restrictions, .. } => *restrictions,
            AccessGrant::Opaque { .. } => Restrictions::default(),
        }
    }

    /// Resolve the grant into a usable capability
    ///
    /// # Arguments
    /// * `config` - Destination configuration supplying bucket, prefix,
    ///   endpoint and region for derived access, and a fallback endpoint for tokens
    ///
    /// # Returns
    /// * `Result<Capability>` - Capability, or an [`AccessError`]
    pub fn resolve(&self, config: &DestinationConfig) -> Result<Capability> {
        match self {
            AccessGrant::Derived {
                root_credential,
                passphrase,
                ..
            } => {
                let (access_key_id, secret) = root_credential
                    .trim()
                    .split_once(':')
                    .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
                    .ok_or(AccessError::InvalidRootCredential)?;

                let encryption_key = (!passphrase.is_empty())
                    .then(|| derive_key(passphrase, access_key_id, &config.bucket));

                debug!(
                    "Derived access for bucket '{}' (encryption {})",
                    config.bucket,
                    if encryption_key.is_some() { "on" } else { "off" }
                );

                Ok(Capability {
                    access_key_id: access_key_id.to_string(),
                    secret_access_key: secret.to_string(),
                    endpoint: non_empty(&config.endpoint),
                    region: config.region.clone(),
                    bucket: config.bucket.clone(),
                    prefix: config.key_prefix(),
                    permissions: Permissions::all(),
                    encryption_key,
                })
            }
            AccessGrant::Opaque { serialized } => {
                let mut capability = Capability::parse(serialized)?;
                if capability.endpoint.is_none() {
                    capability.endpoint = non_empty(&config.endpoint);
                }
                debug!(
                    "Parsed access token for bucket '{}'",
                    capability.bucket
                );
                Ok(capability)
            }
        }
    }
}

/// Resolved, bucket-scoped access
#[derive(Clone, PartialEq, Eq)]
pub struct Capability {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub permissions: Permissions,
    pub encryption_key: Option<[u8; 32]>,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"****")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("permissions", &self.permissions)
            .field("encrypted", &self.encryption_key.is_some())
            .finish()
    }
}

/// Wire form of a capability token
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Token {
    v: u8,
    access_key_id: String,
    secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    region: String,
    bucket: String,
    #[serde(default)]
    prefix: String,
    permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption_key: Option<String>,
}

impl Capability {
    /// Serialize into a URL-safe token that [`Capability::parse`] accepts
    pub fn serialize(&self) -> Result<String> {
        let token = Token {
            v: TOKEN_VERSION,
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            permissions: self.permissions,
            encryption_key: self.encryption_key.map(hex::encode),
        };
        let json = serde_json::to_vec(&token)
            .map_err(|e| AccessError::InvalidToken(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parse a token produced by [`Capability::serialize`]
    pub fn parse(serialized: &str) -> Result<Self> {
        let invalid = |msg: String| AccessError::InvalidToken(msg);

        let json = URL_SAFE_NO_PAD
            .decode(serialized.trim())
            .map_err(|e| invalid(format!("not base64: {e}")))?;
        let token: Token =
            serde_json::from_slice(&json).map_err(|e| invalid(format!("malformed: {e}")))?;

        if token.v != TOKEN_VERSION {
            return Err(invalid(format!("unsupported version {}", token.v)).into());
        }
        if token.access_key_id.is_empty() || token.secret_access_key.is_empty() {
            return Err(invalid("missing credentials".to_string()).into());
        }
        if token.bucket.is_empty() {
            return Err(invalid("missing bucket".to_string()).into());
        }

        let encryption_key = match token.encryption_key {
            Some(encoded) => {
                let bytes =
                    hex::decode(&encoded).map_err(|e| invalid(format!("bad key: {e}")))?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| invalid("bad key: expected 32 bytes".to_string()))?;
                Some(key)
            }
            None => None,
        };

        Ok(Self {
            access_key_id: token.access_key_id,
            secret_access_key: token.secret_access_key,
            endpoint: token.endpoint,
            region: token.region,
            bucket: token.bucket,
            prefix: token.prefix,
            permissions: token.permissions,
            encryption_key,
        })
    }

    /// Copy of this capability with the given permissions removed
    pub fn restricted(&self, restrictions: Restrictions) -> Self {
        let mut capability = self.clone();
        capability.permissions.read &= !restrictions.disallow_reads;
        capability.permissions.write &= !restrictions.disallow_writes;
        capability.permissions.delete &= !restrictions.disallow_deletes;
        capability
    }

    pub fn permits(&self, operation: Operation) -> bool {
        match operation {
            Operation::Read => self.permissions.read,
            Operation::Write => self.permissions.write,
            Operation::Delete => self.permissions.delete,
        }
    }

    /// Fail with [`AccessError::PermissionDenied`] unless `operation` is permitted
    pub fn require(&self, operation: Operation) -> Result<()> {
        if self.permits(operation) {
            Ok(())
        } else {
            Err(AccessError::PermissionDenied(operation.to_string()).into())
        }
    }
}

/// Stretch a passphrase into a 256-bit key bound to one credential and bucket
fn derive_key(passphrase: &str, access_key_id: &str, bucket: &str) -> [u8; 32] {
    let salt = Sha256::new()
        .chain_update(KEY_SALT_CONTEXT)
        .chain_update(access_key_id.as_bytes())
        .chain_update(b"/")
        .chain_update(bucket.as_bytes())
        .finalize();

    let mut digest = Sha256::new()
        .chain_update(salt)
        .chain_update(passphrase.as_bytes())
        .finalize();
    for _ in 1..KEY_ROUNDS {
        digest = Sha256::new().chain_update(salt).chain_update(digest).finalize();
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
