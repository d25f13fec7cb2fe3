//! Secret value types.
//!
//! [`SecretString`] keeps credential values out of logs, debug output and
//! serialized summaries. [`Secret`] is the resolved canonical value for one
//! declared secret name.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// - Debug output shows `SecretString([REDACTED])`
/// - Display output shows `[REDACTED]`
/// - Serialization outputs `"[REDACTED]"`
/// - Deserialization accepts real values (manifests may carry literal credentials)
/// - Memory is zeroed on drop
///
/// The value is only reachable through [`SecretString::expose_secret`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(SecretString(value))
    }
}

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying secret value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Format class of a secret; decides generation size and validation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SecretClass {
    /// API keys and bearer tokens: 32 random bytes, base64url
    #[default]
    Token,
    /// Human-typeable passwords: 24 alphanumeric characters
    Passphrase,
    /// Encryption keys: 32 random bytes, hex
    SymmetricKey,
}

impl fmt::Display for SecretClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretClass::Token => write!(f, "token"),
            SecretClass::Passphrase => write!(f, "passphrase"),
            SecretClass::SymmetricKey => write!(f, "symmetric-key"),
        }
    }
}

/// Where a canonical secret value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretOrigin {
    Preserved,
    Generated,
}

impl fmt::Display for SecretOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretOrigin::Preserved => write!(f, "preserved"),
            SecretOrigin::Generated => write!(f, "generated"),
        }
    }
}

/// A resolved secret. Serializes without its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Secret {
    pub name: String,
    pub value: SecretString,
    pub origin: SecretOrigin,
    pub class: SecretClass,
    /// Service the preserved value was adopted from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_service: Option<String>,
    /// The value is held by at least one service file after the run
    pub persisted: bool,
}

impl Secret {
    pub fn is_generated(&self) -> bool {
        self.origin == SecretOrigin::Generated
    }
}
