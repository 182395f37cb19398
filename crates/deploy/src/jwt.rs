//! The engine API secret shared by the execution and consensus clients of a node.

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::fs::FsHandler;

/// Length of the secret in bytes.
pub const JWT_SECRET_LEN: usize = 32;

/// A 32-byte JWT secret, stored hex encoded.
///
/// The `Debug` implementation never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct JwtSecret(String);

impl JwtSecret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let bytes: [u8; JWT_SECRET_LEN] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Parse a hex encoded secret, with or without a `0x` prefix.
    pub fn from_hex(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits).context("JWT secret is not valid hex")?;

        if bytes.len() != JWT_SECRET_LEN {
            anyhow::bail!(
                "JWT secret must be {} bytes, got {}",
                JWT_SECRET_LEN,
                bytes.len()
            );
        }

        Ok(Self(hex::encode(bytes)))
    }

    /// Load the secret stored at `path`, generating and persisting one if the file is missing.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = FsHandler::read_asset(path)?;
            let secret = Self::from_hex(&content)
                .context(format!("Invalid JWT secret in {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Loaded JWT secret");
            return Ok(secret);
        }

        let secret = Self::generate();
        FsHandler::write_private(path, secret.expose())?;
        tracing::info!(path = %path.display(), "Generated new JWT secret");

        Ok(secret)
    }

    /// The hex encoded secret, without `0x` prefix.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JwtSecret(<redacted>)")
    }
}

impl Serialize for JwtSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JwtSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_generate_is_random_hex() {
        let a = JwtSecret::generate();
        let b = JwtSecret::generate();

        assert_eq!(a.expose().len(), 64);
        assert!(a.expose().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_hex_validation() {
        let hex = "ab".repeat(32);
        assert_eq!(JwtSecret::from_hex(&hex).unwrap().expose(), hex);
        assert_eq!(
            JwtSecret::from_hex(&format!("0x{}\n", hex)).unwrap().expose(),
            hex
        );
        assert!(JwtSecret::from_hex("abcd").is_err());
        assert!(JwtSecret::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = JwtSecret::generate();
        let debug = format!("{:?}", secret);
        assert!(!debug.contains(secret.expose()));
    }

    #[test]
    fn test_load_or_generate_persists() {
        let temp_dir = TempDir::new("ethnode-jwt").unwrap();
        let path = temp_dir.path().join("jwt.hex");

        let first = JwtSecret::load_or_generate(&path).unwrap();
        let second = JwtSecret::load_or_generate(&path).unwrap();

        assert_eq!(first, second);
    }
}
