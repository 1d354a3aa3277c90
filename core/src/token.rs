//! Privileged grid tokens
//!
//! Every instance generates one local token at startup. On a master, all
//! intra-grid calls must present this token; validation failures are
//! reported as a plain `false` so nothing leaks across the RPC boundary.

use rand::RngCore;
use serde::{Deserialize, Serialize};

const TOKEN_BYTES: usize = 32;

/// A hex-encoded secret shared only with cooperating grid members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken(String);

impl AuthToken {
    /// Generate a fresh token with 256 bits of entropy.
    pub fn generate() -> Self {
        let mut bytes = [0_u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap an externally supplied token string.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Check a caller-supplied token against this one.
    pub fn validate(&self, candidate: &str) -> bool {
        self.0 == candidate
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
