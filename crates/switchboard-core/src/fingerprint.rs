//! Request fingerprints
//!
//! A fingerprint identifies requests that are interchangeable for caching
//! and in-flight deduplication. It covers the normalized conversation, the
//! logical model and the sampling parameters, never the caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{GenerationParams, Message};

/// SHA-256 hex digest identifying a logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a request
    ///
    /// Message order and roles matter. Content is compared after
    /// [`normalize_content`], so whitespace and letter case do not.
    pub fn compute(messages: &[Message], model: &str, params: &GenerationParams) -> Self {
        let mut hasher = Sha256::new();

        hasher.update((messages.len() as u64).to_le_bytes());
        for message in messages {
            write_field(&mut hasher, message.role.as_ref());
            write_field(&mut hasher, &normalize_content(&message.content));
        }

        write_field(&mut hasher, model);

        match params.temperature {
            // Adding positive zero folds -0.0 into 0.0
            Some(t) => write_field(&mut hasher, &(t + 0.0).to_bits().to_string()),
            None => write_field(&mut hasher, "-"),
        }
        match params.max_tokens {
            Some(n) => write_field(&mut hasher, &n.to_string()),
            None => write_field(&mut hasher, "-"),
        }

        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already computed digest, e.g. one read back from a store
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefix each field so adjacent fields cannot run together
fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Trim, collapse whitespace runs to one space, and lowercase
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
