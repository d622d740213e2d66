//! Communication token: the per-call secret every inbound message must
//! present.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::message::reply_errors;

/// Why a presented token was refused. The `Display` strings are sent
/// back in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Missing communication token")]
    Missing,
    #[error("Wrong communication token")]
    Wrong,
}

impl TokenError {
    pub fn reply_text(&self) -> &'static str {
        match self {
            Self::Missing => reply_errors::MISSING_TOKEN,
            Self::Wrong => reply_errors::WRONG_TOKEN,
        }
    }
}

/// Shared secret fixed for the lifetime of one agent.
///
/// Wiped from memory on drop. `Debug` prints a fingerprint, never the secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CommunicationToken {
    secret: String,
}

impl CommunicationToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// 32 random bytes, hex-encoded.
    pub fn generate() -> Self {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = Self::new(hex::encode(raw));
        raw.zeroize();
        token
    }

    /// Check a token presented by a peer.
    ///
    /// Digests are compared rather than the strings, `blake3::Hash`
    /// equality is constant-time.
    pub fn verify(&self, presented: &str) -> Result<(), TokenError> {
        if presented.is_empty() {
            return Err(TokenError::Missing);
        }
        if blake3::hash(presented.as_bytes()) != blake3::hash(self.secret.as_bytes()) {
            return Err(TokenError::Wrong);
        }
        Ok(())
    }

    /// The secret itself, for handing to the worker out-of-band.
    pub fn expose(&self) -> &str {
        &self.secret
    }

    /// Short, non-reversible identifier safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(&blake3::hash(self.secret.as_bytes()).as_bytes()[..4])
    }
}

impl std::fmt::Debug for CommunicationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationToken")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
