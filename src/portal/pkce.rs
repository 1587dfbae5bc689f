//! PKCE verifier/challenge generation for the portal's authorize step.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A Proof Key for Code Exchange pair.
///
/// The challenge is always `BASE64URL(SHA256(verifier))` without padding,
/// so for a fixed verifier it is reproducible byte for byte. A fresh pair
/// is generated once per authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceMaterial {
    pub verifier: String,
    pub challenge: String,
}

impl PkceMaterial {
    /// Generates a pair from 32 random bytes.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(&URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Derives the challenge for an existing verifier.
    pub fn from_verifier(verifier: &str) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        Self {
            verifier: verifier.to_string(),
            challenge: URL_SAFE_NO_PAD.encode(digest),
        }
    }
}
