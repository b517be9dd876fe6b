//! Boundary wrappers over the handshake crypto primitives
//!
//! The invitation handshake needs exactly four primitives: an ephemeral
//! x25519 key agreement, an HMAC for SAS derivation, a hash for the nonce
//! commitment, and an AEAD to seal the claim request and confirmation
//! payloads. This module wraps them behind small types so the state machines
//! in `vestibule-invite` never touch the underlying crates directly; the
//! mathematics themselves are an external concern.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size in bytes of the random handshake nonces each side contributes.
pub const HANDSHAKE_NONCE_SIZE: usize = 64;

const SHARED_SECRET_DOMAIN: &[u8] = b"vestibule shared secret v1";
const NONCE_COMMITMENT_DOMAIN: &[u8] = b"vestibule hashed nonce v1";
const AEAD_NONCE_SIZE: usize = 24;

/// Error type for the sealing primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The AEAD refused to encrypt (payload too large)
    #[error("Encryption failure")]
    Encryption,
    /// The ciphertext failed authentication or was truncated
    #[error("Decryption failure")]
    Decryption,
}

/// Ephemeral private half of the key agreement.
///
/// Generated fresh for every handshake attempt; never serialized, never
/// persisted. Zeroized on drop by the underlying `StaticSecret`.
pub struct PrivateKey(x25519_dalek::StaticSecret);

impl PrivateKey {
    /// Generate a fresh ephemeral private key.
    pub fn generate() -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(
            rand::rngs::OsRng,
        ))
    }

    /// The public half, sent to the peer through the conduit.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0).to_bytes())
    }

    /// Run the key agreement against the peer's public key.
    ///
    /// The raw Diffie-Hellman output is domain-separated and hashed so the
    /// shared secret never exposes curve structure.
    pub fn agree(&self, peer: &PublicKey) -> SharedSecretKey {
        let dh = self
            .0
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer.0));
        let mut hasher = Sha256::new();
        hasher.update(SHARED_SECRET_DOMAIN);
        hasher.update(dh.as_bytes());
        SharedSecretKey(hasher.finalize().into())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Public half of the key agreement, exchanged over the conduit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Symmetric key shared by claimer and greeter after key agreement.
///
/// Used for SAS derivation and for sealing the claim/confirmation payloads.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecretKey([u8; 32]);

impl SharedSecretKey {
    /// Build from raw bytes; tests only want deterministic keys.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// HMAC-SHA256 over `data`, keyed by the shared secret.
    pub fn hmac(&self, data: &[u8]) -> [u8; 32] {
        // HMAC accepts keys of any length, so this cannot fail for 32 bytes.
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.0)
            .unwrap_or_else(|_| unreachable!("HMAC accepts 32-byte keys"));
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Seal a payload: random-nonce XChaCha20-Poly1305, nonce prepended.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encryption)?;
        let mut out = Vec::with_capacity(AEAD_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Unseal a payload produced by [`seal`](Self::seal).
    ///
    /// Any authentication or framing failure collapses to
    /// [`CryptoError::Decryption`]; the state machines translate that into
    /// their `Corrupted*` outcomes.
    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < AEAD_NONCE_SIZE {
            return Err(CryptoError::Decryption);
        }
        let (nonce, ciphertext) = sealed.split_at(AEAD_NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

impl std::fmt::Debug for SharedSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecretKey(..)")
    }
}

/// Generate the random nonce each side contributes to SAS derivation.
pub fn generate_handshake_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; HANDSHAKE_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Commitment hash for a handshake nonce.
///
/// The claimer commits to its nonce before seeing the greeter's, which is
/// what makes SAS grinding attacks detectable as `NonceMismatch`.
pub fn hash_nonce(nonce: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(NONCE_COMMITMENT_DOMAIN);
    hasher.update(nonce);
    hasher.finalize().into()
}
