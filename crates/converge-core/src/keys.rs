//! Identity key derivation and the transport envelope capability.
//!
//! An account is born from a 32-byte seed: Ed25519 for identity and
//! X25519 for envelope decryption, both deterministically derived so
//! every device provisioned from the seed computes the same keys.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{CoreError, Result};
use crate::identity::Identity;

/// Envelope layout: ephemeral public key, then nonce, then ciphertext.
const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// The key material backing one account identity.
pub struct IdentityKeys {
    signing: SigningKey,
    exchange: StaticSecret,
}

impl IdentityKeys {
    /// Derive the identity keys from a 32-byte account seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        // Separate derivation path so exchange keys never equal the
        // signing scalar.
        let mut hasher = blake3::Hasher::new_derive_key("converge-v0-exchange-key");
        hasher.update(seed);
        let exchange = StaticSecret::from(*hasher.finalize().as_bytes());
        Self { signing, exchange }
    }

    /// Generate a random account (testing and provisioning).
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// The public identity other devices and the relay address.
    pub fn identity(&self) -> Identity {
        Identity::new(hex::encode(self.signing.verifying_key().to_bytes()))
    }

    /// The X25519 public half, published for envelope encryption.
    pub fn exchange_public(&self) -> [u8; 32] {
        *PublicKey::from(&self.exchange).as_bytes()
    }

    fn wrap_key(&self, ephemeral_public: &[u8; 32]) -> [u8; 32] {
        let shared = self
            .exchange
            .diffie_hellman(&PublicKey::from(*ephemeral_public));
        derive_wrap_key(shared.as_bytes(), ephemeral_public)
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKeys({})", self.identity())
    }
}

fn derive_wrap_key(shared: &[u8; 32], context: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("converge-v0-envelope");
    hasher.update(shared);
    hasher.update(context);
    *hasher.finalize().as_bytes()
}

/// Encrypt a payload to a recipient's X25519 public key.
///
/// Produces `ephemeral_public || nonce || ciphertext`.
pub fn encrypt_envelope(plaintext: &[u8], recipient_exchange_public: &[u8; 32]) -> Result<Vec<u8>> {
    let ephemeral = StaticSecret::random_from_rng(rand::thread_rng());
    let ephemeral_public = *PublicKey::from(&ephemeral).as_bytes();

    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_exchange_public));
    let key = derive_wrap_key(shared.as_bytes(), &ephemeral_public);

    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CoreError::EncryptionFailed)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CoreError::EncryptionFailed)?;

    let mut envelope = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&ephemeral_public);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt a transport envelope with the recipient's identity keys.
pub fn decrypt_envelope(envelope: &[u8], keys: &IdentityKeys) -> Result<Vec<u8>> {
    if envelope.len() < EPHEMERAL_LEN + NONCE_LEN {
        return Err(CoreError::MalformedEnvelope(format!(
            "envelope too short: {} bytes",
            envelope.len()
        )));
    }

    let mut ephemeral_public = [0u8; EPHEMERAL_LEN];
    ephemeral_public.copy_from_slice(&envelope[..EPHEMERAL_LEN]);
    let nonce = &envelope[EPHEMERAL_LEN..EPHEMERAL_LEN + NONCE_LEN];
    let ciphertext = &envelope[EPHEMERAL_LEN + NONCE_LEN..];

    let key = keys.wrap_key(&ephemeral_public);
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CoreError::DecryptionFailed)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::DecryptionFailed)
}
