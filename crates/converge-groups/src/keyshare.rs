//! Per-recipient key distribution.
//!
//! A group key pair travels to each member individually, wrapped in a
//! transport envelope only that member's exchange key can open.

use serde::{Deserialize, Serialize};

use converge_core::{decrypt_envelope, encrypt_envelope, Identity, IdentityKeys};

use crate::error::{GroupError, Result};
use crate::group::GroupKeyPair;

/// What actually crosses the wire: the key material without the
/// receiver-local timestamp.
#[derive(Serialize, Deserialize)]
struct WireKeyPair {
    public: [u8; 32],
    secret: [u8; 32],
}

/// A group key pair encrypted to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    /// The group whose epoch key this carries.
    pub group_id: Identity,
    /// `ephemeral_public || nonce || ciphertext` envelope.
    pub envelope: Vec<u8>,
}

impl KeyShare {
    /// Wrap a key pair for a recipient's exchange public key.
    pub fn create(
        group_id: Identity,
        pair: &GroupKeyPair,
        recipient_exchange_public: &[u8; 32],
    ) -> Result<Self> {
        let wire = WireKeyPair {
            public: pair.public,
            secret: pair.secret,
        };
        let mut plaintext = Vec::new();
        ciborium::into_writer(&wire, &mut plaintext)
            .map_err(|e| GroupError::Serialization(e.to_string()))?;

        let envelope = encrypt_envelope(&plaintext, recipient_exchange_public)?;
        Ok(Self { group_id, envelope })
    }

    /// Open the share with the recipient's identity keys.
    ///
    /// `received_at_ms` becomes the local receipt timestamp of the pair.
    pub fn open(&self, keys: &IdentityKeys, received_at_ms: i64) -> Result<GroupKeyPair> {
        let plaintext = decrypt_envelope(&self.envelope, keys)?;
        let wire: WireKeyPair = ciborium::from_reader(plaintext.as_slice())
            .map_err(|e| GroupError::Serialization(e.to_string()))?;

        Ok(GroupKeyPair {
            public: wire.public,
            secret: wire.secret,
            received_at_ms,
        })
    }

    /// Serialize to CBOR bytes for a wire payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| GroupError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| GroupError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyshare_roundtrip() {
        let recipient = IdentityKeys::generate();
        let pair = GroupKeyPair::generate(100);

        let share = KeyShare::create(
            Identity::new("03group"),
            &pair,
            &recipient.exchange_public(),
        )
        .unwrap();

        let opened = share.open(&recipient, 555).unwrap();
        assert!(opened.same_material(&pair));
        assert_eq!(opened.received_at_ms, 555);
    }

    #[test]
    fn test_keyshare_wrong_recipient_fails() {
        let recipient = IdentityKeys::generate();
        let eve = IdentityKeys::generate();
        let pair = GroupKeyPair::generate(100);

        let share = KeyShare::create(
            Identity::new("03group"),
            &pair,
            &recipient.exchange_public(),
        )
        .unwrap();

        assert!(share.open(&eve, 0).is_err());
    }

    #[test]
    fn test_keyshare_wire_roundtrip() {
        let recipient = IdentityKeys::generate();
        let pair = GroupKeyPair::generate(100);
        let share = KeyShare::create(
            Identity::new("03group"),
            &pair,
            &recipient.exchange_public(),
        )
        .unwrap();

        let bytes = share.to_bytes().unwrap();
        assert_eq!(KeyShare::from_bytes(&bytes).unwrap(), share);
    }
}
