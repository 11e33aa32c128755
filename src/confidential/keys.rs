use std::fmt::{Debug, Formatter};
use x25519_dalek::StaticSecret;
use crate::error::EnvelopeError;

pub const KEY_LEN: usize = 32;

/// X25519 public key of a peer or of this client
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> PublicKey {
        PublicKey(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<PublicKey, EnvelopeError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into()
            .map_err(|_| EnvelopeError::InvalidKey(format!("public key must be {} bytes, was {}", KEY_LEN, bytes.len())))?;
        Ok(PublicKey(bytes))
    }

    /// accepts an optional `0x` prefix
    pub fn from_hex(s: &str) -> Result<PublicKey, EnvelopeError> {
        Self::from_slice(&decode_hex(s)?)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; KEY_LEN]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> PrivateKey {
        PrivateKey(bytes)
    }

    pub fn from_hex(s: &str) -> Result<PrivateKey, EnvelopeError> {
        let bytes: [u8; KEY_LEN] = decode_hex(s)?
            .try_into()
            .map_err(|_| EnvelopeError::InvalidKey(format!("private key must be {} bytes", KEY_LEN)))?;
        Ok(PrivateKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub(crate) fn to_static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }

    pub fn public_key(&self) -> PublicKey {
        let public = x25519_dalek::PublicKey::from(&self.to_static_secret());
        PublicKey(public.to_bytes())
    }
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    pub fn generate() -> KeyPair {
        Self::from_private_key(PrivateKey(rand::random()))
    }

    pub fn from_private_key(private_key: PrivateKey) -> KeyPair {
        KeyPair {
            public_key: private_key.public_key(),
            private_key,
        }
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, EnvelopeError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| EnvelopeError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[test]
    fn test_generate_is_consistent() {
        let key_pair = KeyPair::generate();
        assert_eq!(key_pair.public_key, key_pair.private_key.public_key());
        assert_ne!(KeyPair::generate().private_key, key_pair.private_key);
    }

    #[test]
    fn test_hex() {
        let key_pair = KeyPair::generate();

        assert_eq!(PublicKey::from_hex(&key_pair.public_key.to_hex()).unwrap(), key_pair.public_key);
        assert_eq!(PrivateKey::from_hex(&key_pair.private_key.to_hex()).unwrap(), key_pair.private_key);
        assert_eq!(PublicKey::from_hex(&hex::encode([3u8; 32])).unwrap(), PublicKey::from_bytes([3; 32]));
    }

    #[rstest]
    #[case::too_short("0x0102")]
    #[case::too_long("ababababababababababababababababababababababababababababababababab")]
    #[case::not_hex("0xzz")]
    fn test_invalid_public_key(#[case] s: &str) {
        assert!(matches!(PublicKey::from_hex(s), Err(EnvelopeError::InvalidKey(_))));
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let key = PrivateKey::from_bytes([7; 32]);
        assert!(!format!("{:?}", key).contains("0707"));
    }
}
