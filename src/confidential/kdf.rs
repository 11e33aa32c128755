use hmac::{Hmac, Mac};
use sha2::Sha256;
use crate::confidential::keys::{PrivateKey, PublicKey};
use crate::error::EnvelopeError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC key separating the derived AEAD keys from any other use of the shared secret
pub const BOX_KDF_TWEAK: &[u8] = b"MRAE_Box_Deoxys-II-256-128";

/// Derives the symmetric AEAD key for an exchange between `private_key` and `peer_public_key`:
///  X25519 shared secret, tweaked by HMAC-SHA256. Both sides of the exchange derive the same key.
///
/// The result is not cached - callers derive it per message and drop it afterwards.
pub fn derive_symmetric_key(peer_public_key: &PublicKey, private_key: &PrivateKey) -> Result<[u8; 32], EnvelopeError> {
    let peer = x25519_dalek::PublicKey::from(*peer_public_key.as_bytes());
    let pre_master_key = private_key.to_static_secret().diffie_hellman(&peer);

    let mut mac = HmacSha256::new_from_slice(BOX_KDF_TWEAK)
        .map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;
    mac.update(pre_master_key.as_bytes());
    Ok(mac.finalize().into_bytes().into())
}
