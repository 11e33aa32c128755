use std::marker::PhantomData;
use aead::{Aead, AeadCore, AeadInPlace, KeyInit, Nonce, OsRng, Payload};
use aead::generic_array::typenum::Unsigned;
use deoxys::DeoxysII256;
use tracing::debug;
use crate::confidential::kdf::derive_symmetric_key;
use crate::confidential::keys::{PrivateKey, PublicKey};
use crate::error::EnvelopeError;

/// Public-key authenticated encryption: an AEAD cipher keyed per exchange from an X25519 key pair
///  and the peer's public key (see [derive_symmetric_key]).
///
/// The cipher is pluggable, but it must take a 32 byte key. The gateway uses Deoxys-II-256-128,
///  see [DeoxysBox].
pub struct MraeBox<C> {
    _cipher: PhantomData<C>,
}

pub type DeoxysBox = MraeBox<DeoxysII256>;

impl<C: AeadInPlace + KeyInit> MraeBox<C> {
    /// The nonce width is defined by the cipher and by nothing else
    pub const NONCE_LEN: usize = C::NonceSize::USIZE;

    /// A fresh random nonce for every call
    pub fn nonce() -> Nonce<C> {
        C::generate_nonce(&mut OsRng)
    }

    /// Reconstructs a nonce from its wire bytes
    pub fn nonce_from_slice(bytes: &[u8]) -> Result<Nonce<C>, EnvelopeError> {
        if bytes.len() != Self::NONCE_LEN {
            return Err(EnvelopeError::InvalidKey(format!("nonce must be {} bytes, was {}", Self::NONCE_LEN, bytes.len())));
        }
        Ok(Nonce::<C>::clone_from_slice(bytes))
    }

    fn cipher(peer_public_key: &PublicKey, private_key: &PrivateKey) -> Result<C, EnvelopeError> {
        let key = derive_symmetric_key(peer_public_key, private_key)?;
        C::new_from_slice(&key)
            .map_err(|_| EnvelopeError::InvalidKey("cipher does not accept a 32 byte key".to_string()))
    }

    /// Returns the ciphertext including the authentication tag
    pub fn seal(
        nonce: &Nonce<C>,
        plaintext: &[u8],
        aad: &[u8],
        peer_public_key: &PublicKey,
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>, EnvelopeError> {
        Self::cipher(peer_public_key, private_key)?
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| EnvelopeError::Encryption)
    }

    pub fn open(
        nonce: &Nonce<C>,
        ciphertext: &[u8],
        aad: &[u8],
        peer_public_key: &PublicKey,
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>, EnvelopeError> {
        Self::cipher(peer_public_key, private_key)?
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| {
                debug!("AEAD tag verification failed for message from {:?}", peer_public_key);
                EnvelopeError::Authentication
            })
    }
}
