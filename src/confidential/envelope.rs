use aead::{AeadInPlace, KeyInit, Nonce};
use bytes::{Buf, BufMut};
use tracing::{debug, trace};
use crate::confidential::keys::{PrivateKey, PublicKey, KEY_LEN};
use crate::confidential::mrae::MraeBox;
use crate::error::EnvelopeError;
use crate::util::safe_converter::PrecheckedCast;

const CIPHER_LEN_SIZE: usize = 8;
const AAD_LEN_SIZE: usize = 8;

/// The result of opening an envelope
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decryption {
    pub plaintext: Vec<u8>,
    pub aad: Vec<u8>,
    pub nonce: Vec<u8>,
    pub peer_public_key: PublicKey,
}

impl<C: AeadInPlace + KeyInit> MraeBox<C> {
    /// Fixed part of every envelope: sender public key, both length fields and the nonce
    pub const ENVELOPE_OVERHEAD: usize = KEY_LEN + CIPHER_LEN_SIZE + AAD_LEN_SIZE + Self::NONCE_LEN;

    /// Seals `plaintext` for `peer_public_key` and wraps it in a self-describing envelope:
    ///
    /// ```ascii
    /// PUBLIC_KEY (32) | CIPHER_LEN (u64 LE) | AAD_LEN (u64 LE) | CIPHER | AAD | NONCE
    /// ```
    ///
    /// `public_key` is the sender's public key, which the receiver needs to derive the key.
    pub fn encrypt(
        nonce: &Nonce<C>,
        plaintext: &[u8],
        peer_public_key: &PublicKey,
        public_key: &PublicKey,
        private_key: &PrivateKey,
        aad: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let ciphertext = Self::seal(nonce, plaintext, aad, peer_public_key, private_key)?;

        let cipher_len = u64::try_from(ciphertext.len()).map_err(|_| EnvelopeError::LengthOverflow)?;
        let aad_len = u64::try_from(aad.len()).map_err(|_| EnvelopeError::LengthOverflow)?;

        let mut result = Vec::with_capacity(Self::ENVELOPE_OVERHEAD + ciphertext.len() + aad.len());
        result.put_slice(public_key.as_bytes());
        result.put_u64_le(cipher_len);
        result.put_u64_le(aad_len);
        result.put_slice(&ciphertext);
        result.put_slice(aad);
        result.put_slice(nonce);

        trace!("encrypted {} bytes into an envelope of {} bytes", plaintext.len(), result.len());
        Ok(result)
    }

    /// Parses an envelope and opens it with `private_key`. The envelope's length is checked against
    ///  its length fields before any decryption is attempted.
    pub fn decrypt(envelope: &[u8], private_key: &PrivateKey) -> Result<Decryption, EnvelopeError> {
        let parts = Self::split_envelope(envelope)?;

        let nonce = Self::nonce_from_slice(parts.nonce)?;
        let plaintext = Self::open(&nonce, parts.ciphertext, parts.aad, &parts.peer_public_key, private_key)?;

        Ok(Decryption {
            plaintext,
            aad: parts.aad.to_vec(),
            nonce: parts.nonce.to_vec(),
            peer_public_key: parts.peer_public_key,
        })
    }

    fn split_envelope(envelope: &[u8]) -> Result<EnvelopeParts<'_>, EnvelopeError> {
        if envelope.len() < Self::ENVELOPE_OVERHEAD {
            return Err(EnvelopeError::TooShort { len: envelope.len(), min: Self::ENVELOPE_OVERHEAD });
        }

        let peer_public_key = PublicKey::from_slice(&envelope[..KEY_LEN])?;
        let mut buf = &envelope[KEY_LEN..];
        let cipher_len = buf.get_u64_le();
        let aad_len = buf.get_u64_le();

        // u128 so that absurd declared lengths can not overflow
        let declared = Self::ENVELOPE_OVERHEAD as u128 + cipher_len as u128 + aad_len as u128;
        if declared != envelope.len() as u128 {
            debug!("envelope length {} does not match declared length {}", envelope.len(), declared);
            return Err(EnvelopeError::LengthMismatch { declared, actual: envelope.len() });
        }

        // the length check guarantees both lengths are below envelope.len()
        let cipher_len: usize = cipher_len.prechecked_cast();
        let aad_len: usize = aad_len.prechecked_cast();

        let (ciphertext, rest) = buf.split_at(cipher_len);
        let (aad, nonce) = rest.split_at(aad_len);
        Ok(EnvelopeParts {
            peer_public_key,
            ciphertext,
            aad,
            nonce,
        })
    }
}

struct EnvelopeParts<'a> {
    peer_public_key: PublicKey,
    ciphertext: &'a [u8],
    aad: &'a [u8],
    nonce: &'a [u8],
}
