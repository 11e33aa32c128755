use crate::confidential::keys::{KeyPair, PublicKey};
use crate::confidential::mrae::DeoxysBox;
use crate::error::EnvelopeError;

/// Encodes requests to a service and decodes its responses: in the clear, or encrypted end-to-end
///  for confidential services
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Coder {
    Plaintext,
    Confidential(ConfidentialCoder),
}

impl Coder {
    pub fn is_confidential(&self) -> bool {
        matches!(self, Coder::Confidential(_))
    }

    pub fn encode(&self, data: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            Coder::Plaintext => Ok(data.to_vec()),
            Coder::Confidential(coder) => coder.encode(data, aad),
        }
    }

    pub fn decode(&self, output: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            Coder::Plaintext => Ok(output.to_vec()),
            Coder::Confidential(coder) => coder.decode(output),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfidentialCoder {
    peer_public_key: PublicKey,
    keys: KeyPair,
}

impl ConfidentialCoder {
    pub fn new(peer_public_key: PublicKey, keys: KeyPair) -> ConfidentialCoder {
        ConfidentialCoder {
            peer_public_key,
            keys,
        }
    }

    pub fn peer_public_key(&self) -> &PublicKey {
        &self.peer_public_key
    }

    /// Confidential requests must carry non-empty AAD
    pub fn encode(&self, data: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, EnvelopeError> {
        let aad = match aad {
            Some(aad) if !aad.is_empty() => aad,
            _ => return Err(EnvelopeError::MissingAad),
        };

        DeoxysBox::encrypt(
            &DeoxysBox::nonce(),
            data,
            &self.peer_public_key,
            &self.keys.public_key,
            &self.keys.private_key,
            aad,
        )
    }

    /// Service output is encrypted for this client's key pair
    pub fn decode(&self, output: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        Ok(DeoxysBox::decrypt(output, &self.keys.private_key)?.plaintext)
    }
}
