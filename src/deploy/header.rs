use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use crate::error::HeaderError;
use crate::util::safe_converter::{PrecheckedCast, SafeCast};


/// The metadata block that can be prepended to program bytecode on deployment:
///
/// ```ascii
/// 0: magic b"\0sis"
/// 4: version (u16 BE)
/// 6: body length (u16 BE)
/// 8: body (UTF-8 JSON object), followed immediately by the bytecode
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployHeader {
    pub version: u16,
    pub body: DeployHeaderBody,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployHeaderBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidential: Option<bool>,
}

impl DeployHeaderBody {
    pub const VALID_KEYS: [&'static str; 2] = ["expiry", "confidential"];

    pub fn is_empty(&self) -> bool {
        self.expiry.is_none() && self.confidential.is_none()
    }

    /// Validates and converts an untyped body. Every key must be one of [Self::VALID_KEYS]: an
    ///  unknown key invalidates the whole body rather than being dropped.
    pub fn from_json(body: &Value) -> Result<DeployHeaderBody, HeaderError> {
        let Some(map) = body.as_object() else {
            return Err(HeaderError::InvalidBody(format!("expected a JSON object, was {}", body)));
        };

        if let Some(invalid) = map.keys().find(|k| !Self::VALID_KEYS.contains(&k.as_str())) {
            return Err(HeaderError::InvalidKey(invalid.clone()));
        }

        serde_json::from_value(body.clone())
            .map_err(|e| HeaderError::InvalidBody(e.to_string()))
    }

    /// `other`'s fields override those present in `self`
    pub fn merge(&mut self, other: &DeployHeaderBody) {
        if other.expiry.is_some() {
            self.expiry = other.expiry;
        }
        if other.confidential.is_some() {
            self.confidential = other.confidential;
        }
    }
}

impl DeployHeader {
    pub const MAGIC: [u8; 4] = *b"\0sis";
    pub const CURRENT_VERSION: u16 = 1;
    /// magic + version + body length
    pub const PREFIX_LEN: usize = 4 + 2 + 2;

    pub fn new(body: DeployHeaderBody) -> DeployHeader {
        DeployHeader {
            version: Self::CURRENT_VERSION,
            body,
        }
    }

    pub fn is_confidential(&self) -> bool {
        self.body.confidential.unwrap_or(false)
    }

    pub fn ser(&self, buf: &mut impl BufMut) -> Result<(), HeaderError> {
        let body = serde_json::to_vec(&self.body)
            .map_err(|e| HeaderError::InvalidBody(e.to_string()))?;
        if body.len() > u16::MAX as usize {
            return Err(HeaderError::BodyTooLong(body.len()));
        }

        buf.put_slice(&Self::MAGIC);
        buf.put_u16(self.version);
        buf.put_u16(body.len().prechecked_cast());
        buf.put_slice(&body);
        Ok(())
    }

    /// Parses the header at the start of `bytecode`, returning it together with its serialized
    ///  length. No header (i.e. no magic) is `None`, not an error.
    pub fn deser(bytecode: &[u8]) -> Result<Option<(DeployHeader, usize)>, HeaderError> {
        if !bytecode.starts_with(&Self::MAGIC) {
            return Ok(None);
        }
        if bytecode.len() < Self::PREFIX_LEN {
            return Err(HeaderError::Truncated);
        }

        let mut buf = &bytecode[Self::MAGIC.len()..];
        let version = buf.get_u16();
        let body_len: usize = buf.get_u16().safe_cast();
        if buf.remaining() < body_len {
            debug!("deploy header declares a body of {} bytes, but only {} remain", body_len, buf.remaining());
            return Err(HeaderError::Truncated);
        }

        let body: Value = serde_json::from_slice(&buf[..body_len])
            .map_err(|e| HeaderError::InvalidBody(e.to_string()))?;
        let body = DeployHeaderBody::from_json(&body)?;

        trace!("parsed deploy header version {}: {:?}", version, body);
        Ok(Some((DeployHeader { version, body }, Self::PREFIX_LEN + body_len)))
    }
}

/// Prepends a deploy header to `bytecode`, merging `body` into an existing header if there is one.
///  The result is always serialized with the current header version. An empty body leaves the
///  bytecode untouched.
pub fn write(body: &DeployHeaderBody, bytecode: &[u8]) -> Result<Vec<u8>, HeaderError> {
    if bytecode.is_empty() {
        return Err(HeaderError::EmptyBytecode);
    }
    if body.is_empty() {
        return Ok(bytecode.to_vec());
    }

    let (mut header_body, payload) = match DeployHeader::deser(bytecode)? {
        Some((existing, header_len)) => (existing.body, &bytecode[header_len..]),
        None => (DeployHeaderBody::default(), bytecode),
    };
    header_body.merge(body);

    let mut result = Vec::with_capacity(bytecode.len() + DeployHeader::PREFIX_LEN + 64);
    DeployHeader::new(header_body).ser(&mut result)?;
    result.put_slice(payload);
    Ok(result)
}

/// Untyped variant of [write], validating the keys before touching any bytes
pub fn write_json(body: &Value, bytecode: &[u8]) -> Result<Vec<u8>, HeaderError> {
    let body = DeployHeaderBody::from_json(body)?;
    write(&body, bytecode)
}

pub fn read(bytecode: &[u8]) -> Result<Option<DeployHeader>, HeaderError> {
    Ok(DeployHeader::deser(bytecode)?
        .map(|(header, _)| header))
}

/// The bytecode after the deploy header, or all of it if there is no header
pub fn extract_payload(bytecode: &[u8]) -> Result<&[u8], HeaderError> {
    match DeployHeader::deser(bytecode)? {
        Some((_, header_len)) => Ok(&bytecode[header_len..]),
        None => Ok(bytecode),
    }
}
