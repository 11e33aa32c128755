use thiserror::Error;

/// Faults of the websocket JSON-RPC transport that are visible to the caller of a single request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request {id} timed out")]
    Timeout { id: u64 },
    #[error("connection was closed before a response arrived")]
    Disconnected,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed frame: {0}")]
    Serde(String),
}

/// Faults when building or parsing a confidential envelope. Authentication failure is kept
///  separate from the format errors: it means corruption or tampering, not a malformed message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope of {len} bytes is shorter than the minimum of {min} bytes")]
    TooShort { len: usize, min: usize },
    #[error("envelope length {actual} does not match the declared length {declared}")]
    LengthMismatch { declared: u128, actual: usize },
    #[error("ciphertext or aad length does not fit the length field")]
    LengthOverflow,
    #[error("authentication failed")]
    Authentication,
    #[error("encryption failed")]
    Encryption,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("aad must not be empty for a confidential request")]
    MissingAad,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("bytecode must not be empty")]
    EmptyBytecode,
    #[error("invalid deploy header key: {0}")]
    InvalidKey(String),
    #[error("invalid deploy header body: {0}")]
    InvalidBody(String),
    #[error("deploy header body of {0} bytes exceeds the two byte length field")]
    BodyTooLong(usize),
    #[error("deploy header is truncated")]
    Truncated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("key provider did not return a public key for {0}")]
    MissingPublicKey(String),
    #[error("corrupt key store entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("key provider failed: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("gateway error {code}: {description}")]
    Poll { code: i64, description: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
    #[error("the gateway needs a signer for {0}")]
    NoSigner(&'static str),
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("no subscription exists for event {0}")]
    NoSubscription(String),
    #[error("polling stopped before the response arrived")]
    PollingStopped,
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    #[error("could not fetch the transaction receipt")]
    ReceiptUnavailable,
    #[error("{0} is not supported by this gateway")]
    Unsupported(&'static str),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no code deployed at {0}")]
    NoCode(String),
    #[error("gateway {0} is not responding")]
    Unresponsive(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(value: serde_json::Error) -> Self {
        GatewayError::InvalidResponse(value.to_string())
    }
}

impl From<hex::FromHexError> for GatewayError {
    fn from(value: hex::FromHexError) -> Self {
        GatewayError::InvalidResponse(value.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
