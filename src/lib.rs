//! Client side of the Oasis gateway protocol: reaching services through a gateway over an
//!  unreliable network, optionally with end-to-end encryption that the gateway can not read.
//!
//! There are two kinds of gateway (see [gateway]):
//! * the developer gateway, which accepts requests over HTTP and produces responses
//!   asynchronously on a queue that the client long-polls (see [polling]), and
//! * web3 gateways, which speak JSON-RPC over a websocket (see [transport]). The websocket
//!   reconnects transparently, resending requests that have not been answered yet.
//!
//! Confidential services encrypt their traffic with keys derived from X25519 key pairs (see
//!  [confidential]). An encrypted message travels as a self-describing envelope:
//!
//! ```ascii
//! 0:  sender public key (32 bytes)
//! 32: ciphertext length (u64 LE)
//! 40: aad length (u64 LE)
//! 48: ciphertext, followed by aad, followed by the nonce (15 bytes for Deoxys-II)
//! ```
//!
//! Whether a service is confidential is recorded in a header in front of its bytecode (see
//!  [deploy]):
//!
//! ```ascii
//! 0: magic b"\0sis"
//! 4: version (u16 BE)
//! 6: body length (u16 BE)
//! 8: body: JSON object with the optional keys "expiry" and "confidential"
//! ```

pub mod api;
pub mod config;
pub mod confidential;
pub mod deploy;
pub mod error;
pub mod gateway;
pub mod http;
pub mod polling;
pub mod transport;
pub mod util;

#[cfg(test)] mod test_util;
