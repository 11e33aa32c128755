//! End-to-end encryption between this client and a service, opaque to the gateway in between.
//!
//! Keys are X25519 key pairs. The AEAD key for a message is derived from the sender's private key
//!  and the receiver's public key (see [kdf]), and messages travel in self-describing envelopes
//!  (see [envelope]) so the receiver needs no context beyond its own private key.

pub mod envelope;
pub mod kdf;
pub mod key_store;
pub mod keys;
pub mod mrae;
