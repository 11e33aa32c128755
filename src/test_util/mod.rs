//! Test doubles for the network side of the gateways

pub mod connector;
