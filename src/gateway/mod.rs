//! The gateway a client talks to, behind a uniform interface: the developer gateway (HTTP with
//!  long-polled responses) or a web3 gateway (JSON-RPC over a websocket).

use std::sync::Arc;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use crate::confidential::key_store::KeyProvider;
use crate::confidential::keys::PublicKey;
use crate::error::GatewayResult;
use crate::transport::connection_state::ConnectionState;

pub mod coder;
pub mod developer_gateway;
pub mod facade;
pub mod web3_gateway;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RpcOptions {
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u64>,
    pub value: Option<u64>,
    /// additional authenticated data for confidential requests
    pub aad: Option<String>,
}

impl RpcOptions {
    /// true if any of the options are parameters of the transaction itself (as opposed to
    ///  client side encoding)
    pub fn has_transaction_params(&self) -> bool {
        self.gas_limit.is_some() || self.gas_price.is_some() || self.value.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployRequest {
    /// bytecode, including the deploy header if there is one
    pub data: Vec<u8>,
    pub options: Option<RpcOptions>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployResponse {
    pub address: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcRequest {
    pub data: Vec<u8>,
    pub address: Vec<u8>,
    pub options: Option<RpcOptions>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcResponse {
    /// hex encoded output
    pub output: String,
    /// set if execution failed
    pub error: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub address: Vec<u8>,
    pub topics: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// local name for the subscription, used to unsubscribe
    pub event: String,
    pub filter: SubscribeFilter,
}

/// Events of a subscription, in the order the gateway produced them
pub type EventStream = mpsc::UnboundedReceiver<Value>;

/// The client's interface to a gateway
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OasisGateway: Send + Sync + 'static {
    async fn deploy(&self, request: DeployRequest) -> GatewayResult<DeployResponse>;

    async fn rpc(&self, request: RpcRequest) -> GatewayResult<RpcResponse>;

    async fn subscribe(&self, request: SubscribeRequest) -> GatewayResult<EventStream>;

    async fn unsubscribe(&self, event: &str) -> GatewayResult<()>;

    /// `None` if the service has no public key, i.e. is not confidential
    async fn public_key(&self, address: &[u8]) -> GatewayResult<Option<PublicKey>>;

    /// `None` if there is no code at the address
    async fn get_code(&self, address: &[u8]) -> GatewayResult<Option<Vec<u8>>>;

    async fn disconnect(&self);

    /// Advisory connection health for gateways that reconnect internally. Gateways where every
    ///  request reports its own connection problems never emit anything here.
    fn connection_state(&self) -> broadcast::Receiver<ConnectionState>;

    /// true if the gateway signs transactions on the client side
    fn has_signer(&self) -> bool;
}

/// Serves public keys for the key store by asking the gateway
pub struct GatewayKeyProvider(pub Arc<dyn OasisGateway>);

#[async_trait]
impl KeyProvider for GatewayKeyProvider {
    async fn public_key(&self, address: &[u8]) -> anyhow::Result<Option<PublicKey>> {
        Ok(self.0.public_key(address).await?)
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub(crate) fn parse_hex(s: &str) -> GatewayResult<Vec<u8>> {
    Ok(hex::decode(s.strip_prefix("0x").unwrap_or(s))?)
}
