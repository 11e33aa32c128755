//! Paths and payloads of the developer gateway's `v0/api` HTTP surface

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub path: &'static str,
    pub method: HttpMethod,
}

impl ApiEndpoint {
    const fn post(path: &'static str) -> ApiEndpoint {
        ApiEndpoint { path, method: HttpMethod::Post }
    }
}

pub const DEPLOY_API: ApiEndpoint = ApiEndpoint::post("v0/api/service/deploy");
pub const RPC_API: ApiEndpoint = ApiEndpoint::post("v0/api/service/execute");
pub const PUBLIC_KEY_API: ApiEndpoint = ApiEndpoint::post("v0/api/service/getPublicKey");
pub const GET_CODE_API: ApiEndpoint = ApiEndpoint::post("v0/api/service/getCode");
pub const SERVICE_POLL_API: ApiEndpoint = ApiEndpoint::post("v0/api/service/poll");
pub const SUBSCRIBE_API: ApiEndpoint = ApiEndpoint::post("v0/api/event/subscribe");
pub const SUBSCRIBE_POLL_API: ApiEndpoint = ApiEndpoint::post("v0/api/event/poll");
pub const UNSUBSCRIBE_API: ApiEndpoint = ApiEndpoint::post("v0/api/event/unsubscribe");
pub const HEALTH_API: ApiEndpoint = ApiEndpoint { path: "v0/api/health", method: HttpMethod::Get };

/// Reply to a request that completes asynchronously: `id` is the offset to poll for
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AsyncResponse {
    pub id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub offset: u64,
    pub events: Option<Vec<Value>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub offset: u64,
    pub discard_previous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// An event polled from the service queue. The variants are told apart by their fields, the way
///  the gateway sends them.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Error(ErrorEvent),
    ExecuteService(ExecuteServiceEvent),
    PublicKey(PublicKeyEvent),
    Deploy(DeployEvent),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ExecuteServiceEvent {
    pub id: u64,
    pub address: String,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyEvent {
    pub id: u64,
    pub public_key: String,
    pub timestamp: Option<u64>,
    pub signature: Option<String>,
}

/// Direct reply of the public key endpoint. Services without a key have no `publicKey`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: Option<String>,
    pub timestamp: Option<u64>,
    pub signature: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeployEvent {
    pub id: u64,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorEvent {
    pub id: u64,
    pub cause: ErrorCause,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCause {
    pub error_code: i64,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GetCodeResponse {
    pub code: String,
}
