use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::TransportError;

#[derive(Serialize, Debug)]
pub struct JsonRpcRequest<'a> {
    pub id: u64,
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> JsonRpcRequest<'a> {
        JsonRpcRequest {
            id,
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SubscriptionParams {
    pub subscription: Value,
    #[serde(default)]
    pub result: Value,
}

/// Anything the gateway sends: either a response to a request (`id` set), or a push notification
///  for a subscription (`params.subscription` set)
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct IncomingFrame {
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Value,
    pub error: Option<JsonRpcError>,
    pub params: Option<Value>,
}

pub enum Incoming {
    Response { id: u64, result: Result<Value, TransportError> },
    Notification { subscription: String, result: Value },
    Unknown,
}

impl IncomingFrame {
    pub fn parse(text: &str) -> Result<Incoming, TransportError> {
        let frame: IncomingFrame = serde_json::from_str(text)
            .map_err(|e| TransportError::Serde(e.to_string()))?;

        if let Some(params) = &frame.params {
            if let Ok(params) = serde_json::from_value::<SubscriptionParams>(params.clone()) {
                return Ok(Incoming::Notification {
                    subscription: subscription_key(&params.subscription),
                    result: params.result,
                });
            }
        }

        let Some(id) = frame.id.as_ref().and_then(parse_id) else {
            return Ok(Incoming::Unknown);
        };

        let result = match frame.error {
            Some(error) => Err(TransportError::Rpc { code: error.code, message: error.message }),
            None => Ok(frame.result),
        };
        Ok(Incoming::Response { id, result })
    }
}

/// ids go out as numbers, but some servers echo them back as strings
fn parse_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Subscription ids are usually hex strings, but are not guaranteed to be
pub fn subscription_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
