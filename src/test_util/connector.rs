use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde_json::{json, Value};
use crate::transport::connection::{Connector, DuplexConnection, SocketEvent, SocketEventSender};

/// Produces the result (or a JSON-RPC error with code and message) for a request's method and
///  params
pub type Responder = dyn Fn(&str, &Value) -> Result<Value, (i64, String)> + Send + Sync;

/// Connects immediately and answers every request through a [Responder]. Requests are recorded
///  for later assertions.
pub struct ScriptedConnector {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<Value>>>,
    latest: Arc<Mutex<Option<(u64, SocketEventSender)>>>,
}

impl ScriptedConnector {
    pub fn new(responder: impl Fn(&str, &Value) -> Result<Value, (i64, String)> + Send + Sync + 'static) -> ScriptedConnector {
        ScriptedConnector {
            responder: Arc::new(responder),
            requests: Default::default(),
            latest: Default::default(),
        }
    }

    /// recorded requests as `(method, params)`
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap()
            .iter()
            .map(|r| (r["method"].as_str().unwrap_or_default().to_string(), r["params"].clone()))
            .collect()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter()
            .map(|(method, _)| method)
            .collect()
    }

    /// Sends a raw frame from the server side of the current connection
    pub fn push(&self, frame: Value) {
        let latest = self.latest.lock().unwrap();
        let (generation, events) = latest.as_ref().unwrap();
        events.send((*generation, SocketEvent::Message(frame.to_string()))).unwrap();
    }
}

impl Connector for Arc<ScriptedConnector> {
    fn connect(&self, _url: &str, generation: u64, events: SocketEventSender) {
        *self.latest.lock().unwrap() = Some((generation, events.clone()));

        let connection = Arc::new(ScriptedConnection {
            responder: self.responder.clone(),
            requests: self.requests.clone(),
            generation,
            events: events.clone(),
        });
        let _ = events.send((generation, SocketEvent::Open(connection)));
    }
}

struct ScriptedConnection {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<Value>>>,
    generation: u64,
    events: SocketEventSender,
}

#[async_trait]
impl DuplexConnection for ScriptedConnection {
    async fn send_text(&self, frame: String) -> anyhow::Result<()> {
        let request: Value = serde_json::from_str(&frame)?;
        self.requests.lock().unwrap().push(request.clone());

        let method = request["method"].as_str().unwrap_or_default();
        let response = match (self.responder)(method, &request["params"]) {
            Ok(result) => json!({ "id": request["id"], "jsonrpc": "2.0", "result": result }),
            Err((code, message)) => json!({ "id": request["id"], "jsonrpc": "2.0", "error": { "code": code, "message": message } }),
        };
        let _ = self.events.send((self.generation, SocketEvent::Message(response.to_string())));
        Ok(())
    }

    async fn close(&self, code: u16) {
        let _ = self.events.send((self.generation, SocketEvent::Close(code)));
    }
}
