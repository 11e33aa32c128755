use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;
use crate::api::{ApiEndpoint, HttpMethod};
use crate::error::{GatewayError, GatewayResult};

/// Issues JSON requests against the developer gateway. This is an abstraction over the actual
///  HTTP client, introduced to facilitate mocking the I/O part away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Http: Send + Sync + 'static {
    async fn request(&self, api: ApiEndpoint, body: Value) -> GatewayResult<Value>;
}

/// An HTTP session with the gateway. All requests of a session carry the same random session key.
pub struct HttpSession {
    url: String,
    session_key: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl HttpSession {
    pub const SESSION_KEY_HEADER: &'static str = "X-OASIS-SESSION-KEY";
    pub const API_TOKEN_HEADER: &'static str = "X-OASIS-INSECURE-AUTH";

    pub fn new(url: &str, headers: Vec<(String, String)>) -> HttpSession {
        HttpSession {
            url: url.trim_end_matches('/').to_string(),
            session_key: Uuid::new_v4().to_string(),
            headers,
            client: reqwest::Client::new(),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    fn uri(&self, api: ApiEndpoint) -> String {
        format!("{}/{}", self.url, api.path)
    }
}

#[async_trait]
impl Http for HttpSession {
    async fn request(&self, api: ApiEndpoint, body: Value) -> GatewayResult<Value> {
        let uri = self.uri(api);
        trace!("{:?} {}: {}", api.method, uri, body);

        let mut request = match api.method {
            HttpMethod::Get => self.client.get(&uri),
            HttpMethod::Post => self.client.post(&uri)
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(&body)?),
        };
        request = request.header(Self::SESSION_KEY_HEADER, self.session_key.as_str());
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        let status = response.status();
        let bytes = response.bytes().await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !status.is_success() {
            debug!("{} returned status {}", uri, status);
            return Err(GatewayError::Http(format!("{} returned status {}: {}", uri, status, String::from_utf8_lossy(&bytes))));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{HEALTH_API, RPC_API};

    #[test]
    fn test_uri() {
        let session = HttpSession::new("https://gateway.example.com/", vec![]);
        assert_eq!(session.uri(RPC_API), "https://gateway.example.com/v0/api/service/execute");
        assert_eq!(session.uri(HEALTH_API), "https://gateway.example.com/v0/api/health");
    }

    #[test]
    fn test_session_key() {
        let a = HttpSession::new("http://localhost:1234", vec![]);
        let b = HttpSession::new("http://localhost:1234", vec![]);

        assert_eq!(a.session_key().len(), 36);
        assert!(Uuid::parse_str(a.session_key()).is_ok());
        assert_ne!(a.session_key(), b.session_key());
    }
}
