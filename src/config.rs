use std::fmt::{Debug, Formatter};
use std::time::Duration;
use anyhow::bail;

/// How to authenticate with the gateway, detected from the raw credential string by
///  [Credential::detect]
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// developer gateway API token, sent as a header with every HTTP request
    ApiToken(String),
    /// 32 byte hex private key for signing transactions
    PrivateKey(String),
    /// BIP-39 style word list for deriving a signing key
    Mnemonic(String),
}

impl Credential {
    const MNEMONIC_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

    pub fn detect(raw: &str) -> anyhow::Result<Credential> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("credential must not be empty");
        }

        let hex_digits = raw.strip_prefix("0x").unwrap_or(raw);
        if hex_digits.len() == 64 && hex_digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Credential::PrivateKey(hex_digits.to_string()));
        }

        let words = raw.split_whitespace().collect::<Vec<_>>();
        if Self::MNEMONIC_WORD_COUNTS.contains(&words.len())
            && words.iter().all(|w| w.chars().all(|c| c.is_ascii_lowercase()))
        {
            return Ok(Credential::Mnemonic(words.join(" ")));
        }

        Ok(Credential::ApiToken(raw.to_string()))
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiToken(_) => write!(f, "ApiToken(..)"),
            Credential::PrivateKey(_) => write!(f, "PrivateKey(..)"),
            Credential::Mnemonic(_) => write!(f, "Mnemonic(..)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayKind {
    /// developer gateway: HTTP requests, responses are long-polled
    Http,
    /// web3 JSON-RPC over a websocket
    WebSocket,
}

pub struct GatewayConfig {
    /// Base URL of the gateway. The scheme selects the protocol: `http(s)://` for the developer
    ///  gateway's long-poll API, `ws(s)://` for web3 JSON-RPC over a websocket.
    pub url: String,

    pub credential: Option<Credential>,

    /// Additional HTTP headers for every developer gateway request
    pub headers: Vec<(String, String)>,

    /// Interval between two polls of a response or subscription queue
    pub polling_interval: Duration,

    /// A poll loop that received nothing for this long stops. It is restarted on demand.
    pub idle_timeout: Duration,

    /// Each websocket request fails with a timeout if there is no response after this duration,
    ///  regardless of reconnects in between.
    pub request_timeout: Duration,

    /// Number of consecutive websocket errors without a successful (re)connect after which the
    ///  connection is reported as being in trouble
    pub error_threshold: u32,

    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>, credential: Option<Credential>) -> GatewayConfig {
        GatewayConfig {
            url: url.into(),
            credential,
            headers: Vec::new(),
            polling_interval: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            error_threshold: 2,
            reconnect_initial_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(5),
        }
    }

    pub fn kind(&self) -> anyhow::Result<GatewayKind> {
        let url = self.url.to_ascii_lowercase();
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(GatewayKind::Http)
        }
        else if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(GatewayKind::WebSocket)
        }
        else {
            bail!("unsupported gateway url {}: expected http(s):// or ws(s)://", self.url)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let kind = self.kind()?;

        if self.polling_interval.is_zero() {
            bail!("polling interval must be positive");
        }
        if self.idle_timeout < self.polling_interval {
            bail!("idle timeout must not be shorter than the polling interval");
        }
        if self.request_timeout.is_zero() {
            bail!("request timeout must be positive");
        }
        if self.error_threshold == 0 {
            bail!("error threshold must be at least 1");
        }
        if self.reconnect_initial_delay > self.reconnect_max_delay {
            bail!("initial reconnect delay must not exceed the maximum reconnect delay");
        }
        if kind == GatewayKind::Http && !matches!(self.credential, None | Some(Credential::ApiToken(_))) {
            bail!("the developer gateway authenticates with an API token only");
        }

        Ok(())
    }

    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            interval: self.polling_interval,
            idle_timeout: self.idle_timeout,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.url.clone(),
            request_timeout: self.request_timeout,
            error_threshold: self.error_threshold,
            reconnect_initial_delay: self.reconnect_initial_delay,
            reconnect_max_delay: self.reconnect_max_delay,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PollingConfig {
    pub interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            interval: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub url: String,
    pub request_timeout: Duration,
    pub error_threshold: u32,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> TransportConfig {
        GatewayConfig::new(url, None).transport_config()
    }
}
