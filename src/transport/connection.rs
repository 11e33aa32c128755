use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;

pub const CLOSE_NORMAL: u16 = 1000;
/// reported for connections that ended without a close frame, e.g. a failed handshake
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Lifecycle notifications of a single connection attempt, in the order they happen: `Open` once
///  connected, then any number of `Message`s and `Error`s, and finally `Close`. A failed attempt
///  reports `Error` and `Close(CLOSE_ABNORMAL)` without `Open`.
pub enum SocketEvent {
    Open(Arc<dyn DuplexConnection>),
    Message(String),
    Error(String),
    Close(u16),
}

impl Debug for SocketEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketEvent::Open(_) => write!(f, "Open"),
            SocketEvent::Message(msg) => write!(f, "Message({})", msg),
            SocketEvent::Error(e) => write!(f, "Error({})", e),
            SocketEvent::Close(code) => write!(f, "Close({})", code),
        }
    }
}

/// Events tagged with the generation of the connection attempt they belong to
pub type SocketEventSender = mpsc::UnboundedSender<(u64, SocketEvent)>;

/// The sending half of an open duplex connection. This is an abstraction over the websocket,
///  introduced to facilitate mocking the I/O part away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DuplexConnection: Send + Sync + 'static {
    async fn send_text(&self, frame: String) -> anyhow::Result<()>;

    /// Initiates the close handshake. The connection reports `Close` when it is done.
    async fn close(&self, code: u16);
}

/// Opens connections. Connecting happens in the background, and the attempt's progress is
///  reported through `events`, tagged with `generation`.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str, generation: u64, events: SocketEventSender);
}
