use std::sync::Arc;
use async_trait::async_trait;
use async_tungstenite::tokio::{connect_async, ConnectStream};
use async_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use async_tungstenite::tungstenite::protocol::CloseFrame;
use async_tungstenite::tungstenite::Message;
use async_tungstenite::WebSocketStream;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use crate::transport::connection::{Connector, DuplexConnection, SocketEvent, SocketEventSender, CLOSE_ABNORMAL};

/// status code for a close frame without a code
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens websocket connections with async-tungstenite. Each connection gets a reader task that
///  turns incoming frames into [SocketEvent]s.
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str, generation: u64, events: SocketEventSender) {
        let url = url.to_string();
        tokio::spawn(async move {
            let ws = match connect_async(url.as_str()).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    debug!("connecting to {} failed: {}", url, e);
                    let _ = events.send((generation, SocketEvent::Error(e.to_string())));
                    let _ = events.send((generation, SocketEvent::Close(CLOSE_ABNORMAL)));
                    return;
                }
            };

            let (sink, mut stream) = StreamExt::split(ws);
            let connection = Arc::new(TungsteniteConnection {
                sink: Mutex::new(sink),
            });
            if events.send((generation, SocketEvent::Open(connection))).is_err() {
                // the socket is gone
                return;
            }

            let mut code = CLOSE_ABNORMAL;
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = events.send((generation, SocketEvent::Message(text.as_str().to_owned())));
                    }
                    Ok(Message::Close(frame)) => {
                        code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(CLOSE_NO_STATUS);
                        break;
                    }
                    Ok(other) => trace!("ignoring websocket frame {:?}", other),
                    Err(e) => {
                        let _ = events.send((generation, SocketEvent::Error(e.to_string())));
                        break;
                    }
                }
            }
            trace!("connection #{} to {} closed with code {}", generation, url, code);
            let _ = events.send((generation, SocketEvent::Close(code)));
        });
    }
}

struct TungsteniteConnection {
    sink: Mutex<SplitSink<WebSocketStream<ConnectStream>, Message>>,
}

#[async_trait]
impl DuplexConnection for TungsteniteConnection {
    async fn send_text(&self, frame: String) -> anyhow::Result<()> {
        self.sink.lock().await
            .send(Message::text(frame)).await?;
        Ok(())
    }

    async fn close(&self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.sink.lock().await.send(Message::Close(Some(frame))).await {
            debug!("error closing websocket: {}", e);
        }
    }
}
