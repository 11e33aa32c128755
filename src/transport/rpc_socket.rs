use std::collections::BTreeMap;
use std::sync::Arc;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::transport::connection::{Connector, DuplexConnection, SocketEvent, SocketEventSender, CLOSE_NORMAL};
use crate::transport::connection_state::{ConnectionState, ConnectionStateNotifier};
use crate::transport::rpc_frame::{Incoming, IncomingFrame, JsonRpcRequest};
use crate::util::exponential_backoff::ExponentialBackoff;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Connecting,
    Open,
    Closed,
}

struct PendingRequest {
    /// the serialized request, kept for resending it on reconnect with the same id
    frame: String,
    reply: oneshot::Sender<Result<Value, TransportError>>,
    timeout_handle: JoinHandle<()>,
}

struct RpcSocketInner {
    lifecycle: Lifecycle,
    /// incremented per connection attempt, to filter events from connections that were replaced
    generation: u64,
    connection: Option<Arc<dyn DuplexConnection>>,
    /// disconnect was requested while connecting
    close_on_open: bool,
    consecutive_errors: u32,
    next_id: u64,
    pending: BTreeMap<u64, PendingRequest>,
    /// listeners by subscription id
    subscriptions: FxHashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
    backoff: ExponentialBackoff,
}

impl RpcSocketInner {
    fn reject_all(&mut self) {
        for (id, pending) in std::mem::take(&mut self.pending) {
            trace!("rejecting request {}: connection is closed", id);
            pending.timeout_handle.abort();
            let _ = pending.reply.send(Err(TransportError::Disconnected));
        }
        self.subscriptions.clear();
    }
}

struct Shared {
    config: Arc<TransportConfig>,
    connector: Arc<dyn Connector>,
    events: SocketEventSender,
    state_notifier: ConnectionStateNotifier,
    inner: RwLock<RpcSocketInner>,
}

/// JSON-RPC over a duplex connection that survives connection loss.
///
/// Requests are kept until they are answered or time out. Whenever a connection opens, all
///  pending requests are (re)sent with their original ids, so a request issued before a connection
///  drop is answered after the reconnect. The server may see a request twice; the first response
///  wins, and later ones are dropped.
///
/// Closing with a code other than 'normal' triggers a reconnect with exponential backoff.
///  Repeated connection errors are reported as [ConnectionState::Trouble], and the next successful
///  connect as [ConnectionState::Ok].
pub struct RpcSocket {
    shared: Arc<Shared>,
    event_loop: JoinHandle<()>,
}

impl Drop for RpcSocket {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl RpcSocket {
    /// Starts connecting in the background. Requests can be issued right away, they are sent once
    ///  the connection is open.
    pub fn connect(config: Arc<TransportConfig>, connector: Arc<dyn Connector>) -> RpcSocket {
        let (events, receiver) = mpsc::unbounded_channel();

        let backoff = ExponentialBackoff::new(config.reconnect_initial_delay, config.reconnect_max_delay);
        let shared = Arc::new(Shared {
            config,
            connector,
            events,
            state_notifier: ConnectionStateNotifier::new(),
            inner: RwLock::new(RpcSocketInner {
                lifecycle: Lifecycle::Connecting,
                generation: 0,
                connection: None,
                close_on_open: false,
                consecutive_errors: 0,
                next_id: 0,
                pending: BTreeMap::default(),
                subscriptions: FxHashMap::default(),
                backoff,
            }),
        });

        debug!("connecting to {}", shared.config.url);
        shared.connector.connect(&shared.config.url, 0, shared.events.clone());
        let event_loop = tokio::spawn(shared.clone().run_event_loop(receiver));

        RpcSocket {
            shared,
            event_loop,
        }
    }

    pub fn connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.state_notifier.subscribe()
    }

    pub async fn is_open(&self) -> bool {
        self.shared.inner.read().await.lifecycle == Lifecycle::Open
    }

    /// Sends a request and waits for its response. This fails if there is no response within the
    ///  configured timeout (reconnects notwithstanding), if the response carries an error, or if
    ///  the socket is closed for good.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let (reply, receiver) = oneshot::channel();

        let (id, connection, frame) = {
            let mut inner = self.shared.inner.write().await;
            if inner.lifecycle == Lifecycle::Closed || inner.close_on_open {
                return Err(TransportError::Disconnected);
            }

            let id = inner.next_id;
            let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, &params))
                .map_err(|e| TransportError::Serde(e.to_string()))?;
            inner.next_id += 1;

            let timeout_handle = tokio::spawn(self.shared.clone().expire(id));
            inner.pending.insert(id, PendingRequest {
                frame: frame.clone(),
                reply,
                timeout_handle,
            });

            let connection = match inner.lifecycle {
                Lifecycle::Open => inner.connection.clone(),
                _ => None,
            };
            (id, connection, frame)
        };

        match connection {
            Some(connection) => {
                trace!("sending request {}: {}", id, method);
                if let Err(e) = connection.send_text(frame).await {
                    debug!("sending request {} failed, it is resent on reconnect: {}", id, e);
                }
            }
            None => trace!("request {} waits for the connection to open", id),
        }

        receiver.await
            .unwrap_or(Err(TransportError::Disconnected))
    }

    /// Routes push notifications for a subscription id to the returned receiver. A subscription
    ///  can have several receivers, each of them gets every notification.
    ///
    /// NB: Notifications that arrive before the subscription is registered are dropped
    pub async fn add_subscription(&self, subscription_id: &str) -> mpsc::UnboundedReceiver<Value> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.inner.write().await
            .subscriptions.entry(subscription_id.to_string())
            .or_default()
            .push(sender);
        receiver
    }

    /// Drops all receivers of a subscription. Returns false if there was no such subscription.
    pub async fn remove_subscription(&self, subscription_id: &str) -> bool {
        self.shared.inner.write().await
            .subscriptions.remove(subscription_id)
            .is_some()
    }

    /// Closes the connection normally, without reconnecting. Pending requests fail with
    ///  [TransportError::Disconnected]. If the connection is still being established, it is
    ///  closed as soon as it opens.
    pub async fn disconnect(&self) {
        let mut inner = self.shared.inner.write().await;
        match inner.lifecycle {
            Lifecycle::Open => {
                info!("disconnecting from {}", self.shared.config.url);
                inner.lifecycle = Lifecycle::Closed;
                let connection = inner.connection.clone();
                drop(inner);
                if let Some(connection) = connection {
                    connection.close(CLOSE_NORMAL).await;
                }
            }
            Lifecycle::Connecting => {
                debug!("disconnect requested while connecting to {}: closing once open", self.shared.config.url);
                inner.close_on_open = true;
            }
            Lifecycle::Closed => {}
        }
    }

    #[cfg(test)]
    async fn pending_count(&self) -> usize {
        self.shared.inner.read().await.pending.len()
    }
}

impl Shared {
    async fn run_event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<(u64, SocketEvent)>) {
        while let Some((generation, event)) = events.recv().await {
            if generation != self.inner.read().await.generation {
                trace!("ignoring {:?} from replaced connection #{}", event, generation);
                continue;
            }

            match event {
                SocketEvent::Open(connection) => self.on_open(connection).await,
                SocketEvent::Message(text) => self.on_message(&text).await,
                SocketEvent::Error(e) => self.on_error(&e).await,
                SocketEvent::Close(code) => {
                    if !self.on_close(code).await {
                        break;
                    }
                }
            }
        }
        debug!("event loop for {} terminated", self.config.url);
    }

    async fn on_open(&self, connection: Arc<dyn DuplexConnection>) {
        let frames = {
            let mut inner = self.inner.write().await;
            inner.backoff.reset();

            if inner.close_on_open {
                debug!("connection to {} opened after disconnect was requested, closing it", self.config.url);
                inner.close_on_open = false;
                inner.lifecycle = Lifecycle::Closed;
                drop(inner);
                connection.close(CLOSE_NORMAL).await;
                return;
            }

            info!("connected to {}", self.config.url);
            inner.lifecycle = Lifecycle::Open;
            inner.connection = Some(connection.clone());
            if inner.consecutive_errors >= self.config.error_threshold {
                self.state_notifier.send_state(ConnectionState::Ok);
            }
            inner.consecutive_errors = 0;

            // in id order
            inner.pending.values()
                .map(|p| p.frame.clone())
                .collect::<Vec<_>>()
        };

        if !frames.is_empty() {
            debug!("sending {} pending requests", frames.len());
        }
        for frame in frames {
            if let Err(e) = connection.send_text(frame).await {
                debug!("sending pending requests failed, retrying on reconnect: {}", e);
                break;
            }
        }
    }

    async fn on_message(&self, text: &str) {
        let incoming = match IncomingFrame::parse(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("dropping frame from {}: {}", self.config.url, e);
                return;
            }
        };

        let mut inner = self.inner.write().await;
        match incoming {
            Incoming::Response { id, result } => {
                match inner.pending.remove(&id) {
                    Some(pending) => {
                        trace!("response for request {}", id);
                        pending.timeout_handle.abort();
                        let _ = pending.reply.send(result);
                    }
                    None => debug!("dropping response for request {}: not pending (any more)", id),
                }
            }
            Incoming::Notification { subscription, result } => {
                // NB: a notification that arrives before add_subscription registered its id is lost
                match inner.subscriptions.get_mut(&subscription) {
                    Some(listeners) => {
                        listeners.retain(|l| l.send(result.clone()).is_ok());
                        if listeners.is_empty() {
                            debug!("all listeners for subscription {} are gone", subscription);
                            inner.subscriptions.remove(&subscription);
                        }
                    }
                    None => debug!("dropping notification for unknown subscription {}", subscription),
                }
            }
            Incoming::Unknown => debug!("dropping unrecognized frame: {}", text),
        }
    }

    async fn on_error(&self, error: &str) {
        let mut inner = self.inner.write().await;
        inner.consecutive_errors += 1;
        warn!("error on connection to {} ({} in a row): {}", self.config.url, inner.consecutive_errors, error);

        if inner.consecutive_errors == self.config.error_threshold {
            self.state_notifier.send_state(ConnectionState::Trouble);
        }
    }

    /// returns false once the socket is closed for good
    async fn on_close(&self, code: u16) -> bool {
        let mut inner = self.inner.write().await;
        inner.connection = None;

        if code == CLOSE_NORMAL || inner.lifecycle == Lifecycle::Closed || inner.close_on_open {
            info!("connection to {} closed", self.config.url);
            inner.lifecycle = Lifecycle::Closed;
            inner.close_on_open = false;
            inner.reject_all();
            return false;
        }

        inner.lifecycle = Lifecycle::Connecting;
        inner.generation += 1;
        let generation = inner.generation;
        let delay = inner.backoff.next_delay();
        debug!("connection to {} closed with code {}, reconnecting in {:?}", self.config.url, code, delay);

        let connector = self.connector.clone();
        let url = self.config.url.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            connector.connect(&url, generation, events);
        });
        true
    }

    async fn expire(self: Arc<Self>, id: u64) {
        time::sleep(self.config.request_timeout).await;

        let pending = self.inner.write().await
            .pending.remove(&id);
        if let Some(pending) = pending {
            warn!("request {} timed out after {:?}", id, self.config.request_timeout);
            let _ = pending.reply.send(Err(TransportError::Timeout { id }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;
    use tokio::runtime::Builder;
    use tokio::time::Instant;
    use super::*;
    use crate::transport::connection::{MockDuplexConnection, CLOSE_ABNORMAL};

    /// Test double for the network: records every frame that is sent, and answers requests only
    ///  while `delivering` is set
    #[derive(Default)]
    struct Tracking {
        sent: Mutex<Vec<Value>>,
        delivering: AtomicBool,
        /// the next n connection attempts fail
        failing_attempts: AtomicU32,
        /// connection attempts do not complete by themselves
        hold_open: AtomicBool,
        attempts: Mutex<Vec<(u64, SocketEventSender)>>,
        closed_with: Mutex<Vec<u16>>,
    }

    impl Tracking {
        fn sent(&self) -> Vec<Value> {
            self.sent.lock().unwrap().clone()
        }

        fn num_attempts(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }

        /// injects an event for the most recent connection attempt
        fn inject(&self, event: SocketEvent) {
            let attempts = self.attempts.lock().unwrap();
            let (generation, events) = attempts.last().unwrap();
            events.send((*generation, event)).unwrap();
        }
    }

    struct TrackingConnector(Arc<Tracking>);

    impl Connector for TrackingConnector {
        fn connect(&self, _url: &str, generation: u64, events: SocketEventSender) {
            let tracking = self.0.clone();
            tracking.attempts.lock().unwrap().push((generation, events.clone()));

            if tracking.failing_attempts.load(Ordering::SeqCst) > 0 {
                tracking.failing_attempts.fetch_sub(1, Ordering::SeqCst);
                events.send((generation, SocketEvent::Error("connection refused".to_string()))).unwrap();
                events.send((generation, SocketEvent::Close(CLOSE_ABNORMAL))).unwrap();
                return;
            }
            if tracking.hold_open.load(Ordering::SeqCst) {
                return;
            }

            let connection = Arc::new(TrackingConnection { tracking, generation, events: events.clone() });
            events.send((generation, SocketEvent::Open(connection))).unwrap();
        }
    }

    struct TrackingConnection {
        tracking: Arc<Tracking>,
        generation: u64,
        events: SocketEventSender,
    }

    #[async_trait]
    impl DuplexConnection for TrackingConnection {
        async fn send_text(&self, frame: String) -> anyhow::Result<()> {
            let request: Value = serde_json::from_str(&frame)?;
            self.tracking.sent.lock().unwrap().push(request.clone());

            if self.tracking.delivering.load(Ordering::SeqCst) {
                let response = json!({
                    "id": request["id"],
                    "jsonrpc": "2.0",
                    "result": format!("{}-result", request["method"].as_str().unwrap()),
                });
                let _ = self.events.send((self.generation, SocketEvent::Message(response.to_string())));
            }
            Ok(())
        }

        async fn close(&self, code: u16) {
            self.tracking.closed_with.lock().unwrap().push(code);
            let _ = self.events.send((self.generation, SocketEvent::Close(code)));
        }
    }

    fn config() -> Arc<TransportConfig> {
        Arc::new(TransportConfig {
            url: "ws://localhost:8546".to_string(),
            request_timeout: Duration::from_secs(30),
            error_threshold: 2,
            reconnect_initial_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(5),
        })
    }

    fn socket(tracking: &Arc<Tracking>) -> Arc<RpcSocket> {
        Arc::new(RpcSocket::connect(config(), Arc::new(TrackingConnector(tracking.clone()))))
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        while !condition() {
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn spawn_request(socket: &Arc<RpcSocket>, method: &'static str) -> JoinHandle<Result<Value, TransportError>> {
        let socket = socket.clone();
        tokio::spawn(async move {
            socket.request(method, json!([])).await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_request() {
        let tracking = Arc::new(Tracking::default());
        tracking.delivering.store(true, Ordering::SeqCst);
        let socket = socket(&tracking);

        assert_eq!(socket.request("net_version", json!([])).await, Ok(json!("net_version-result")));
        assert_eq!(socket.request("eth_chainId", json!(["a"])).await, Ok(json!("eth_chainId-result")));

        assert_eq!(tracking.sent(), vec![
            json!({"id": 0, "jsonrpc": "2.0", "method": "net_version", "params": []}),
            json!({"id": 1, "jsonrpc": "2.0", "method": "eth_chainId", "params": ["a"]}),
        ]);
        assert_eq!(socket.pending_count().await, 0);
        assert!(socket.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_after_reconnect() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let request = spawn_request(&socket, "eth_blockNumber");
        wait_until(|| tracking.sent().len() == 1).await;

        // the first frame was swallowed; the next connection delivers
        tracking.delivering.store(true, Ordering::SeqCst);
        tracking.inject(SocketEvent::Close(CLOSE_ABNORMAL));

        assert_eq!(request.await.unwrap(), Ok(json!("eth_blockNumber-result")));

        let sent = tracking.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["id"], json!(0));
        assert_eq!(sent[0], sent[1]);
        assert_eq!(tracking.num_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_wait_for_open_connection() {
        let tracking = Arc::new(Tracking::default());
        tracking.failing_attempts.store(1, Ordering::SeqCst);
        tracking.delivering.store(true, Ordering::SeqCst);
        let socket = socket(&tracking);

        let first = spawn_request(&socket, "a");
        let second = spawn_request(&socket, "b");

        assert_eq!(first.await.unwrap(), Ok(json!("a-result")));
        assert_eq!(second.await.unwrap(), Ok(json!("b-result")));
        // sent once each, after the reconnect, in id order
        let ids = tracking.sent().iter().map(|v| v["id"].as_u64().unwrap()).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let started = Instant::now();
        assert_eq!(socket.request("eth_call", json!([])).await, Err(TransportError::Timeout { id: 0 }));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
        assert_eq!(socket.pending_count().await, 0);

        // a late response for the timed out request does not end up with the next request
        let next = spawn_request(&socket, "eth_call");
        wait_until(|| tracking.sent().len() == 2).await;
        tracking.inject(SocketEvent::Message(r#"{"id":0,"jsonrpc":"2.0","result":"late"}"#.to_string()));
        tracking.inject(SocketEvent::Message(r#"{"id":1,"jsonrpc":"2.0","result":"fresh"}"#.to_string()));

        assert_eq!(next.await.unwrap(), Ok(json!("fresh")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_spans_reconnects() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let started = Instant::now();
        let request = spawn_request(&socket, "eth_call");
        wait_until(|| tracking.sent().len() == 1).await;
        tracking.inject(SocketEvent::Close(CLOSE_ABNORMAL));

        assert_eq!(request.await.unwrap(), Err(TransportError::Timeout { id: 0 }));
        assert!(started.elapsed() < Duration::from_secs(31));
        assert_eq!(tracking.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_error() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let request = spawn_request(&socket, "eth_sendRawTransaction");
        wait_until(|| tracking.sent().len() == 1).await;
        tracking.inject(SocketEvent::Message(r#"{"id":0,"jsonrpc":"2.0","error":{"code":-32000,"message":"nonce too low"}}"#.to_string()));

        assert_eq!(request.await.unwrap(), Err(TransportError::Rpc { code: -32000, message: "nonce too low".to_string() }));
    }

    #[rstest]
    #[case::no_errors(0, vec![])]
    #[case::below_threshold(1, vec![])]
    #[case::at_threshold(2, vec![ConnectionState::Trouble, ConnectionState::Ok])]
    #[case::above_threshold(5, vec![ConnectionState::Trouble, ConnectionState::Ok])]
    fn test_connection_state(#[case] failing_attempts: u32, #[case] expected: Vec<ConnectionState>) {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let tracking = Arc::new(Tracking::default());
            tracking.failing_attempts.store(failing_attempts, Ordering::SeqCst);
            tracking.delivering.store(true, Ordering::SeqCst);

            let socket = socket(&tracking);
            let mut states = socket.connection_state();

            // resolves only after the connection is open
            assert!(socket.request("net_version", json!([])).await.is_ok());

            let mut actual = Vec::new();
            while let Ok(state) = states.try_recv() {
                actual.push(state);
            }
            assert_eq!(actual, expected);
            assert_eq!(tracking.num_attempts(), failing_attempts as usize + 1);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff() {
        let tracking = Arc::new(Tracking::default());
        tracking.failing_attempts.store(3, Ordering::SeqCst);
        tracking.delivering.store(true, Ordering::SeqCst);

        let started = Instant::now();
        let socket = socket(&tracking);
        assert!(socket.request("net_version", json!([])).await.is_ok());

        // 100ms + 200ms + 400ms
        assert!(started.elapsed() >= Duration::from_millis(700));
        assert!(started.elapsed() < Duration::from_millis(800));

        // a successful connect resets the backoff
        tracking.inject(SocketEvent::Close(CLOSE_ABNORMAL));
        let reconnect_started = Instant::now();
        wait_until(|| tracking.num_attempts() == 5).await;
        assert!(reconnect_started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let request = spawn_request(&socket, "eth_call");
        wait_until(|| tracking.sent().len() == 1).await;

        socket.disconnect().await;

        assert_eq!(request.await.unwrap(), Err(TransportError::Disconnected));
        assert_eq!(*tracking.closed_with.lock().unwrap(), vec![CLOSE_NORMAL]);
        assert!(!socket.is_open().await);
        assert_eq!(socket.request("eth_call", json!([])).await, Err(TransportError::Disconnected));

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracking.num_attempts(), 1);

        // repeated disconnect is harmless
        socket.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting() {
        let tracking = Arc::new(Tracking::default());
        tracking.hold_open.store(true, Ordering::SeqCst);
        let socket = socket(&tracking);

        socket.disconnect().await;
        assert_eq!(socket.request("eth_call", json!([])).await, Err(TransportError::Disconnected));

        let closed = Arc::new(AtomicBool::new(false));
        let closed2 = closed.clone();
        let mut connection = MockDuplexConnection::new();
        connection.expect_send_text().never();
        connection.expect_close()
            .with(mockall::predicate::eq(CLOSE_NORMAL))
            .times(1)
            .returning(move |_| closed2.store(true, Ordering::SeqCst));

        tracking.inject(SocketEvent::Open(Arc::new(connection)));
        wait_until(|| closed.load(Ordering::SeqCst)).await;
        assert!(!socket.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_notifications() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let mut notifications = socket.add_subscription("0xab").await;
        tracking.inject(SocketEvent::Message(json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": "0xcd", "result": "other"},
        }).to_string()));
        tracking.inject(SocketEvent::Message(json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": "0xab", "result": {"topics": []}},
        }).to_string()));

        assert_eq!(notifications.recv().await, Some(json!({"topics": []})));

        assert!(socket.remove_subscription("0xab").await);
        assert!(!socket.remove_subscription("0xab").await);
        assert_eq!(notifications.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_with_several_listeners() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let mut first = socket.add_subscription("0xab").await;
        let mut second = socket.add_subscription("0xab").await;
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": "0xab", "result": 1},
        }).to_string();

        tracking.inject(SocketEvent::Message(notification.clone()));
        assert_eq!(first.recv().await, Some(json!(1)));
        assert_eq!(second.recv().await, Some(json!(1)));

        // a dropped listener does not affect the others
        drop(first);
        tracking.inject(SocketEvent::Message(notification));
        assert_eq!(second.recv().await, Some(json!(1)));

        assert!(socket.remove_subscription("0xab").await);
        assert_eq!(second.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_events_are_ignored() {
        let tracking = Arc::new(Tracking::default());
        let socket = socket(&tracking);

        let request = spawn_request(&socket, "eth_call");
        wait_until(|| tracking.sent().len() == 1).await;
        let (stale_generation, stale_events) = tracking.attempts.lock().unwrap()[0].clone();

        tracking.inject(SocketEvent::Close(CLOSE_ABNORMAL));
        wait_until(|| tracking.sent().len() == 2).await;

        // the replaced connection's close does not trigger another reconnect
        stale_events.send((stale_generation, SocketEvent::Close(CLOSE_ABNORMAL))).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tracking.num_attempts(), 2);
        assert!(socket.is_open().await);

        tracking.inject(SocketEvent::Message(r#"{"id":0,"result":"ok"}"#.to_string()));
        assert_eq!(request.await.unwrap(), Ok(json!("ok")));
    }
}
