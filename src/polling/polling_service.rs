use std::sync::Arc;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use crate::api::{ApiEndpoint, PollRequest, PollResponse, SERVICE_POLL_API, SUBSCRIBE_POLL_API, UNSUBSCRIBE_API};
use crate::config::PollingConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::http::Http;
use crate::polling::window::Window;
use crate::util::registry::InstanceRegistry;

/// Pollers shared per gateway queue, see [PollingService::registry_key]
pub type PollingRegistry = InstanceRegistry<PollingService>;

struct PollingServiceInner {
    window: Window<Value>,
    /// one-shot waiters for the response queue, by offset
    waiters: FxHashMap<u64, Vec<oneshot::Sender<Value>>>,
    /// listeners of a subscription queue
    listeners: Vec<mpsc::UnboundedSender<Value>>,
    poll_handle: Option<JoinHandle<()>>,
    last_response: Instant,
    /// set when a subscription queue lost its last listener: it is gone on the gateway side
    finished: bool,
}

impl PollingServiceInner {
    fn is_polling(&self) -> bool {
        self.poll_handle.as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn stop(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
    }
}

/// Turns the gateway's stateless 'poll from offset x' endpoints into awaitable per-request
///  responses ([PollingService::response]) and push-style subscription feeds
///  ([PollingService::subscribe]).
///
/// There is one service per queue: the session's response queue (no queue id), or one queue per
///  subscription. Callers share the instance through a [PollingRegistry] so that there is a
///  single poll loop per queue.
///
/// The poll loop runs only while somebody waits. It stops when the response window is closed, or
///  when nothing arrived for the configured idle timeout, and restarts on demand.
pub struct PollingService {
    config: Arc<PollingConfig>,
    http: Arc<dyn Http>,
    queue_id: Option<u64>,
    inner: Arc<RwLock<PollingServiceInner>>,
}

impl PollingService {
    pub fn new(config: Arc<PollingConfig>, http: Arc<dyn Http>, queue_id: Option<u64>) -> PollingService {
        let window = match queue_id {
            Some(_) => Window::unbounded(),
            None => Window::new(),
        };

        PollingService {
            config,
            http,
            queue_id,
            inner: Arc::new(RwLock::new(PollingServiceInner {
                window,
                waiters: FxHashMap::default(),
                listeners: Vec::new(),
                poll_handle: None,
                last_response: Instant::now(),
                finished: false,
            })),
        }
    }

    /// Key for sharing pollers through a [PollingRegistry]: distinct per gateway url and queue
    pub fn registry_key(url: &str, queue_id: Option<u64>) -> String {
        match queue_id {
            Some(queue_id) => format!("{}/{}/{}", url, SUBSCRIBE_POLL_API.path, queue_id),
            None => format!("{}/{}", url, SERVICE_POLL_API.path),
        }
    }

    pub fn queue_id(&self) -> Option<u64> {
        self.queue_id
    }

    fn api(&self) -> ApiEndpoint {
        match self.queue_id {
            Some(_) => SUBSCRIBE_POLL_API,
            None => SERVICE_POLL_API,
        }
    }

    pub async fn is_polling(&self) -> bool {
        self.inner.read().await.is_polling()
    }

    /// true after a subscription queue lost its last listener
    pub async fn is_finished(&self) -> bool {
        self.inner.read().await.finished
    }

    /// Waits for the gateway's response with offset `id`. Responses are handed out in ascending
    ///  offset order, so this returns once all responses up to `id` that anybody waits for
    ///  have arrived.
    ///
    /// Fails if polling stops (idle timeout or explicit stop) before the response arrives.
    pub async fn response(self: &Arc<Self>, id: u64) -> GatewayResult<Value> {
        let receiver = {
            let mut inner = self.inner.write().await;
            if let Some(cached) = inner.window.item(id) {
                trace!("response {} was polled before", id);
                return Ok(cached.clone());
            }

            if !inner.window.extend(id) {
                return Err(GatewayError::InvalidResponse(format!("response offset {} is out of range", id)));
            }
            let (sender, receiver) = oneshot::channel();
            inner.waiters.entry(id).or_default().push(sender);
            self.ensure_polling(&mut inner);
            receiver
        };

        receiver.await
            .map_err(|_| GatewayError::PollingStopped)
    }

    /// Adds a listener to this subscription queue, starting the poll loop if necessary. Events
    ///  arrive in ascending offset order. Dropping the receiver detaches the listener; after
    ///  the last one is gone, the queue is dropped on the gateway side as well.
    pub async fn subscribe(self: &Arc<Self>) -> GatewayResult<mpsc::UnboundedReceiver<Value>> {
        if self.queue_id.is_none() {
            return Err(GatewayError::InvalidResponse("the response queue does not support subscriptions".to_string()));
        }

        let mut inner = self.inner.write().await;
        if inner.finished {
            return Err(GatewayError::NoSubscription(format!("queue {:?} was closed", self.queue_id)));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        inner.listeners.push(sender);
        self.ensure_polling(&mut inner);
        Ok(receiver)
    }

    /// Stops polling. Pending [PollingService::response] calls fail, subscription listeners see the
    ///  end of their stream. Calling this repeatedly is harmless.
    ///
    /// Returns false if this is a subscription queue that had already finished, i.e. it was
    ///  dropped on the gateway side when its last listener went away.
    pub async fn stop(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.is_polling() {
            debug!("stopping poll loop for queue {:?}", self.queue_id);
        }
        inner.stop();
        inner.waiters.clear();
        inner.listeners.clear();
        !inner.finished
    }

    fn ensure_polling(self: &Arc<Self>, inner: &mut PollingServiceInner) {
        if inner.is_polling() {
            return;
        }

        debug!("starting poll loop for queue {:?}", self.queue_id);
        inner.last_response = Instant::now();

        let service = self.clone();
        inner.poll_handle = Some(tokio::spawn(async move {
            service.poll_loop().await;
        }));
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticks = time::interval(self.config.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticks.tick().await;

        loop {
            ticks.tick().await;
            if !self.poll_once().await {
                break;
            }
        }
    }

    /// returns false if polling should stop
    async fn poll_once(&self) -> bool {
        let offset = {
            let mut inner = self.inner.write().await;
            if self.finish_if_unlistened(&mut inner) {
                return false;
            }
            inner.window.start()
        };
        let request = PollRequest {
            offset,
            discard_previous: true,
            id: self.queue_id,
        };

        let events = match self.poll_request(request).await {
            Ok(events) => events,
            Err(e) => {
                // transient: the idle timeout ends polling if this persists
                warn!("error polling queue {:?} at offset {}: {}", self.queue_id, offset, e);
                None
            }
        };

        let mut inner = self.inner.write().await;
        let events = match events {
            Some(events) if !events.is_empty() => events,
            _ => {
                if inner.last_response.elapsed() >= self.config.idle_timeout {
                    info!("poll loop for queue {:?} is idle, stopping", self.queue_id);
                    self.finish_loop(&mut inner);
                    inner.waiters.clear();
                    return false;
                }
                return true;
            }
        };

        inner.last_response = Instant::now();
        for event in events {
            let Some(id) = event.get("id").and_then(Value::as_u64).filter(|id| Window::<Value>::is_valid_offset(*id)) else {
                warn!("dropping polled event without a valid id: {}", event);
                continue;
            };

            for (delivered_id, item) in inner.window.slide(id, event) {
                self.deliver(&mut inner, delivered_id, item);
            }

            if self.finish_if_unlistened(&mut inner) {
                return false;
            }
            if inner.window.is_closed() {
                trace!("all responses of queue {:?} are in", self.queue_id);
                self.finish_loop(&mut inner);
                return false;
            }
        }
        true
    }

    async fn poll_request(&self, request: PollRequest) -> GatewayResult<Option<Vec<Value>>> {
        let response = self.http.request(self.api(), serde_json::to_value(request)?).await?;
        let response: PollResponse = serde_json::from_value(response)?;
        Ok(response.events)
    }

    fn deliver(&self, inner: &mut PollingServiceInner, id: u64, item: Value) {
        match self.queue_id {
            None => {
                for waiter in inner.waiters.remove(&id).unwrap_or_default() {
                    let _ = waiter.send(item.clone());
                }
            }
            Some(_) => {
                inner.listeners.retain(|l| l.send(item.clone()).is_ok());
            }
        }
    }

    /// A subscription queue whose listeners are all gone is finished: the poll loop ends and the
    ///  queue is dropped on the gateway side. Returns true if that happened.
    fn finish_if_unlistened(&self, inner: &mut PollingServiceInner) -> bool {
        if self.queue_id.is_none() {
            return false;
        }

        inner.listeners.retain(|l| !l.is_closed());
        if !inner.listeners.is_empty() {
            return false;
        }

        debug!("last listener of queue {:?} is gone", self.queue_id);
        inner.finished = true;
        self.finish_loop(inner);
        self.spawn_gateway_unsubscribe();
        true
    }

    /// called from inside the poll loop as it terminates
    fn finish_loop(&self, inner: &mut PollingServiceInner) {
        // the handle refers to the running task: drop it without aborting
        inner.poll_handle = None;
    }

    fn spawn_gateway_unsubscribe(&self) {
        let Some(queue_id) = self.queue_id else {
            return;
        };

        let http = self.http.clone();
        tokio::spawn(async move {
            if let Err(e) = http.request(UNSUBSCRIBE_API, json!({ "id": queue_id })).await {
                warn!("error unsubscribing queue {} from the gateway: {}", queue_id, e);
            }
        });
    }
}
