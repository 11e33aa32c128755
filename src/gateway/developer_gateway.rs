use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tokio::time;
use tracing::{debug, warn};
use crate::api::{ApiEndpoint, AsyncResponse, Event, GetCodeResponse, PublicKeyResponse, DEPLOY_API, GET_CODE_API, HEALTH_API, PUBLIC_KEY_API, RPC_API, SUBSCRIBE_API, UNSUBSCRIBE_API};
use crate::config::{Credential, GatewayConfig, PollingConfig};
use crate::confidential::keys::PublicKey;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{parse_hex, to_hex, DeployRequest, DeployResponse, EventStream, OasisGateway, RpcRequest, RpcResponse, SubscribeFilter, SubscribeRequest};
use crate::http::{Http, HttpSession};
use crate::polling::polling_service::{PollingRegistry, PollingService};
use crate::transport::connection_state::{ConnectionState, ConnectionStateNotifier};

/// The developer gateway signs and submits transactions on the client's behalf. Requests are
///  plain HTTP POSTs that are acknowledged with an offset into the session's response queue, and
///  the actual response is long-polled from there.
pub struct DeveloperGateway {
    url: String,
    polling_config: Arc<PollingConfig>,
    http: Arc<dyn Http>,
    registry: Arc<PollingRegistry>,
    /// event name -> subscription queue id
    subscriptions: RwLock<FxHashMap<String, u64>>,
    /// never emits: every request reports its own connection problems
    state_notifier: ConnectionStateNotifier,
}

impl DeveloperGateway {
    pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(url: &str, polling_config: Arc<PollingConfig>, http: Arc<dyn Http>, registry: Arc<PollingRegistry>) -> DeveloperGateway {
        DeveloperGateway {
            url: url.trim_end_matches('/').to_string(),
            polling_config,
            http,
            registry,
            subscriptions: Default::default(),
            state_notifier: ConnectionStateNotifier::new(),
        }
    }

    /// A gateway with its own HTTP session
    pub fn from_config(config: &GatewayConfig, registry: Arc<PollingRegistry>) -> DeveloperGateway {
        let mut headers = config.headers.clone();
        if let Some(Credential::ApiToken(token)) = &config.credential {
            headers.push((HttpSession::API_TOKEN_HEADER.to_string(), token.clone()));
        }

        let session = HttpSession::new(&config.url, headers);
        debug!("developer gateway session {} for {}", session.session_key(), config.url);
        Self::new(&config.url, Arc::new(config.polling_config()), Arc::new(session), registry)
    }

    /// Checks that there is a gateway at the configured url
    pub async fn health(&self) -> GatewayResult<()> {
        match time::timeout(Self::HEALTH_TIMEOUT, self.http.request(HEALTH_API, Value::Null)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(GatewayError::Unresponsive(self.url.clone())),
        }
    }

    async fn poller(&self, queue_id: Option<u64>) -> Arc<PollingService> {
        let key = PollingService::registry_key(&self.url, queue_id);
        self.registry.get_or_create(&key, || {
            PollingService::new(self.polling_config.clone(), self.http.clone(), queue_id)
        }).await
    }

    /// POSTs a request and waits for its response on the response queue
    async fn post_and_poll(&self, api: ApiEndpoint, body: Value) -> GatewayResult<Event> {
        let id = self.post_for_id(api, body).await?;

        let event = self.poller(None).await
            .response(id).await?;
        match serde_json::from_value::<Event>(event.clone()) {
            Ok(Event::Error(e)) => Err(GatewayError::Poll { code: e.cause.error_code, description: e.cause.description }),
            Ok(event) => Ok(event),
            Err(_) => Err(GatewayError::InvalidResponse(format!("unexpected event {}", event))),
        }
    }

    async fn post_for_id(&self, api: ApiEndpoint, body: Value) -> GatewayResult<u64> {
        let response = self.http.request(api, body).await?;
        let response: AsyncResponse = serde_json::from_value(response)?;
        response.id
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{} returned no id", api.path)))
    }

    fn encode_filter(filter: &SubscribeFilter) -> String {
        let mut encoded = format!("address={}", to_hex(&filter.address));
        for topic in &filter.topics {
            encoded.push_str("&topic=");
            encoded.push_str(topic);
        }
        encoded
    }
}

#[async_trait]
impl OasisGateway for DeveloperGateway {
    async fn deploy(&self, request: DeployRequest) -> GatewayResult<DeployResponse> {
        match self.post_and_poll(DEPLOY_API, json!({ "data": to_hex(&request.data) })).await? {
            Event::Deploy(event) => Ok(DeployResponse { address: parse_hex(&event.address)? }),
            other => Err(GatewayError::InvalidResponse(format!("expected a deploy event, got {:?}", other))),
        }
    }

    async fn rpc(&self, request: RpcRequest) -> GatewayResult<RpcResponse> {
        if request.options.as_ref().map(|o| o.has_transaction_params()).unwrap_or(false) {
            return Err(GatewayError::Unsupported("transaction options"));
        }

        let body = json!({
            "data": to_hex(&request.data),
            "address": to_hex(&request.address),
        });
        match self.post_and_poll(RPC_API, body).await? {
            Event::ExecuteService(event) => Ok(RpcResponse { output: event.output, error: None }),
            other => Err(GatewayError::InvalidResponse(format!("expected an execution event, got {:?}", other))),
        }
    }

    async fn subscribe(&self, request: SubscribeRequest) -> GatewayResult<EventStream> {
        // one queue per event, shared by all of its listeners. NB: the lock is held while a new
        //  queue is created so that concurrent calls for the same event share it
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(&queue_id) = subscriptions.get(&request.event) {
            match self.poller(Some(queue_id)).await.subscribe().await {
                Err(GatewayError::NoSubscription(_)) => {
                    // the queue lost all of its listeners and is gone on the gateway side
                    debug!("queue {} for {} was closed, subscribing again", queue_id, request.event);
                    subscriptions.remove(&request.event);
                    self.registry.remove(&PollingService::registry_key(&self.url, Some(queue_id))).await;
                }
                result => return result,
            }
        }

        let body = json!({
            "events": ["logs"],
            "filter": Self::encode_filter(&request.filter),
        });
        let queue_id = self.post_for_id(SUBSCRIBE_API, body).await?;
        debug!("subscribed to {} with queue {}", request.event, queue_id);
        subscriptions.insert(request.event.clone(), queue_id);

        self.poller(Some(queue_id)).await
            .subscribe().await
    }

    async fn unsubscribe(&self, event: &str) -> GatewayResult<()> {
        let queue_id = self.subscriptions.write().await
            .remove(event)
            .ok_or_else(|| GatewayError::NoSubscription(event.to_string()))?;

        if let Some(poller) = self.registry.remove(&PollingService::registry_key(&self.url, Some(queue_id))).await {
            if !poller.stop().await {
                debug!("queue {} for {} was dropped when its last listener went away", queue_id, event);
                return Ok(());
            }
        }

        if let Err(e) = self.http.request(UNSUBSCRIBE_API, json!({ "id": queue_id })).await {
            warn!("error unsubscribing queue {} from the gateway: {}", queue_id, e);
        }
        Ok(())
    }

    async fn public_key(&self, address: &[u8]) -> GatewayResult<Option<PublicKey>> {
        let response = self.http.request(PUBLIC_KEY_API, json!({ "address": to_hex(address) })).await?;
        let response: PublicKeyResponse = serde_json::from_value(response)?;

        //TODO validate the signature once the gateway's signing key is distributed
        match response.public_key {
            Some(key) => Ok(Some(PublicKey::from_hex(&key)?)),
            None => Ok(None),
        }
    }

    async fn get_code(&self, address: &[u8]) -> GatewayResult<Option<Vec<u8>>> {
        let response = self.http.request(GET_CODE_API, json!({ "address": to_hex(address) })).await?;
        let response: GetCodeResponse = serde_json::from_value(response)?;

        let code = parse_hex(&response.code)?;
        Ok(if code.is_empty() { None } else { Some(code) })
    }

    async fn disconnect(&self) {
        let queue_ids = self.subscriptions.write().await
            .drain()
            .map(|(_, queue_id)| queue_id)
            .collect::<Vec<_>>();

        for queue_id in queue_ids.into_iter().map(Some).chain([None]) {
            if let Some(poller) = self.registry.remove(&PollingService::registry_key(&self.url, queue_id)).await {
                poller.stop().await;
            }
        }
    }

    fn connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_notifier.subscribe()
    }

    fn has_signer(&self) -> bool {
        false
    }
}
