use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tokio::time;
use tracing::{debug, info, trace};
use crate::config::TransportConfig;
use crate::confidential::keys::PublicKey;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{parse_hex, to_hex, DeployRequest, DeployResponse, EventStream, OasisGateway, RpcOptions, RpcRequest, RpcResponse, SubscribeRequest};
use crate::transport::connection::Connector;
use crate::transport::connection_state::ConnectionState;
use crate::transport::rpc_frame::subscription_key;
use crate::transport::rpc_socket::RpcSocket;

pub const OASIS_CHAIN_ID: u64 = 42261;
const DEFAULT_GAS_PRICE: u64 = 1_000_000_000;

/// A transaction that is ready for signing. Quantities are hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub value: String,
    pub data: String,
    pub nonce: String,
    pub gas_limit: String,
    pub gas_price: String,
    pub chain_id: u64,
}

/// Holds the signing key for client side transactions, and turns transactions into raw signed
///  transactions for `eth_sendRawTransaction`
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransactionSigner: Send + Sync + 'static {
    /// the `0x` prefixed account address
    fn address(&self) -> String;

    /// returns the hex encoded raw transaction
    async fn sign(&self, tx: Transaction) -> anyhow::Result<String>;
}

/// A web3 gateway: Ethereum style JSON-RPC over a websocket, with `oasis_*` extensions for
///  confidential execution. Transactions are built and signed on the client side.
pub struct Web3Gateway {
    url: String,
    socket: RpcSocket,
    signer: Option<Arc<dyn TransactionSigner>>,
    /// event name -> subscription id
    subscription_ids: RwLock<FxHashMap<String, String>>,
}

impl Web3Gateway {
    pub const RESPONSIVE_TIMEOUT: Duration = Duration::from_secs(3);
    pub const RECEIPT_RETRIES: u32 = 5;
    pub const RECEIPT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(config: Arc<TransportConfig>, connector: Arc<dyn Connector>, signer: Option<Arc<dyn TransactionSigner>>) -> Web3Gateway {
        let url = config.url.clone();
        Web3Gateway {
            url,
            socket: RpcSocket::connect(config, connector),
            signer,
            subscription_ids: Default::default(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> GatewayResult<Value> {
        trace!("calling {}", method);
        Ok(self.socket.request(method, params).await?)
    }

    async fn call_for_string(&self, method: &str, params: Value) -> GatewayResult<String> {
        match self.call(method, params).await? {
            Value::String(s) => Ok(s),
            other => Err(GatewayError::InvalidResponse(format!("{} returned {}", method, other))),
        }
    }

    pub async fn net_version(&self) -> GatewayResult<String> {
        match self.call("net_version", json!([])).await? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(GatewayError::InvalidResponse(format!("net_version returned {}", other))),
        }
    }

    /// Checks that there is a gateway at the configured url, i.e. that it reports a positive
    ///  network version in time
    pub async fn assert_responsive(&self) -> GatewayResult<()> {
        let version = time::timeout(Self::RESPONSIVE_TIMEOUT, self.net_version()).await
            .map_err(|_| GatewayError::Unresponsive(self.url.clone()))??;

        match version.parse::<i64>() {
            Ok(v) if v > 0 => Ok(()),
            _ => Err(GatewayError::InvalidResponse(format!("invalid network version {}", version))),
        }
    }

    fn signer(&self, operation: &'static str) -> GatewayResult<&Arc<dyn TransactionSigner>> {
        self.signer.as_ref()
            .ok_or(GatewayError::NoSigner(operation))
    }

    /// Fills in the gas limit (estimated unless given) and the account's nonce
    async fn prepare_transaction(&self, signer: &Arc<dyn TransactionSigner>, to: Option<String>, data: &[u8], options: &RpcOptions) -> GatewayResult<Transaction> {
        let value = format!("0x{:x}", options.value.unwrap_or(0));
        let gas_price = format!("0x{:x}", options.gas_price.unwrap_or(DEFAULT_GAS_PRICE));
        let data = to_hex(data);

        let mut unprepared = json!({
            "from": signer.address(),
            "value": value,
            "data": data,
            "gasPrice": gas_price,
        });
        if let Some(to) = &to {
            unprepared["to"] = json!(to);
        }

        let gas_limit = async {
            match options.gas_limit {
                Some(gas_limit) => Ok(format!("0x{:x}", gas_limit)),
                None => self.call_for_string("eth_estimateGas", json!([unprepared])).await,
            }
        };
        let nonce = self.call_for_string("eth_getTransactionCount", json!([signer.address(), "latest"]));
        let (gas_limit, nonce) = futures::try_join!(gas_limit, nonce)?;

        Ok(Transaction {
            to,
            value,
            data,
            nonce,
            gas_limit,
            gas_price,
            chain_id: OASIS_CHAIN_ID,
        })
    }

    async fn sign(&self, signer: &Arc<dyn TransactionSigner>, tx: Transaction) -> GatewayResult<String> {
        signer.sign(tx).await
            .map_err(|e| GatewayError::InvalidRequest(format!("signing failed: {}", e)))
    }

    /// The receipt is not necessarily available right after the transaction was sent
    async fn transaction_receipt(&self, tx_hash: &str) -> GatewayResult<Value> {
        for attempt in 0..=Self::RECEIPT_RETRIES {
            if attempt > 0 {
                time::sleep(Self::RECEIPT_RETRY_INTERVAL).await;
            }

            let receipt = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            debug!("no receipt for {} yet", tx_hash);
        }
        Err(GatewayError::ReceiptUnavailable)
    }
}

#[async_trait]
impl OasisGateway for Web3Gateway {
    async fn deploy(&self, request: DeployRequest) -> GatewayResult<DeployResponse> {
        let signer = self.signer("deploy")?;
        let options = request.options.unwrap_or_default();

        let tx = self.prepare_transaction(signer, None, &request.data, &options).await?;
        let raw_tx = self.sign(signer, tx).await?;
        let tx_hash = self.call_for_string("eth_sendRawTransaction", json!([raw_tx])).await?;

        let receipt = self.transaction_receipt(&tx_hash).await?;
        if receipt["status"] != json!("0x1") {
            return Err(GatewayError::TransactionReverted(receipt.to_string()));
        }

        let address = receipt["contractAddress"].as_str()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("receipt without contract address: {}", receipt)))?;
        info!("deployed service at {}", address);
        Ok(DeployResponse { address: parse_hex(address)? })
    }

    async fn rpc(&self, request: RpcRequest) -> GatewayResult<RpcResponse> {
        let signer = self.signer("rpc")?;
        let options = request.options.unwrap_or_default();

        let tx = self.prepare_transaction(signer, Some(to_hex(&request.address)), &request.data, &options).await?;
        let raw_tx = self.sign(signer, tx).await?;

        let payload = self.call("oasis_invoke", json!([raw_tx])).await?;
        let output = payload["output"].as_str()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("invoke returned {}", payload)))?
            .to_string();

        // the output of a reverted transaction is the runtime's error message
        let error = match payload["status"].as_str() {
            Some("0x0") => Some(parse_hex(&output)?),
            _ => None,
        };
        Ok(RpcResponse { output, error })
    }

    /// One gateway subscription per event, shared by all of its listeners
    async fn subscribe(&self, request: SubscribeRequest) -> GatewayResult<EventStream> {
        // NB: the lock is held across eth_subscribe so that concurrent calls for the same event
        //  share a single subscription
        let mut subscription_ids = self.subscription_ids.write().await;
        if let Some(subscription_id) = subscription_ids.get(&request.event) {
            trace!("adding a listener to subscription {} for {}", subscription_id, request.event);
            return Ok(self.socket.add_subscription(subscription_id).await);
        }

        let params = json!(["logs", {
            "address": to_hex(&request.filter.address),
            "topics": request.filter.topics,
        }]);
        let subscription_id = subscription_key(&self.call("eth_subscribe", params).await?);
        debug!("subscribed to {} as {}", request.event, subscription_id);

        let events = self.socket.add_subscription(&subscription_id).await;
        subscription_ids.insert(request.event, subscription_id);
        Ok(events)
    }

    /// Unsubscribing an unknown event is a no-op
    async fn unsubscribe(&self, event: &str) -> GatewayResult<()> {
        let Some(subscription_id) = self.subscription_ids.write().await.remove(event) else {
            return Ok(());
        };

        self.socket.remove_subscription(&subscription_id).await;
        match self.call("eth_unsubscribe", json!([subscription_id])).await? {
            Value::Bool(true) => Ok(()),
            other => Err(GatewayError::InvalidResponse(format!("unsubscribing {} returned {}", subscription_id, other))),
        }
    }

    async fn public_key(&self, address: &[u8]) -> GatewayResult<Option<PublicKey>> {
        let response = self.call("oasis_getPublicKey", json!([to_hex(address)])).await?;

        //TODO validate the signature once the gateway's signing key is distributed
        match response["public_key"].as_str() {
            Some(key) => Ok(Some(PublicKey::from_hex(key)?)),
            None => Ok(None),
        }
    }

    /// The gateway returns `0x` for addresses without code
    async fn get_code(&self, address: &[u8]) -> GatewayResult<Option<Vec<u8>>> {
        let code = self.call_for_string("eth_getCode", json!([to_hex(address), "latest"])).await?;
        let code = parse_hex(&code)?;
        Ok(if code.is_empty() { None } else { Some(code) })
    }

    async fn disconnect(&self) {
        self.socket.disconnect().await;
    }

    fn connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.socket.connection_state()
    }

    fn has_signer(&self) -> bool {
        self.signer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use rstest::rstest;
    use tokio::time::Instant;
    use super::*;
    use crate::gateway::SubscribeFilter;
    use crate::test_util::connector::ScriptedConnector;

    fn gateway(connector: &Arc<ScriptedConnector>, signer: Option<MockTransactionSigner>) -> Web3Gateway {
        let signer = signer.map(|s| Arc::new(s) as Arc<dyn TransactionSigner>);
        Web3Gateway::new(Arc::new(TransportConfig::new("ws://localhost:8546")), Arc::new(connector.clone()), signer)
    }

    fn signer() -> MockTransactionSigner {
        let mut signer = MockTransactionSigner::new();
        signer.expect_address()
            .return_const("0xfeed".to_string());
        signer.expect_sign()
            .returning(|tx| Ok(format!("signed:{}:{}:{}", tx.nonce, tx.gas_limit, tx.to.unwrap_or_default())));
        signer
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy() {
        let receipt_polls = Arc::new(AtomicU32::new(0));
        let receipt_polls2 = receipt_polls.clone();
        let connector = Arc::new(ScriptedConnector::new(move |method, params| {
            match method {
                "eth_estimateGas" => {
                    assert_eq!(params[0]["from"], json!("0xfeed"));
                    assert_eq!(params[0]["data"], json!("0x0102"));
                    Ok(json!("0x5208"))
                }
                "eth_getTransactionCount" => Ok(json!("0x7")),
                "eth_sendRawTransaction" => {
                    assert_eq!(params, &json!(["signed:0x7:0x5208:"]));
                    Ok(json!("0xhash"))
                }
                "eth_getTransactionReceipt" => {
                    // not mined on the first two polls
                    if receipt_polls2.fetch_add(1, Ordering::SeqCst) < 2 {
                        Ok(Value::Null)
                    }
                    else {
                        Ok(json!({"status": "0x1", "contractAddress": "0xabcd"}))
                    }
                }
                other => panic!("unexpected method {}", other),
            }
        }));
        let gateway = gateway(&connector, Some(signer()));

        let started = Instant::now();
        let response = gateway.deploy(DeployRequest { data: vec![1, 2], options: None }).await.unwrap();

        assert_eq!(response.address, vec![0xab, 0xcd]);
        assert_eq!(receipt_polls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[rstest]
    #[case::reverted(json!({"status": "0x0", "contractAddress": null}), "reverted")]
    #[case::never_mined(Value::Null, "unavailable")]
    fn test_deploy_failure(#[case] receipt: Value, #[case] expected: &str) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let connector = Arc::new(ScriptedConnector::new(move |method, _| {
                match method {
                    "eth_getTransactionReceipt" => Ok(receipt.clone()),
                    _ => Ok(json!("0x1")),
                }
            }));
            let gateway = gateway(&connector, Some(signer()));

            let result = gateway.deploy(DeployRequest { data: vec![], options: None }).await;
            match (result, expected) {
                (Err(GatewayError::TransactionReverted(_)), "reverted") => {}
                (Err(GatewayError::ReceiptUnavailable), "unavailable") => {
                    let receipt_calls = connector.methods().iter().filter(|m| *m == "eth_getTransactionReceipt").count();
                    assert_eq!(receipt_calls, 1 + Web3Gateway::RECEIPT_RETRIES as usize);
                }
                (other, _) => panic!("unexpected result {:?}", other),
            }
        });
    }

    #[tokio::test]
    async fn test_no_signer() {
        let connector = Arc::new(ScriptedConnector::new(|_, _| Ok(Value::Null)));
        let gateway = gateway(&connector, None);

        assert!(!gateway.has_signer());
        assert!(matches!(gateway.deploy(DeployRequest { data: vec![], options: None }).await, Err(GatewayError::NoSigner("deploy"))));
        assert!(matches!(gateway.rpc(RpcRequest { data: vec![], address: vec![], options: None }).await, Err(GatewayError::NoSigner("rpc"))));
        assert!(connector.requests().is_empty());
    }

    #[rstest]
    #[case::success("0x1", "0x99", None)]
    #[case::reverted("0x0", "0x6572", Some(b"er".to_vec()))]
    fn test_rpc(#[case] status: &'static str, #[case] output: &'static str, #[case] expected_error: Option<Vec<u8>>) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async move {
            let connector = Arc::new(ScriptedConnector::new(move |method, params| {
                match method {
                    "eth_getTransactionCount" => Ok(json!("0x0")),
                    "oasis_invoke" => {
                        assert_eq!(params, &json!(["signed:0x0:0x2710:0x0102"]));
                        Ok(json!({"status": status, "output": output}))
                    }
                    other => panic!("unexpected method {}", other),
                }
            }));
            let gateway = gateway(&connector, Some(signer()));

            let options = RpcOptions { gas_limit: Some(10_000), ..Default::default() };
            let response = gateway.rpc(RpcRequest { data: vec![9], address: vec![1, 2], options: Some(options) }).await.unwrap();

            assert_eq!(response, RpcResponse { output: output.to_string(), error: expected_error });
            // the gas limit was given, so there is no estimate
            assert!(!connector.methods().contains(&"eth_estimateGas".to_string()));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe() {
        let connector = Arc::new(ScriptedConnector::new(|method, params| {
            match method {
                "eth_subscribe" => {
                    assert_eq!(params, &json!(["logs", {"address": "0x01", "topics": ["0x02"]}]));
                    Ok(json!("0xsub"))
                }
                "eth_unsubscribe" => {
                    assert_eq!(params, &json!(["0xsub"]));
                    Ok(json!(true))
                }
                other => panic!("unexpected method {}", other),
            }
        }));
        let gateway = gateway(&connector, None);

        let mut events = gateway.subscribe(SubscribeRequest {
            event: "Transfer".to_string(),
            filter: SubscribeFilter { address: vec![1], topics: vec!["0x02".to_string()] },
        }).await.unwrap();

        connector.push(json!({"jsonrpc": "2.0", "method": "eth_subscription", "params": {"subscription": "0xsub", "result": {"data": "0x"}}}));
        assert_eq!(events.recv().await, Some(json!({"data": "0x"})));

        gateway.unsubscribe("Transfer").await.unwrap();
        assert!(events.recv().await.is_none());
        // unknown events are ignored
        gateway.unsubscribe("Transfer").await.unwrap();
        assert_eq!(connector.methods(), vec!["eth_subscribe", "eth_unsubscribe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_twice_shares_the_subscription() {
        let subscribe_calls = Arc::new(AtomicU32::new(0));
        let calls = subscribe_calls.clone();
        let connector = Arc::new(ScriptedConnector::new(move |method, params| {
            match method {
                "eth_subscribe" => Ok(json!(format!("0xs{}", calls.fetch_add(1, Ordering::SeqCst) + 1))),
                "eth_unsubscribe" => {
                    assert_eq!(params, &json!(["0xs1"]));
                    Ok(json!(true))
                }
                other => panic!("unexpected method {}", other),
            }
        }));
        let gateway = gateway(&connector, None);
        let request = SubscribeRequest {
            event: "Transfer".to_string(),
            filter: SubscribeFilter { address: vec![1], topics: vec![] },
        };

        let (first, second) = tokio::join!(gateway.subscribe(request.clone()), gateway.subscribe(request));
        let (mut first, mut second) = (first.unwrap(), second.unwrap());
        assert_eq!(subscribe_calls.load(Ordering::SeqCst), 1);

        connector.push(json!({"jsonrpc": "2.0", "method": "eth_subscription", "params": {"subscription": "0xs1", "result": "log"}}));
        assert_eq!(first.recv().await, Some(json!("log")));
        assert_eq!(second.recv().await, Some(json!("log")));

        gateway.unsubscribe("Transfer").await.unwrap();
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.is_none());
        assert_eq!(connector.methods(), vec!["eth_subscribe", "eth_unsubscribe"]);
    }

    #[rstest]
    #[case::key(json!({"public_key": format!("0x{}", "05".repeat(32))}), Some(PublicKey::from_bytes([5; 32])))]
    #[case::no_key(json!({}), None)]
    fn test_public_key(#[case] response: Value, #[case] expected: Option<PublicKey>) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build().unwrap();
        rt.block_on(async move {
            let connector = Arc::new(ScriptedConnector::new(move |method, params| {
                assert_eq!(method, "oasis_getPublicKey");
                assert_eq!(params, &json!(["0x0a"]));
                Ok(response.clone())
            }));
            let gateway = gateway(&connector, None);

            assert_eq!(gateway.public_key(&[10]).await.unwrap(), expected);
        });
    }

    #[tokio::test]
    async fn test_get_code() {
        let connector = Arc::new(ScriptedConnector::new(|_, params| {
            match params[0].as_str() {
                Some("0x01") => Ok(json!("0x6060")),
                _ => Ok(json!("0x")),
            }
        }));
        let gateway = gateway(&connector, None);

        assert_eq!(gateway.get_code(&[1]).await.unwrap(), Some(vec![0x60, 0x60]));
        assert_eq!(gateway.get_code(&[2]).await.unwrap(), None);
        assert_eq!(connector.requests()[0], ("eth_getCode".to_string(), json!(["0x01", "latest"])));
    }

    #[rstest]
    #[case::positive(json!("42261"), true)]
    #[case::number(json!(1), true)]
    #[case::zero(json!("0"), false)]
    fn test_assert_responsive(#[case] version: Value, #[case] expected: bool) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build().unwrap();
        rt.block_on(async move {
            let connector = Arc::new(ScriptedConnector::new(move |_, _| Ok(version.clone())));
            let gateway = gateway(&connector, None);
            assert_eq!(gateway.assert_responsive().await.is_ok(), expected);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_error_is_reported() {
        let connector = Arc::new(ScriptedConnector::new(|_, _| Err((-32601, "method not found".to_string()))));
        let gateway = gateway(&connector, None);

        match gateway.get_code(&[1]).await {
            Err(GatewayError::Transport(e)) => assert_eq!(e.to_string(), "rpc error -32601: method not found"),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
