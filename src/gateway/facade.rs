use std::sync::Arc;
use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use crate::config::{Credential, GatewayConfig, GatewayKind};
use crate::confidential::key_store::{KeyStore, KeyValueStore};
use crate::deploy::header;
use crate::deploy::header::DeployHeaderBody;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::coder::{Coder, ConfidentialCoder};
use crate::gateway::developer_gateway::DeveloperGateway;
use crate::gateway::web3_gateway::{TransactionSigner, Web3Gateway};
use crate::gateway::{parse_hex, to_hex, DeployRequest, EventStream, GatewayKeyProvider, OasisGateway, RpcOptions, RpcRequest, SubscribeRequest};
use crate::polling::polling_service::PollingRegistry;
use crate::transport::connection_state::ConnectionState;
use crate::transport::tungstenite_connector::TungsteniteConnector;

/// Entry point for talking to services through a gateway: picks the gateway implementation for
///  the configured url, and takes care of end-to-end encryption for confidential services.
pub struct Gateway {
    inner: Arc<dyn OasisGateway>,
    key_store: KeyStore,
    /// per service address
    coders: RwLock<FxHashMap<Vec<u8>, Coder>>,
    registry: Option<Arc<PollingRegistry>>,
}

impl Gateway {
    /// `http(s)://` urls connect to a developer gateway, `ws(s)://` urls to a web3 gateway. Only
    ///  a web3 gateway uses the signer.
    pub fn new(config: GatewayConfig, signer: Option<Arc<dyn TransactionSigner>>, db: Arc<dyn KeyValueStore>) -> anyhow::Result<Gateway> {
        config.validate()?;

        match config.kind()? {
            GatewayKind::Http => {
                if signer.is_some() {
                    warn!("the developer gateway signs transactions itself, ignoring the signer");
                }
                let registry = Arc::new(PollingRegistry::new());
                let inner = Arc::new(DeveloperGateway::from_config(&config, registry.clone()));

                let mut gateway = Self::with_gateway(inner, db);
                gateway.registry = Some(registry);
                Ok(gateway)
            }
            GatewayKind::WebSocket => {
                if signer.is_none() && matches!(config.credential, Some(Credential::PrivateKey(_)) | Some(Credential::Mnemonic(_))) {
                    warn!("a signing credential was configured without a signer: the gateway can not send transactions");
                }
                let inner = Arc::new(Web3Gateway::new(Arc::new(config.transport_config()), Arc::new(TungsteniteConnector), signer));
                Ok(Self::with_gateway(inner, db))
            }
        }
    }

    pub fn with_gateway(inner: Arc<dyn OasisGateway>, db: Arc<dyn KeyValueStore>) -> Gateway {
        let key_store = KeyStore::new(db, Arc::new(GatewayKeyProvider(inner.clone())));
        Gateway {
            inner,
            key_store,
            coders: Default::default(),
            registry: None,
        }
    }

    pub fn inner(&self) -> &Arc<dyn OasisGateway> {
        &self.inner
    }

    /// Finds out whether the service at `address` is confidential by reading its deploy header,
    ///  and returns the matching coder. The result is cached per address.
    pub async fn discover_coder(&self, address: &[u8]) -> GatewayResult<Coder> {
        if let Some(coder) = self.coders.read().await.get(address) {
            return Ok(coder.clone());
        }

        let code = self.inner.get_code(address).await?
            .ok_or_else(|| GatewayError::NoCode(to_hex(address)))?;

        let coder = match header::read(&code)? {
            Some(deploy_header) if deploy_header.is_confidential() => {
                let peer_public_key = self.key_store.public_key(address).await?;
                let keys = self.key_store.local_keys().await?;
                Coder::Confidential(ConfidentialCoder::new(peer_public_key, keys))
            }
            _ => Coder::Plaintext,
        };
        debug!("service at {} is {}", to_hex(address), if coder.is_confidential() { "confidential" } else { "not confidential" });

        self.coders.write().await
            .insert(address.to_vec(), coder.clone());
        Ok(coder)
    }

    /// Deploys `bytecode` with a deploy header built from `header_body`, returning the new service's
    ///  address
    pub async fn deploy(&self, bytecode: &[u8], header_body: &DeployHeaderBody, options: Option<RpcOptions>) -> GatewayResult<Vec<u8>> {
        let data = header::write(header_body, bytecode)?;
        let response = self.inner.deploy(DeployRequest { data, options }).await?;
        info!("deployed {}", to_hex(&response.address));
        Ok(response.address)
    }

    /// Calls a service with encoded `data`, encrypting it for confidential services. Confidential
    ///  calls need `aad` in the options and, if transactions are signed locally, a gas limit.
    pub async fn rpc(&self, address: &[u8], data: &[u8], options: Option<RpcOptions>) -> GatewayResult<Vec<u8>> {
        let coder = self.discover_coder(address).await?;

        if coder.is_confidential() && self.inner.has_signer() && options.as_ref().and_then(|o| o.gas_limit).is_none() {
            return Err(GatewayError::InvalidRequest("confidential transactions signed by the client need a gas limit".to_string()));
        }

        let aad = options.as_ref()
            .and_then(|o| o.aad.as_deref())
            .map(str::as_bytes);
        let encoded = coder.encode(data, aad)?;

        let response = self.inner.rpc(RpcRequest {
            data: encoded,
            address: address.to_vec(),
            options,
        }).await?;

        if let Some(error) = response.error {
            return Err(GatewayError::TransactionReverted(String::from_utf8_lossy(&error).to_string()));
        }
        Ok(coder.decode(&parse_hex(&response.output)?)?)
    }

    pub async fn subscribe(&self, request: SubscribeRequest) -> GatewayResult<EventStream> {
        self.inner.subscribe(request).await
    }

    pub async fn unsubscribe(&self, event: &str) -> GatewayResult<()> {
        self.inner.unsubscribe(event).await
    }

    pub fn connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.connection_state()
    }

    /// Disconnects from the gateway and stops all polling
    pub async fn shutdown(&self) {
        self.inner.disconnect().await;
        if let Some(registry) = &self.registry {
            for poller in registry.drain().await {
                poller.stop().await;
            }
        }
    }
}
