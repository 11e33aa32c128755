use std::sync::Arc;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace};
use crate::confidential::keys::{KeyPair, PrivateKey, PublicKey};
use crate::error::KeyStoreError;

/// Looks up a service's public key, typically with a request to the gateway
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyProvider: Send + Sync + 'static {
    async fn public_key(&self, address: &[u8]) -> anyhow::Result<Option<PublicKey>>;
}

/// Persistence backend for the key store
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);
}

#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<FxHashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: String) {
        self.entries.write().await.insert(key.to_string(), value);
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedKeyPair {
    public_key: String,
    private_key: String,
}

/// Keys for confidential messaging: this client's long-term key pair (created on first use) and
///  cached public keys of services. Entries never expire.
pub struct KeyStore {
    db: Arc<dyn KeyValueStore>,
    key_provider: Arc<dyn KeyProvider>,
    local_keys_lock: Mutex<()>,
}

impl KeyStore {
    pub const LOCAL_KEYPAIR_KEY: &'static str = "@oasislabs/client/me";

    pub fn new(db: Arc<dyn KeyValueStore>, key_provider: Arc<dyn KeyProvider>) -> KeyStore {
        KeyStore {
            db,
            key_provider,
            local_keys_lock: Mutex::new(()),
        }
    }

    /// The service's public key, from the cache or else from the key provider
    pub async fn public_key(&self, service_address: &[u8]) -> Result<PublicKey, KeyStoreError> {
        let cache_key = format!("0x{}", hex::encode(service_address));

        if let Some(cached) = self.db.get(&cache_key).await {
            trace!("public key for {} found in key store", cache_key);
            return PublicKey::from_hex(&cached)
                .map_err(|e| KeyStoreError::Corrupt { key: cache_key, reason: e.to_string() });
        }

        debug!("requesting public key for {}", cache_key);
        let public_key = self.key_provider.public_key(service_address).await
            .map_err(|e| KeyStoreError::Provider(e.to_string()))?
            .ok_or_else(|| KeyStoreError::MissingPublicKey(cache_key.clone()))?;

        self.db.set(&cache_key, public_key.to_hex()).await;
        Ok(public_key)
    }

    /// This client's key pair, created and persisted on first use
    pub async fn local_keys(&self) -> Result<KeyPair, KeyStoreError> {
        let _guard = self.local_keys_lock.lock().await;

        if let Some(serialized) = self.db.get(Self::LOCAL_KEYPAIR_KEY).await {
            return Self::deserialize_key_pair(&serialized);
        }

        let key_pair = KeyPair::generate();
        info!("created new local key pair with public key {:?}", key_pair.public_key);
        self.db.set(Self::LOCAL_KEYPAIR_KEY, Self::serialize_key_pair(&key_pair)?).await;
        Ok(key_pair)
    }

    fn serialize_key_pair(key_pair: &KeyPair) -> Result<String, KeyStoreError> {
        serde_json::to_string(&SerializedKeyPair {
            public_key: key_pair.public_key.to_hex(),
            private_key: key_pair.private_key.to_hex(),
        })
            .map_err(|e| Self::corrupt_local_keys(e.to_string()))
    }

    fn deserialize_key_pair(serialized: &str) -> Result<KeyPair, KeyStoreError> {
        let raw: SerializedKeyPair = serde_json::from_str(serialized)
            .map_err(|e| Self::corrupt_local_keys(e.to_string()))?;

        let public_key = PublicKey::from_hex(&raw.public_key)
            .map_err(|e| Self::corrupt_local_keys(e.to_string()))?;
        let private_key = PrivateKey::from_hex(&raw.private_key)
            .map_err(|e| Self::corrupt_local_keys(e.to_string()))?;

        if private_key.public_key() != public_key {
            return Err(Self::corrupt_local_keys("public key does not belong to the private key".to_string()));
        }
        Ok(KeyPair {
            public_key,
            private_key,
        })
    }

    fn corrupt_local_keys(reason: String) -> KeyStoreError {
        KeyStoreError::Corrupt { key: Self::LOCAL_KEYPAIR_KEY.to_string(), reason }
    }
}
