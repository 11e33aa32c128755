use std::sync::Arc;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Memoizes one shared instance per key (e.g. one poller per gateway queue). The registry is owned
///  by whoever embeds the client, so its lifetime (and cleanup) is explicit rather than
///  process-global.
pub struct InstanceRegistry<V> {
    instances: RwLock<FxHashMap<String, Arc<V>>>,
}

impl<V> Default for InstanceRegistry<V> {
    fn default() -> Self {
        InstanceRegistry {
            instances: Default::default(),
        }
    }
}

impl<V> InstanceRegistry<V> {
    pub fn new() -> InstanceRegistry<V> {
        Default::default()
    }

    pub async fn get_or_create(&self, key: &str, create: impl FnOnce() -> V) -> Arc<V> {
        if let Some(existing) = self.instances.read().await.get(key) {
            return existing.clone();
        }

        let mut instances = self.instances.write().await;
        // re-check: another caller may have created it between the locks
        instances.entry(key.to_string())
            .or_insert_with(|| {
                debug!("creating registry instance for {}", key);
                Arc::new(create())
            })
            .clone()
    }

    pub async fn lookup(&self, key: &str) -> Option<Arc<V>> {
        self.instances.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &str) -> Option<Arc<V>> {
        self.instances.write().await.remove(key)
    }

    /// Empties the registry, returning the instances so the caller can shut them down
    pub async fn drain(&self) -> Vec<Arc<V>> {
        self.instances.write().await
            .drain()
            .map(|(_, v)| v)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }
}
