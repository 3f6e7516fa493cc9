//! Id-keyed registry of live sessions shared across tasks

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cheaply cloneable map from session id to a shared value
pub struct Registry<V> {
    entries: Arc<RwLock<HashMap<String, V>>>,
}

impl<V> Clone for Registry<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless `id` is taken; returns whether the value was stored.
    pub async fn insert(&self, id: impl Into<String>, value: V) -> bool {
        let mut entries = self.entries.write().await;
        let id = id.into();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, value);
        true
    }

    pub async fn get(&self, id: &str) -> Option<V> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<V> {
        self.entries.write().await.remove(id)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Snapshot of every value; the lock is not held afterwards
    pub async fn values(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
