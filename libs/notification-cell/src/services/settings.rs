use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use shared_store::DocumentStore;

use crate::models::{ChannelToggles, NotificationKind};

const SETTINGS_DOC: &str = "notificationSettings/default";
const CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    loaded_at: Instant,
    toggles: HashMap<String, ChannelToggles>,
}

/// Per-kind channel enablement, read from the store and cached for five
/// minutes. Process-local; replacement is last-writer-wins.
pub struct NotificationSettingsService {
    store: Arc<dyn DocumentStore>,
    cache: RwLock<Option<CacheEntry>>,
}

impl NotificationSettingsService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    pub async fn toggles_for(&self, kind: NotificationKind) -> ChannelToggles {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.loaded_at.elapsed() < CACHE_TTL {
                    return entry
                        .toggles
                        .get(kind.key())
                        .copied()
                        .unwrap_or_default();
                }
            }
        }

        let toggles = self.load().await;
        let result = toggles.get(kind.key()).copied().unwrap_or_default();
        *self.cache.write().await = Some(CacheEntry {
            loaded_at: Instant::now(),
            toggles,
        });
        result
    }

    /// Drop the cache; the next read hits the store. Used between tests and
    /// after settings edits.
    pub async fn reset(&self) {
        *self.cache.write().await = None;
    }

    async fn load(&self) -> HashMap<String, ChannelToggles> {
        let mut toggles = HashMap::new();
        match self.store.get(SETTINGS_DOC).await {
            Ok(Some(doc)) => {
                if let Value::Object(map) = doc.data {
                    for (key, value) in map {
                        if let Ok(entry) = serde_json::from_value::<ChannelToggles>(value) {
                            toggles.insert(key, entry);
                        }
                    }
                }
            }
            Ok(None) => debug!("no notification settings document; all kinds default on"),
            Err(e) => debug!(error = %e, "failed to load notification settings; defaulting on"),
        }
        toggles
    }
}
