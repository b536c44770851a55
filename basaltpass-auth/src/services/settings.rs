//! Read-mostly cache over the settings table.
//!
//! Readers may see a value up to `ttl` old. Writes through [`SettingsCache::set_maintenance`]
//! refresh the local copy immediately.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::models::{MaintenanceSetting, MAINTENANCE_KEY};
use crate::store::{Store, StoreResult};

pub struct SettingsCache {
    store: Arc<dyn Store>,
    ttl: Duration,
    maintenance: RwLock<Option<(MaintenanceSetting, Instant)>>,
}

impl SettingsCache {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            maintenance: RwLock::new(None),
        }
    }

    fn cached(&self) -> Option<MaintenanceSetting> {
        let guard = self.maintenance.read().ok()?;
        match *guard {
            Some((value, loaded_at)) if loaded_at.elapsed() < self.ttl => Some(value),
            _ => None,
        }
    }

    fn remember(&self, value: MaintenanceSetting) {
        if let Ok(mut guard) = self.maintenance.write() {
            *guard = Some((value, Instant::now()));
        }
    }

    pub async fn maintenance(&self) -> StoreResult<MaintenanceSetting> {
        if let Some(value) = self.cached() {
            return Ok(value);
        }

        let setting = self.store.get_setting(MAINTENANCE_KEY).await?;
        let value = MaintenanceSetting::from_setting(setting.as_ref());
        self.remember(value);
        Ok(value)
    }

    pub async fn set_maintenance(&self, enabled: bool) -> StoreResult<MaintenanceSetting> {
        let value = MaintenanceSetting { enabled };
        self.store.put_setting(&value.to_setting()).await?;
        self.remember(value);
        tracing::info!(enabled, "Maintenance mode updated");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_defaults_to_off() {
        let cache = SettingsCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(30));
        assert!(!cache.maintenance().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_write_through() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = SettingsCache::new(store.clone(), Duration::from_secs(30));
        cache.set_maintenance(true).await.unwrap();
        assert!(cache.maintenance().await.unwrap().enabled);

        let stored = store.get_setting(MAINTENANCE_KEY).await.unwrap();
        assert!(MaintenanceSetting::from_setting(stored.as_ref()).enabled);
    }

    #[tokio::test]
    async fn test_stale_within_ttl() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = SettingsCache::new(store.clone(), Duration::from_secs(30));
        assert!(!cache.maintenance().await.unwrap().enabled);

        // Another replica flips the flag; this one keeps its copy until the TTL lapses.
        store
            .put_setting(&MaintenanceSetting { enabled: true }.to_setting())
            .await
            .unwrap();
        assert!(!cache.maintenance().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reloads() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = SettingsCache::new(store.clone(), Duration::ZERO);
        assert!(!cache.maintenance().await.unwrap().enabled);
        store
            .put_setting(&MaintenanceSetting { enabled: true }.to_setting())
            .await
            .unwrap();
        assert!(cache.maintenance().await.unwrap().enabled);
    }
}
