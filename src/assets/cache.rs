use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{AssetLoader, OrgAssets};
use crate::error::Result;
use crate::models::OrgId;

#[derive(Clone)]
struct CachedAssets {
    assets: Arc<OrgAssets>,
    loaded_at: Instant,
}

/// Per-org asset snapshots with a freshness TTL
pub struct AssetCache {
    loader: Arc<dyn AssetLoader>,
    ttl: Duration,
    entries: DashMap<OrgId, CachedAssets>,
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("ttl", &self.ttl)
            .field("cached_orgs", &self.entries.len())
            .finish()
    }
}

impl AssetCache {
    pub fn new(loader: Arc<dyn AssetLoader>, ttl: Duration) -> Self {
        Self {
            loader,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Snapshot for the org, loading a new one if none is cached or the
    /// cached one is older than the TTL
    pub async fn get(&self, org_id: OrgId) -> Result<Arc<OrgAssets>> {
        if let Some(entry) = self.entries.get(&org_id) {
            if entry.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&entry.assets));
            }
        }
        self.refresh(org_id).await
    }

    /// Loads a new snapshot regardless of what is cached
    pub async fn refresh(&self, org_id: OrgId) -> Result<Arc<OrgAssets>> {
        let assets = Arc::new(self.loader.load(org_id).await?);
        self.entries.insert(
            org_id,
            CachedAssets {
                assets: Arc::clone(&assets),
                loaded_at: Instant::now(),
            },
        );
        Ok(assets)
    }

    pub fn invalidate(&self, org_id: OrgId) {
        self.entries.remove(&org_id);
    }
}
