//! Client-side cache of table and tablet locations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::RpcError;
use crate::rpc::{TableInfo, TabletLocation, TabletLocator};
use crate::types::TableId;

/// Wraps a [`TabletLocator`] and caches its answers.
///
/// Tablet locations are keyed by partition start key per table, so a lookup
/// for any key inside a cached partition is served locally. Locks are never
/// held across an `.await`.
pub struct MetaCache {
    inner: Arc<dyn TabletLocator>,
    tables: RwLock<HashMap<String, TableInfo>>,
    tablets: RwLock<HashMap<TableId, BTreeMap<Vec<u8>, TabletLocation>>>,
}

impl MetaCache {
    pub fn new(inner: Arc<dyn TabletLocator>) -> Self {
        Self {
            inner,
            tables: RwLock::new(HashMap::new()),
            tablets: RwLock::new(HashMap::new()),
        }
    }

    fn cached_tablet(&self, table_id: &str, key: &[u8]) -> Option<TabletLocation> {
        let tablets = self.tablets.read();
        let (_, loc) = tablets
            .get(table_id)?
            .range(..=key.to_vec())
            .next_back()?;
        loc.partition.contains(key).then(|| loc.clone())
    }

    /// Look `name` up at the source, replacing any cached entry.
    pub async fn refresh_table(&self, name: &str) -> Result<TableInfo, RpcError> {
        self.tables.write().remove(name);
        self.lookup_table(name).await
    }

    /// Number of cached tablet locations, across all tables.
    pub fn cached_tablet_count(&self) -> usize {
        self.tablets.read().values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl TabletLocator for MetaCache {
    async fn lookup_table(&self, name: &str) -> Result<TableInfo, RpcError> {
        let cached = self.tables.read().get(name).cloned();
        if let Some(info) = cached {
            return Ok(info);
        }
        let info = self.inner.lookup_table(name).await?;
        self.tables.write().insert(name.to_string(), info.clone());
        Ok(info)
    }

    async fn locate_tablet(&self, table_id: &str, key: &[u8]) -> Result<TabletLocation, RpcError> {
        if let Some(loc) = self.cached_tablet(table_id, key) {
            return Ok(loc);
        }
        let loc = self.inner.locate_tablet(table_id, key).await?;
        debug!(table = table_id, tablet = %loc.tablet_id, "cached tablet location");
        self.tablets
            .write()
            .entry(table_id.to_string())
            .or_default()
            .insert(loc.partition.start_key.clone(), loc.clone());
        Ok(loc)
    }

    async fn invalidate(&self, tablet_id: &str) {
        {
            let mut tablets = self.tablets.write();
            for by_start in tablets.values_mut() {
                by_start.retain(|_, loc| loc.tablet_id != tablet_id);
            }
        }
        debug!(tablet = tablet_id, "invalidated tablet location");
        self.inner.invalidate(tablet_id).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::rpc::{Partition, ReplicaInfo, ReplicaRole};
    use crate::schema::{ColumnSchema, Schema};
    use crate::types::DataType;

    /// Two tablets split at 0x50, counting lookups.
    struct CountingLocator {
        calls: AtomicUsize,
    }

    fn location(id: &str, start: Vec<u8>, end: Vec<u8>) -> TabletLocation {
        TabletLocation {
            tablet_id: id.to_string(),
            partition: Partition {
                start_key: start,
                end_key: end,
            },
            replicas: vec![ReplicaInfo {
                server: "ts-0".to_string(),
                role: ReplicaRole::Leader,
            }],
        }
    }

    #[async_trait]
    impl TabletLocator for CountingLocator {
        async fn lookup_table(&self, name: &str) -> Result<TableInfo, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let schema = Schema::builder()
                .add_column(ColumnSchema::new("key", DataType::Int32).not_null())
                .set_primary_keys(&["key"])
                .build()
                .unwrap();
            Ok(TableInfo {
                id: "tbl-1".to_string(),
                name: name.to_string(),
                schema: Arc::new(schema),
            })
        }

        async fn locate_tablet(&self, _table_id: &str, key: &[u8]) -> Result<TabletLocation, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key < &[0x50][..] {
                Ok(location("t-0", vec![], vec![0x50]))
            } else {
                Ok(location("t-1", vec![0x50], vec![]))
            }
        }

        async fn invalidate(&self, _tablet_id: &str) {}
    }

    #[tokio::test]
    async fn test_locations_are_cached_by_partition() {
        let inner = Arc::new(CountingLocator {
            calls: AtomicUsize::new(0),
        });
        let cache = MetaCache::new(inner.clone());

        assert_eq!(cache.locate_tablet("tbl-1", &[]).await.unwrap().tablet_id, "t-0");
        assert_eq!(cache.locate_tablet("tbl-1", &[0x10]).await.unwrap().tablet_id, "t-0");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.locate_tablet("tbl-1", &[0x60]).await.unwrap().tablet_id, "t-1");
        assert_eq!(cache.locate_tablet("tbl-1", &[0x50]).await.unwrap().tablet_id, "t-1");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached_tablet_count(), 2);

        cache.invalidate("t-0").await;
        assert_eq!(cache.cached_tablet_count(), 1);
        cache.locate_tablet("tbl-1", &[0x10]).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_table_lookup_cached() {
        let inner = Arc::new(CountingLocator {
            calls: AtomicUsize::new(0),
        });
        let cache = MetaCache::new(inner.clone());
        cache.lookup_table("t").await.unwrap();
        cache.lookup_table("t").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cache.refresh_table("t").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        cache.lookup_table("t").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
