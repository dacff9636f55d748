//! Persistent metadata store for apps and partition configurations
//!
//! Column families:
//! - `apps`: app id → `AppInfo`
//! - `partitions`: (app id, partition index) → `PartitionConfig`
//!
//! Values are bincode encoded. Keys are big-endian so a scan returns
//! partitions grouped by app, in index order.

use crate::common::{PartitionConfig, Result};
use crate::meta::view::AppInfo;
use rocksdb::{ColumnFamily, IteratorMode, Options, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const CF_APPS: &str = "apps";
const CF_PARTITIONS: &str = "partitions";

/// Apps with their saved partition configurations
pub type SavedApps = Vec<(AppInfo, Vec<PartitionConfig>)>;

pub trait MetaStore: Send + Sync {
    fn put_app(&self, info: &AppInfo) -> Result<()>;

    fn put_partition(&self, config: &PartitionConfig) -> Result<()>;

    /// Everything saved, ordered by app id
    fn load(&self) -> Result<SavedApps>;
}

fn partition_key(app_id: i32, partition_index: i32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&app_id.to_be_bytes());
    key[4..].copy_from_slice(&partition_index.to_be_bytes());
    key
}

/// In-process store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    apps: Mutex<BTreeMap<i32, AppInfo>>,
    partitions: Mutex<BTreeMap<[u8; 8], PartitionConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryStore {
    fn put_app(&self, info: &AppInfo) -> Result<()> {
        self.apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.app_id, info.clone());
        Ok(())
    }

    fn put_partition(&self, config: &PartitionConfig) -> Result<()> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                partition_key(config.pid.app_id, config.pid.partition_index),
                config.clone(),
            );
        Ok(())
    }

    fn load(&self) -> Result<SavedApps> {
        let apps = self.apps.lock().unwrap_or_else(PoisonError::into_inner);
        let partitions = self
            .partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(apps
            .values()
            .map(|info| {
                let saved = partitions
                    .values()
                    .filter(|pc| pc.pid.app_id == info.app_id)
                    .cloned()
                    .collect();
                (info.clone(), saved)
            })
            .collect())
    }
}

/// RocksDB-backed store
pub struct MetadataStore {
    db: DB,
}

impl MetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_APPS, CF_PARTITIONS])?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| crate::Error::Internal(format!("missing column family {}", name)))
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl MetaStore for MetadataStore {
    fn put_app(&self, info: &AppInfo) -> Result<()> {
        let value = bincode::serialize(info)
            .map_err(|e| crate::Error::Internal(format!("Serialize error: {}", e)))?;
        self.db
            .put_cf(self.cf(CF_APPS)?, info.app_id.to_be_bytes(), value)?;
        Ok(())
    }

    fn put_partition(&self, config: &PartitionConfig) -> Result<()> {
        let value = bincode::serialize(config)
            .map_err(|e| crate::Error::Internal(format!("Serialize error: {}", e)))?;
        self.db.put_cf(
            self.cf(CF_PARTITIONS)?,
            partition_key(config.pid.app_id, config.pid.partition_index),
            value,
        )?;
        Ok(())
    }

    fn load(&self) -> Result<SavedApps> {
        let mut apps: BTreeMap<i32, (AppInfo, Vec<PartitionConfig>)> = BTreeMap::new();

        for item in self.db.iterator_cf(self.cf(CF_APPS)?, IteratorMode::Start) {
            let (_, value) = item?;
            let info: AppInfo = bincode::deserialize(&value)
                .map_err(|e| crate::Error::MetadataCorrupted(e.to_string()))?;
            apps.insert(info.app_id, (info, Vec::new()));
        }

        for item in self
            .db
            .iterator_cf(self.cf(CF_PARTITIONS)?, IteratorMode::Start)
        {
            let (_, value) = item?;
            let config: PartitionConfig = bincode::deserialize(&value)
                .map_err(|e| crate::Error::MetadataCorrupted(e.to_string()))?;
            match apps.get_mut(&config.pid.app_id) {
                Some((_, saved)) => saved.push(config),
                None => {
                    return Err(crate::Error::MetadataCorrupted(format!(
                        "partition {} has no app",
                        config.pid
                    )))
                }
            }
        }

        Ok(apps.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Gpid, NodeId};
    use tempfile::tempdir;

    fn app(app_id: i32) -> AppInfo {
        AppInfo {
            app_id,
            app_name: format!("app-{}", app_id),
            partition_count: 2,
            max_replica_count: 3,
        }
    }

    fn config(app_id: i32, index: i32) -> PartitionConfig {
        let mut pc = PartitionConfig::new(Gpid::new(app_id, index), 3);
        pc.ballot = 7;
        pc.primary = Some(NodeId::from("node-1:34801"));
        pc.secondaries = vec![NodeId::from("node-2:34801")];
        pc.last_drops = vec![NodeId::from("node-3:34801")];
        pc
    }

    #[test]
    fn test_metadata_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.db");
        {
            let store = MetadataStore::open(&path).unwrap();
            store.put_app(&app(2)).unwrap();
            store.put_app(&app(1)).unwrap();
            store.put_partition(&config(1, 1)).unwrap();
            store.put_partition(&config(1, 0)).unwrap();
            store.put_partition(&config(2, 0)).unwrap();
            store.flush().unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        let saved = store.load().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].0, app(1));
        assert_eq!(saved[0].1, vec![config(1, 0), config(1, 1)]);
        assert_eq!(saved[1].1.len(), 1);
    }

    #[test]
    fn test_orphan_partition_is_corruption() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("meta.db")).unwrap();
        store.put_partition(&config(5, 0)).unwrap();
        assert!(matches!(
            store.load(),
            Err(crate::Error::MetadataCorrupted(_))
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.put_app(&app(1)).unwrap();
        store.put_partition(&config(1, 0)).unwrap();
        let mut updated = config(1, 0);
        updated.ballot = 8;
        store.put_partition(&updated).unwrap();

        let saved = store.load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1, vec![updated]);
    }
}
