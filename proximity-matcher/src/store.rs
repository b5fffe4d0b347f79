//! 司机可用性存储
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `drivers` | driver_id | JSON-serialized DriverRecord | 可用性记录 |
//!
//! `available` 只由显式上线/下线改写；坐标新鲜度由 `located_at`
//! 时间戳表达，由匹配侧判断是否过期。

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::now_millis;
use shared::types::{GeoPoint, ParticipantId, VehicleClass};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const DRIVERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("drivers");

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 司机可用性记录
///
/// 坐标只有在 `available == true` 且未过期时才可信。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: ParticipantId,
    pub vehicle_class: VehicleClass,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub available: bool,
    /// 最近一次坐标更新的 Unix 毫秒时间戳
    #[serde(default)]
    pub located_at: Option<i64>,
}

/// 司机存储
#[derive(Clone)]
pub struct DriverStore {
    db: Arc<Database>,
}

impl DriverStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::from_db(db)
    }

    /// 内存后端 (测试用)
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::from_db(db)
    }

    fn from_db(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DRIVERS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// 登记司机 (注册时调用)，重复登记覆盖车辆类型
    pub fn register(&self, driver_id: &str, vehicle_class: VehicleClass) -> StoreResult<DriverRecord> {
        let record = match self.get(driver_id)? {
            Some(mut existing) => {
                existing.vehicle_class = vehicle_class;
                existing
            }
            None => DriverRecord {
                driver_id: driver_id.to_string(),
                vehicle_class,
                coordinates: None,
                available: false,
                located_at: None,
            },
        };
        self.put(&record)?;
        Ok(record)
    }

    /// 司机上线: 置可用并刷新坐标
    pub fn go_online(&self, driver_id: &str, point: GeoPoint) -> StoreResult<Option<DriverRecord>> {
        self.update(driver_id, |record| {
            record.available = true;
            record.coordinates = Some(point);
            record.located_at = Some(now_millis());
        })
    }

    /// 司机下线
    pub fn go_offline(&self, driver_id: &str) -> StoreResult<Option<DriverRecord>> {
        self.update(driver_id, |record| {
            record.available = false;
        })
    }

    /// 刷新坐标 (不改变可用状态)
    pub fn update_location(
        &self,
        driver_id: &str,
        point: GeoPoint,
    ) -> StoreResult<Option<DriverRecord>> {
        self.update(driver_id, |record| {
            record.coordinates = Some(point);
            record.located_at = Some(now_millis());
        })
    }

    pub fn get(&self, driver_id: &str) -> StoreResult<Option<DriverRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DRIVERS_TABLE)?;
        match table.get(driver_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// 扫描所有当前可用的司机
    ///
    /// 扫描失败必须向上传播，由消息重投机制重试。
    pub fn scan_available(&self) -> StoreResult<Vec<DriverRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DRIVERS_TABLE)?;

        let mut drivers = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let record: DriverRecord = serde_json::from_slice(value.value())?;
            if record.available {
                drivers.push(record);
            }
        }
        Ok(drivers)
    }

    fn put(&self, record: &DriverRecord) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DRIVERS_TABLE)?;
            let bytes = serde_json::to_vec(record)?;
            table.insert(record.driver_id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn update(
        &self,
        driver_id: &str,
        apply: impl FnOnce(&mut DriverRecord),
    ) -> StoreResult<Option<DriverRecord>> {
        let txn = self.db.begin_write()?;
        let mut updated = None;
        {
            let mut table = txn.open_table(DRIVERS_TABLE)?;
            let existing: Option<DriverRecord> = match table.get(driver_id)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            if let Some(mut record) = existing {
                apply(&mut record);
                let bytes = serde_json::to_vec(&record)?;
                table.insert(driver_id, bytes.as_slice())?;
                updated = Some(record);
            }
        }
        txn.commit()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_online() {
        let store = DriverStore::open_in_memory().unwrap();
        store.register("d1", VehicleClass::Cab).unwrap();

        let record = store.get("d1").unwrap().unwrap();
        assert!(!record.available);
        assert!(record.coordinates.is_none());

        let online = store
            .go_online("d1", GeoPoint::new(12.9, 77.6))
            .unwrap()
            .unwrap();
        assert!(online.available);
        assert!(online.located_at.is_some());
    }

    #[test]
    fn test_online_unknown_driver() {
        let store = DriverStore::open_in_memory().unwrap();
        let result = store.go_online("ghost", GeoPoint::new(0.0, 0.0)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_scan_available_excludes_offline() {
        let store = DriverStore::open_in_memory().unwrap();
        store.register("d1", VehicleClass::Cab).unwrap();
        store.register("d2", VehicleClass::Cab).unwrap();
        store.go_online("d1", GeoPoint::new(12.9, 77.6)).unwrap();
        store.go_online("d2", GeoPoint::new(12.9, 77.6)).unwrap();
        store.go_offline("d2").unwrap();

        let available = store.scan_available().unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].driver_id, "d1");
    }

    #[test]
    fn test_update_location_keeps_availability() {
        let store = DriverStore::open_in_memory().unwrap();
        store.register("d1", VehicleClass::Bike).unwrap();
        store.go_online("d1", GeoPoint::new(12.9, 77.6)).unwrap();

        let moved = store
            .update_location("d1", GeoPoint::new(12.91, 77.61))
            .unwrap()
            .unwrap();
        assert!(moved.available);
        assert_eq!(moved.coordinates.unwrap().lat, 12.91);
    }
}
