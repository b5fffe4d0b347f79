//! redb 行程存储
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `rides` | ride_id | JSON-serialized Ride | 行程记录 (只增不删) |
//!
//! 所有条件变更都在单个写事务内完成读-判-写。redb 写事务串行化，
//! 这就是接单竞争所需的原子 compare-and-set。

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use shared::now_millis;
use shared::types::{Ride, RideStatus};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const RIDES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rides");

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

/// 指派司机的条件更新结果
#[derive(Debug)]
pub enum AssignOutcome {
    /// 指派成功，行程进入 accepted
    Assigned(Ride),
    /// 行程已不在 requested，返回当前记录供调用方裁决
    StatusConflict(Ride),
}

/// OTP 校验开始行程的结果
#[derive(Debug)]
pub enum StartOutcome {
    Started(Ride),
    WrongOtp(Ride),
    WrongStatus(Ride),
}

/// 完成行程的结果
#[derive(Debug)]
pub enum CompleteOutcome {
    Completed(Ride),
    /// 已经完成过，no-op (重复投递是预期行为)
    AlreadyCompleted(Ride),
    WrongStatus(Ride),
}

/// 行程存储
#[derive(Clone)]
pub struct RideStore {
    db: Arc<Database>,
}

impl RideStore {
    /// 打开或创建数据库
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
            let _ = write_txn.open_table(RIDES_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// 写入新行程
    pub fn insert(&self, ride: &Ride) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RIDES_TABLE)?;
            let bytes = serde_json::to_vec(ride)?;
            table.insert(ride.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// 按 id 读取行程
    pub fn get(&self, ride_id: &str) -> StoreResult<Option<Ride>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RIDES_TABLE)?;
        match table.get(ride_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// 条件指派司机: 仅当行程仍为 requested 时写入 driver 并置 accepted
    ///
    /// 并发接单的仲裁点。返回 None 表示行程不存在。
    pub fn try_assign_driver(
        &self,
        ride_id: &str,
        driver_id: &str,
    ) -> StoreResult<Option<AssignOutcome>> {
        let txn = self.db.begin_write()?;
        let mut outcome = None;
        {
            let mut table = txn.open_table(RIDES_TABLE)?;
            let existing: Option<Ride> = match table.get(ride_id)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            if let Some(mut ride) = existing {
                if ride.status == RideStatus::Requested {
                    ride.driver_id = Some(driver_id.to_string());
                    ride.status = RideStatus::Accepted;
                    ride.updated_at = now_millis();
                    let bytes = serde_json::to_vec(&ride)?;
                    table.insert(ride_id, bytes.as_slice())?;
                    outcome = Some(AssignOutcome::Assigned(ride));
                } else {
                    outcome = Some(AssignOutcome::StatusConflict(ride));
                }
            }
        }
        txn.commit()?;
        Ok(outcome)
    }

    /// 条件开始行程: OTP 匹配且状态为 accepted 才迁移到 started
    pub fn start_with_otp(&self, ride_id: &str, otp: u16) -> StoreResult<Option<StartOutcome>> {
        let txn = self.db.begin_write()?;
        let mut outcome = None;
        {
            let mut table = txn.open_table(RIDES_TABLE)?;
            let existing: Option<Ride> = match table.get(ride_id)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            if let Some(mut ride) = existing {
                if ride.status != RideStatus::Accepted {
                    outcome = Some(StartOutcome::WrongStatus(ride));
                } else if ride.otp != otp {
                    outcome = Some(StartOutcome::WrongOtp(ride));
                } else {
                    ride.status = RideStatus::Started;
                    ride.updated_at = now_millis();
                    let bytes = serde_json::to_vec(&ride)?;
                    table.insert(ride_id, bytes.as_slice())?;
                    outcome = Some(StartOutcome::Started(ride));
                }
            }
        }
        txn.commit()?;
        Ok(outcome)
    }

    /// 条件完成行程: started → completed，重复完成是 no-op
    pub fn complete(&self, ride_id: &str) -> StoreResult<Option<CompleteOutcome>> {
        let txn = self.db.begin_write()?;
        let mut outcome = None;
        {
            let mut table = txn.open_table(RIDES_TABLE)?;
            let existing: Option<Ride> = match table.get(ride_id)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            if let Some(mut ride) = existing {
                match ride.status {
                    RideStatus::Started => {
                        ride.status = RideStatus::Completed;
                        ride.updated_at = now_millis();
                        let bytes = serde_json::to_vec(&ride)?;
                        table.insert(ride_id, bytes.as_slice())?;
                        outcome = Some(CompleteOutcome::Completed(ride));
                    }
                    RideStatus::Completed => {
                        outcome = Some(CompleteOutcome::AlreadyCompleted(ride));
                    }
                    _ => {
                        outcome = Some(CompleteOutcome::WrongStatus(ride));
                    }
                }
            }
        }
        txn.commit()?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{GeoPoint, VehicleClass};

    fn make_ride(id: &str) -> Ride {
        Ride {
            id: id.to_string(),
            requester_id: "user-1".to_string(),
            driver_id: None,
            pickup: "MG Road".to_string(),
            destination: "Airport".to_string(),
            distance_km: 12.0,
            duration_min: 30.0,
            fare: 240.0,
            vehicle_class: VehicleClass::Cab,
            coordinates: GeoPoint::new(12.9, 77.6),
            otp: 4321,
            status: RideStatus::Requested,
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = RideStore::open_in_memory().unwrap();
        store.insert(&make_ride("r1")).unwrap();

        let ride = store.get("r1").unwrap().unwrap();
        assert_eq!(ride.status, RideStatus::Requested);
        assert!(ride.driver_id.is_none());
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_assign_only_once() {
        let store = RideStore::open_in_memory().unwrap();
        store.insert(&make_ride("r1")).unwrap();

        let first = store.try_assign_driver("r1", "driver-a").unwrap().unwrap();
        assert!(matches!(first, AssignOutcome::Assigned(_)));

        let second = store.try_assign_driver("r1", "driver-b").unwrap().unwrap();
        match second {
            AssignOutcome::StatusConflict(ride) => {
                assert_eq!(ride.driver_id.as_deref(), Some("driver-a"));
                assert_eq!(ride.status, RideStatus::Accepted);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_start_requires_accepted_and_matching_otp() {
        let store = RideStore::open_in_memory().unwrap();
        store.insert(&make_ride("r1")).unwrap();

        // requested 状态下不能开始
        let early = store.start_with_otp("r1", 4321).unwrap().unwrap();
        assert!(matches!(early, StartOutcome::WrongStatus(_)));

        store.try_assign_driver("r1", "driver-a").unwrap();

        let wrong = store.start_with_otp("r1", 1111).unwrap().unwrap();
        assert!(matches!(wrong, StartOutcome::WrongOtp(_)));
        assert_eq!(
            store.get("r1").unwrap().unwrap().status,
            RideStatus::Accepted
        );

        let ok = store.start_with_otp("r1", 4321).unwrap().unwrap();
        assert!(matches!(ok, StartOutcome::Started(_)));
    }

    #[test]
    fn test_complete_is_idempotent() {
        let store = RideStore::open_in_memory().unwrap();
        store.insert(&make_ride("r1")).unwrap();
        store.try_assign_driver("r1", "driver-a").unwrap();
        store.start_with_otp("r1", 4321).unwrap();

        let first = store.complete("r1").unwrap().unwrap();
        assert!(matches!(first, CompleteOutcome::Completed(_)));

        let again = store.complete("r1").unwrap().unwrap();
        match again {
            CompleteOutcome::AlreadyCompleted(ride) => {
                assert_eq!(ride.status, RideStatus::Completed)
            }
            other => panic!("expected no-op, got {:?}", other),
        }
    }

    #[test]
    fn test_rides_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rides.redb");

        {
            let store = RideStore::open(&path).unwrap();
            store.insert(&make_ride("r1")).unwrap();
        }

        let store = RideStore::open(&path).unwrap();
        let ride = store.get("r1").unwrap().unwrap();
        assert_eq!(ride.pickup, "MG Road");
    }
}
