//! 持久消息总线
//!
//! 命名队列、显式 ack、at-least-once 投递，redb 落盘。
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `messages` | `(queue, seq)` | JSON payload | 待投递消息 (append-only, ack 后删除) |
//! | `sequence` | `"seq"` | `u64` | 全局序号 |
//!
//! # 投递语义
//!
//! - `publish` 先提交事务再唤醒消费者，消息可见即已落盘。
//! - `Delivery::ack()` 删除消息；未 ack 的 `Delivery` 被丢弃 (或显式
//!   `nack`) 时消息回到待投递集合，下一次 `recv` 重投。
//! - 进程重启后，未 ack 的消息仍在表里，重新投递 —— at-least-once。
//! - 同一队列的多个消费者通过 in-flight 集合互斥，各自认领不同消息。
//! - 队列之间没有任何顺序保证。

use dashmap::DashMap;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

/// 消息表: key = (队列名, 序号), value = JSON 载荷
const MESSAGES_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("messages");

/// 序号表: 全局单调递增
const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence");

const SEQUENCE_KEY: &str = "seq";

/// 总线错误
#[derive(Debug, Error)]
pub enum BusError {
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

pub type BusResult<T> = Result<T, BusError>;

/// 单个队列的进程内协调状态
struct QueueState {
    /// 有新消息或有消息被释放时唤醒
    notify: Notify,
    /// 已被某个消费者认领、尚未 ack 的序号
    in_flight: Mutex<HashSet<u64>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }
}

struct BusInner {
    db: Database,
    queues: DashMap<String, Arc<QueueState>>,
}

impl BusInner {
    fn queue_state(&self, queue: &str) -> Arc<QueueState> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueState::new()))
            .clone()
    }
}

/// 持久总线句柄，浅拷贝共享
#[derive(Clone)]
pub struct DurableBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for DurableBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableBus").finish()
    }
}

impl DurableBus {
    /// 打开或创建总线数据库
    pub fn open(path: impl AsRef<Path>) -> BusResult<Self> {
        let db = Database::create(path)?;
        Self::from_db(db)
    }

    /// 内存后端 (测试与嵌入式场景)
    pub fn open_in_memory() -> BusResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::from_db(db)
    }

    fn from_db(db: Database) -> BusResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
            let mut seq_table = write_txn.open_table(SEQUENCE_TABLE)?;
            if seq_table.get(SEQUENCE_KEY)?.is_none() {
                seq_table.insert(SEQUENCE_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;

        Ok(Self {
            inner: Arc::new(BusInner {
                db,
                queues: DashMap::new(),
            }),
        })
    }

    /// 发布消息到命名队列
    ///
    /// 事务提交之后才唤醒消费者，保证消费者看到的消息必然已落盘。
    pub fn publish<T: Serialize>(&self, queue: &str, payload: &T) -> BusResult<u64> {
        let bytes = serde_json::to_vec(payload)?;

        let txn = self.inner.db.begin_write()?;
        let seq = {
            let mut seq_table = txn.open_table(SEQUENCE_TABLE)?;
            let next = seq_table
                .get(SEQUENCE_KEY)?
                .map(|g| g.value())
                .unwrap_or(0)
                + 1;
            seq_table.insert(SEQUENCE_KEY, next)?;

            let mut messages = txn.open_table(MESSAGES_TABLE)?;
            messages.insert((queue, next), bytes.as_slice())?;
            next
        };
        txn.commit()?;

        tracing::trace!(queue = %queue, seq, "message published");
        self.inner.queue_state(queue).notify.notify_waiters();
        Ok(seq)
    }

    /// 创建指定队列的消费者
    pub fn consumer(&self, queue: &str) -> QueueConsumer {
        QueueConsumer {
            inner: self.inner.clone(),
            state: self.inner.queue_state(queue),
            queue: queue.to_string(),
        }
    }

    /// 队列中待投递 (含 in-flight) 的消息数，监控用
    pub fn pending_count(&self, queue: &str) -> BusResult<u64> {
        let read_txn = self.inner.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        let mut count = 0;
        for result in table.range((queue, 0u64)..=(queue, u64::MAX))? {
            result?;
            count += 1;
        }
        Ok(count)
    }
}

/// 队列消费者
pub struct QueueConsumer {
    inner: Arc<BusInner>,
    state: Arc<QueueState>,
    queue: String,
}

impl QueueConsumer {
    /// 认领下一条消息，队列为空时挂起等待
    pub async fn recv(&self) -> BusResult<Delivery> {
        loop {
            // 先登记唤醒意向再扫描，避免 publish 落在两者之间丢失唤醒
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_claim()? {
                return Ok(delivery);
            }

            notified.await;
        }
    }

    /// 扫描队列，认领第一条未被认领的消息
    fn try_claim(&self) -> BusResult<Option<Delivery>> {
        let read_txn = self.inner.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        let range_start = (self.queue.as_str(), 0u64);
        let range_end = (self.queue.as_str(), u64::MAX);

        let mut in_flight = self.state.in_flight.lock();
        for result in table.range(range_start..=range_end)? {
            let (key, value) = result?;
            let (_, seq) = key.value();
            if in_flight.contains(&seq) {
                continue;
            }
            in_flight.insert(seq);
            return Ok(Some(Delivery {
                inner: self.inner.clone(),
                state: self.state.clone(),
                queue: self.queue.clone(),
                seq,
                payload: value.value().to_vec(),
                settled: false,
            }));
        }
        Ok(None)
    }
}

/// 一次投递
///
/// 必须显式 `ack` 确认；未确认就被丢弃的投递会回到队列重投。
pub struct Delivery {
    inner: Arc<BusInner>,
    state: Arc<QueueState>,
    queue: String,
    seq: u64,
    payload: Vec<u8>,
    settled: bool,
}

impl Delivery {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 反序列化载荷
    pub fn parse<T: DeserializeOwned>(&self) -> BusResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// 确认消费，从队列中删除消息
    ///
    /// 删除失败时消息保持 in-flight 释放状态，等待重投。
    pub fn ack(mut self) -> BusResult<()> {
        let txn = self.inner.db.begin_write()?;
        {
            let mut table = txn.open_table(MESSAGES_TABLE)?;
            table.remove((self.queue.as_str(), self.seq))?;
        }
        txn.commit()?;

        self.state.in_flight.lock().remove(&self.seq);
        self.settled = true;
        Ok(())
    }

    /// 放弃本次投递，消息立即回到待投递集合
    pub fn nack(mut self) {
        tracing::debug!(queue = %self.queue, seq = self.seq, "delivery nacked, will redeliver");
        self.release();
    }

    fn release(&mut self) {
        self.state.in_flight.lock().remove(&self.seq);
        self.settled = true;
        self.state.notify.notify_waiters();
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestPayload {
        id: u32,
        label: String,
    }

    fn payload(id: u32) -> TestPayload {
        TestPayload {
            id,
            label: format!("msg-{}", id),
        }
    }

    #[tokio::test]
    async fn test_publish_then_consume() {
        let bus = DurableBus::open_in_memory().unwrap();
        bus.publish("q1", &payload(1)).unwrap();

        let consumer = bus.consumer("q1");
        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.parse::<TestPayload>().unwrap(), payload(1));
        delivery.ack().unwrap();

        assert_eq!(bus.pending_count("q1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let bus = DurableBus::open_in_memory().unwrap();
        bus.publish("q1", &payload(1)).unwrap();

        let other = bus.consumer("q2");
        let result = timeout(Duration::from_millis(50), other.recv()).await;
        assert!(result.is_err(), "q2 consumer must not see q1 messages");
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered() {
        let bus = DurableBus::open_in_memory().unwrap();
        bus.publish("q1", &payload(7)).unwrap();

        let consumer = bus.consumer("q1");
        let first = consumer.recv().await.unwrap();
        let seq = first.seq();
        drop(first); // 未 ack

        let second = consumer.recv().await.unwrap();
        assert_eq!(second.seq(), seq);
        assert_eq!(second.parse::<TestPayload>().unwrap(), payload(7));
        second.ack().unwrap();
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let bus = DurableBus::open_in_memory().unwrap();
        bus.publish("q1", &payload(3)).unwrap();

        let consumer = bus.consumer("q1");
        consumer.recv().await.unwrap().nack();

        let again = consumer.recv().await.unwrap();
        assert_eq!(again.parse::<TestPayload>().unwrap(), payload(3));
        again.ack().unwrap();
        assert_eq!(bus.pending_count("q1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_competing_consumers_claim_distinct_messages() {
        let bus = DurableBus::open_in_memory().unwrap();
        bus.publish("q1", &payload(1)).unwrap();
        bus.publish("q1", &payload(2)).unwrap();

        let c1 = bus.consumer("q1");
        let c2 = bus.consumer("q1");

        let d1 = c1.recv().await.unwrap();
        let d2 = c2.recv().await.unwrap();
        assert_ne!(d1.seq(), d2.seq());

        d1.ack().unwrap();
        d2.ack().unwrap();
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let bus = DurableBus::open_in_memory().unwrap();
        for i in 1..=3 {
            bus.publish("q1", &payload(i)).unwrap();
        }

        let consumer = bus.consumer("q1");
        for expected in 1..=3 {
            let delivery = consumer.recv().await.unwrap();
            assert_eq!(delivery.parse::<TestPayload>().unwrap().id, expected);
            delivery.ack().unwrap();
        }
    }

    #[tokio::test]
    async fn test_recv_wakes_on_late_publish() {
        let bus = DurableBus::open_in_memory().unwrap();
        let consumer = bus.consumer("q1");

        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("q1", &payload(9)).unwrap();
        });

        let delivery = timeout(Duration::from_secs(1), consumer.recv())
            .await
            .expect("consumer should wake up")
            .unwrap();
        assert_eq!(delivery.parse::<TestPayload>().unwrap(), payload(9));
        delivery.ack().unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.redb");

        {
            let bus = DurableBus::open(&path).unwrap();
            bus.publish("q1", &payload(42)).unwrap();
            // 消费但不 ack，模拟处理中途失败
            let consumer = bus.consumer("q1");
            let delivery = consumer.recv().await.unwrap();
            drop(delivery);
        }

        let bus = DurableBus::open(&path).unwrap();
        let consumer = bus.consumer("q1");
        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.parse::<TestPayload>().unwrap(), payload(42));
        delivery.ack().unwrap();
    }
}
