//! Ride Ledger - 行程账本服务
//!
//! 行程状态与司机指派的唯一权威。核心约束：
//!
//! - 状态迁移只能单调前进，每次迁移一个触发原因
//! - 接单走条件更新 (仍为 requested 才指派)，并发抢单只有一个赢家
//! - 开始行程需 OTP 校验
//! - 完成行程幂等，重复投递不会重复生效
//!
//! # 模块结构
//!
//! ```text
//! ride-ledger/src/
//! ├── store.rs     # redb 行程存储，条件更新原语
//! ├── ledger.rs    # 生命周期操作 + 事件发布
//! ├── consumer.rs  # 持久总线消费循环
//! ├── api.rs       # HTTP 路由
//! └── error.rs     # 错误类型
//! ```

pub mod api;
pub mod consumer;
pub mod error;
pub mod ledger;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{AcceptOutcome, RideLedger};
pub use store::{RideStore, StoreError};
