//! 派单平台共享契约
//!
//! 本 crate 在 ride-ledger、proximity-matcher 和 dispatch-gateway 之间共享：
//!
//! - **types**: 参与者/行程标识、地理坐标、行程状态机类型
//! - **message**: 持久队列的名称与载荷契约
//! - **live**: 网关实时连接的事件协议与帧编码
//! - **bus**: redb 持久化的 at-least-once 消息总线

pub mod bus;
pub mod live;
pub mod message;
pub mod types;

pub use bus::{BusError, BusResult, Delivery, DurableBus, QueueConsumer};
pub use types::{GeoPoint, ParticipantId, ParticipantRef, Ride, RideId, RideStatus, Role, VehicleClass};

/// 当前 Unix 毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
