//! 持久队列契约
//!
//! 服务之间只通过持久总线上的命名队列通信。队列名固定，载荷为 JSON。
//!
//! | 队列 | 生产者 | 消费者 |
//! |------|--------|--------|
//! | `ride-requests` | 乘客侧入口 | ride-ledger |
//! | `driver-candidate-notify` | ride-ledger (创建后) | proximity-matcher |
//! | `gateway-candidate-push` | proximity-matcher | dispatch-gateway |
//! | `ride-acceptance` | dispatch-gateway (司机动作) | ride-ledger |
//! | `ledger-to-gateway-notify` | ride-ledger | dispatch-gateway |

use serde::{Deserialize, Serialize};

use crate::types::{GeoPoint, ParticipantId, ParticipantRef, RideId, VehicleClass};

// ========== Queue Names ==========

pub const QUEUE_RIDE_REQUESTS: &str = "ride-requests";
pub const QUEUE_CANDIDATE_NOTIFY: &str = "driver-candidate-notify";
pub const QUEUE_CANDIDATE_PUSH: &str = "gateway-candidate-push";
pub const QUEUE_RIDE_ACCEPTANCE: &str = "ride-acceptance";
pub const QUEUE_GATEWAY_NOTIFY: &str = "ledger-to-gateway-notify";

// ========== Payloads ==========

/// 行程请求 (乘客侧入口 → ride-ledger)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub requester_id: ParticipantId,
    pub pickup: String,
    pub destination: String,
    pub distance_km: f64,
    pub duration_min: f64,
    pub fare: f64,
    pub vehicle_class: VehicleClass,
    /// 乘客当前坐标，邻近匹配的圆心
    pub coordinates: Option<GeoPoint>,
}

/// 候选筛选请求 (ride-ledger → proximity-matcher)
///
/// 行程落库之后发出，matcher 据此做地理过滤。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub ride_id: RideId,
    pub requester_id: ParticipantId,
    pub pickup: String,
    pub destination: String,
    pub coordinates: GeoPoint,
    pub vehicle_class: VehicleClass,
}

/// 候选集 (proximity-matcher → dispatch-gateway)
///
/// 每个行程最多产生一条；空集不发。无重试状态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub ride_id: RideId,
    pub requester_id: ParticipantId,
    pub pickup: String,
    pub destination: String,
    pub coordinates: GeoPoint,
    pub vehicle_class: VehicleClass,
    /// 半径内可达的在线司机
    pub drivers: Vec<ParticipantId>,
}

/// 接单提交 (dispatch-gateway → ride-ledger)
///
/// 网关只做转发，接不接得上由 ledger 的条件更新裁决。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceRequest {
    pub ride_id: RideId,
    pub driver_id: ParticipantId,
}

/// 定向通知 (ride-ledger → dispatch-gateway)
///
/// 网关按 `target` 查在线表，在线则实时推送，离线即丢弃。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayNotify {
    pub target: ParticipantRef,
    pub event: NotifyEvent,
    pub ride_id: RideId,
    #[serde(default)]
    pub driver_id: Option<ParticipantId>,
}

/// ledger 发往网关的事件名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyEvent {
    /// 行程已被接单 (发给乘客)
    RideAccepted,
    /// 行程已被别的司机抢走 (发给落败司机)
    RideUnavailable,
}
