//! 核心领域类型
//!
//! 参与者标识由外部身份服务签发，这里按不透明字符串处理。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 参与者标识 (乘客或司机)，由身份服务签发
pub type ParticipantId = String;

/// 行程标识
pub type RideId = String;

/// 参与者角色
///
/// 乘客和司机的 id 命名空间相互独立，所有按参与者寻址的场合
/// (在线表、呼叫信令) 必须同时携带角色标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 乘客
    Requester,
    /// 司机
    Driver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requester => write!(f, "requester"),
            Self::Driver => write!(f, "driver"),
        }
    }
}

/// 带角色标签的参与者引用
///
/// 呼叫信令的收件方用它寻址，避免乘客/司机 id 碰撞时投递错人。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub role: Role,
    pub id: ParticipantId,
}

impl ParticipantRef {
    pub fn requester(id: impl Into<ParticipantId>) -> Self {
        Self {
            role: Role::Requester,
            id: id.into(),
        }
    }

    pub fn driver(id: impl Into<ParticipantId>) -> Self {
        Self {
            role: Role::Driver,
            id: id.into(),
        }
    }
}

/// 地理坐标 (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// 车辆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    Bike,
    Auto,
    Cab,
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bike => write!(f, "Bike"),
            Self::Auto => write!(f, "Auto"),
            Self::Cab => write!(f, "Cab"),
        }
    }
}

/// 行程状态
///
/// 状态只能单调前进: Requested → Accepted → Started → Completed。
/// 每次迁移有且只有一个触发原因 (司机接单 / OTP 校验 / 完成信号)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Requested,
    Accepted,
    Started,
    Completed,
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Accepted => write!(f, "accepted"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// 行程记录
///
/// 由 ride-ledger 独占持有和变更，完成后保留作为历史记录，永不删除。
///
/// 不变量: `driver_id` 为 None 当且仅当 `status == Requested`；
/// `otp` 在创建时生成一次，之后不再变化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub requester_id: ParticipantId,
    #[serde(default)]
    pub driver_id: Option<ParticipantId>,
    pub pickup: String,
    pub destination: String,
    pub distance_km: f64,
    pub duration_min: f64,
    pub fare: f64,
    pub vehicle_class: VehicleClass,
    /// 乘客发起请求时所在坐标
    pub coordinates: GeoPoint,
    /// 上车校验码，四位数字
    pub otp: u16,
    pub status: RideStatus,
    pub created_at: i64,
    pub updated_at: i64,
}
