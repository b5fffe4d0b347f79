//! 实时连接协议
//!
//! 网关与客户端之间的长连接事件，走 TCP 而非持久总线：
//! 定位、聊天、呼叫信令都是即时转发，不落盘、不重投。
//!
//! # 帧格式
//!
//! ```text
//! ┌──────────────┬────────────────────┐
//! │ len (u32 LE) │ JSON payload       │
//! └──────────────┴────────────────────┘
//! ```
//!
//! JSON 载荷是 `{"event": "...", "data": {...}}` 形式的标签枚举。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::types::{GeoPoint, ParticipantId, ParticipantRef, RideId, Role, VehicleClass};

/// 单帧载荷上限，超过即视为协议违规断开
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// 协议层错误
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// 聊天消息
///
/// `sender` 决定转发方向: 乘客发的推给司机，司机发的推给乘客。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub ride_id: RideId,
    pub sender: Role,
    pub requester_id: ParticipantId,
    pub driver_id: ParticipantId,
    pub text: String,
}

/// 客户端 → 网关事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// 以乘客身份登记在线
    RegisterAsRequester { id: ParticipantId },
    /// 以司机身份登记在线
    RegisterAsDriver { id: ParticipantId },
    /// 司机接单，由网关转投到持久总线
    AcceptRide {
        ride_id: RideId,
        driver_id: ParticipantId,
    },
    /// 司机位置心跳，转发给行程乘客
    DriverLocation {
        ride_id: RideId,
        requester_id: ParticipantId,
        lat: f64,
        lng: f64,
    },
    /// 乘客位置心跳，转发给行程司机
    RiderLocation {
        ride_id: RideId,
        driver_id: ParticipantId,
        lat: f64,
        lng: f64,
    },
    ChatMessage(ChatMessage),
    /// 行程开始信号，转发给乘客
    RideStart {
        ride_id: RideId,
        requester_id: ParticipantId,
    },
    // ========== WebRTC 呼叫信令 ==========
    CallOffer {
        from: ParticipantRef,
        to: ParticipantRef,
        offer: serde_json::Value,
    },
    CallAnswer {
        from: ParticipantRef,
        to: ParticipantRef,
        answer: serde_json::Value,
    },
    IceCandidate {
        from: ParticipantRef,
        to: ParticipantRef,
        candidate: serde_json::Value,
    },
    CallDeclined {
        from: ParticipantRef,
        to: ParticipantRef,
    },
    CallEnded {
        from: ParticipantRef,
        to: ParticipantRef,
    },
}

/// 网关 → 客户端事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// 新行程派单 (推给候选司机)
    NewRideOffer {
        ride_id: RideId,
        requester_id: ParticipantId,
        pickup: String,
        destination: String,
        coordinates: GeoPoint,
        vehicle_class: VehicleClass,
    },
    /// 行程已被接单 (推给乘客)
    RideAccepted {
        ride_id: RideId,
        driver_id: ParticipantId,
    },
    /// 行程已被别的司机抢走 (推给落败司机)
    RideUnavailable { ride_id: RideId },
    /// 行程开始 (推给乘客)
    RideStart { ride_id: RideId },
    DriverLocation {
        ride_id: RideId,
        lat: f64,
        lng: f64,
    },
    RiderLocation {
        ride_id: RideId,
        lat: f64,
        lng: f64,
    },
    ChatMessage(ChatMessage),
    // ========== WebRTC 呼叫信令 ==========
    CallOffer {
        from: ParticipantRef,
        offer: serde_json::Value,
    },
    CallAnswer {
        from: ParticipantRef,
        answer: serde_json::Value,
    },
    IceCandidate {
        from: ParticipantRef,
        candidate: serde_json::Value,
    },
    CallDeclined { from: ParticipantRef },
    CallEnded { from: ParticipantRef },
}

// ========== Framing ==========

/// 从流中读取一帧并反序列化
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Closed
        } else {
            ProtocolError::Io(e)
        }
    })?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(serde_json::from_slice(&payload)?)
}

/// 序列化并写出一帧
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    let mut data = Vec::with_capacity(4 + payload.len());
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&payload);
    writer.write_all(&data).await?;
    Ok(())
}
