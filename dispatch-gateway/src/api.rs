//! 网关 HTTP 路由
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /rides/request | POST | 乘客发起行程请求 (入队即返回 202) |
//! | /health | GET | 健康检查 |

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use shared::bus::DurableBus;
use shared::message::{QUEUE_RIDE_REQUESTS, RideRequest};

/// 乘客入口路由
pub fn router(bus: DurableBus) -> Router {
    Router::new()
        .route("/rides/request", post(request_ride))
        .with_state(bus)
}

/// 健康检查路由 - 公共路由
pub fn health_router() -> Router {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct RequestAccepted {
    status: &'static str,
    /// 关联 id，仅用于客户端日志对账，不是行程 id
    request_id: String,
}

/// POST /rides/request - 发起行程请求
///
/// 请求只入队，创建与校验由 ride-ledger 消费时完成。乘客端从这里
/// 开始计 120 秒等待窗口，窗口内没收到 ride-accepted 即放弃。
async fn request_ride(
    State(bus): State<DurableBus>,
    Json(request): Json<RideRequest>,
) -> Result<(StatusCode, Json<RequestAccepted>), StatusCode> {
    match bus.publish(QUEUE_RIDE_REQUESTS, &request) {
        Ok(_) => {
            let request_id = uuid::Uuid::new_v4().to_string();
            tracing::info!(
                requester = %request.requester_id,
                request_id = %request_id,
                "ride request queued"
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(RequestAccepted {
                    status: "queued",
                    request_id,
                }),
            ))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to queue ride request");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// 健康检查响应
#[derive(Serialize)]
struct HealthResponse {
    /// 状态 (ok | error)
    status: &'static str,
    /// 版本号
    version: &'static str,
}

/// GET /health - 简单健康检查
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
