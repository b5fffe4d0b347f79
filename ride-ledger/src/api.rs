//! 行程 HTTP 路由
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /rides/accept | POST | 司机接单 (条件更新，409 = 已被抢走) |
//! | /rides/start | POST | OTP 校验并开始行程 |
//! | /rides/complete | POST | 完成行程 (幂等) |
//! | /rides/{id} | GET | 查询行程 |

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use shared::types::{ParticipantId, Ride, RideId};

use crate::error::{ErrorBody, LedgerResult};
use crate::ledger::{AcceptOutcome, RideLedger};

/// 行程路由
pub fn router(ledger: RideLedger) -> Router {
    Router::new()
        .route("/rides/accept", post(accept))
        .route("/rides/start", post(start))
        .route("/rides/complete", post(complete))
        .route("/rides/{id}", get(get_by_id))
        .with_state(ledger)
}

#[derive(Debug, Deserialize)]
pub struct AcceptBody {
    pub ride_id: RideId,
    pub driver_id: ParticipantId,
}

#[derive(Debug, Deserialize)]
pub struct StartBody {
    pub ride_id: RideId,
    pub otp: u16,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub ride_id: RideId,
}

/// POST /rides/accept - 司机接单
///
/// 竞争落败不是错误，返回 409 让司机端提示行程已被抢走。
async fn accept(
    State(ledger): State<RideLedger>,
    Json(body): Json<AcceptBody>,
) -> LedgerResult<Response> {
    match ledger.accept_ride(&body.ride_id, &body.driver_id)? {
        AcceptOutcome::Accepted(ride) => Ok(Json(ride).into_response()),
        AcceptOutcome::Lost(_) => {
            Ok((StatusCode::CONFLICT, Json(ErrorBody::ride_taken())).into_response())
        }
    }
}

/// POST /rides/start - OTP 校验并开始行程
async fn start(
    State(ledger): State<RideLedger>,
    Json(body): Json<StartBody>,
) -> LedgerResult<Json<Ride>> {
    let ride = ledger.verify_and_start(&body.ride_id, body.otp)?;
    Ok(Json(ride))
}

/// POST /rides/complete - 完成行程
async fn complete(
    State(ledger): State<RideLedger>,
    Json(body): Json<CompleteBody>,
) -> LedgerResult<Json<Ride>> {
    let ride = ledger.complete_ride(&body.ride_id)?;
    Ok(Json(ride))
}

/// GET /rides/{id} - 查询行程
async fn get_by_id(
    State(ledger): State<RideLedger>,
    Path(id): Path<RideId>,
) -> LedgerResult<Json<Ride>> {
    let ride = ledger.get_ride(&id)?;
    Ok(Json(ride))
}
