//! 司机可用性 HTTP 路由
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /drivers/register | POST | 登记司机与车辆类型 |
//! | /drivers/online | POST | 上线并上报坐标 |
//! | /drivers/offline | POST | 下线 |
//! | /drivers/location | POST | 刷新坐标 |
//! | /drivers/{id} | GET | 查询可用性记录 |

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use shared::types::{GeoPoint, ParticipantId, VehicleClass};

use crate::error::{MatcherError, MatcherResult};
use crate::store::{DriverRecord, DriverStore};

/// 司机路由
pub fn router(store: DriverStore) -> Router {
    Router::new()
        .route("/drivers/register", post(register))
        .route("/drivers/online", post(go_online))
        .route("/drivers/offline", post(go_offline))
        .route("/drivers/location", post(update_location))
        .route("/drivers/{id}", get(get_by_id))
        .with_state(store)
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub driver_id: ParticipantId,
    pub vehicle_class: VehicleClass,
}

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub driver_id: ParticipantId,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct DriverIdBody {
    pub driver_id: ParticipantId,
}

/// POST /drivers/register - 登记司机
async fn register(
    State(store): State<DriverStore>,
    Json(body): Json<RegisterBody>,
) -> MatcherResult<Json<DriverRecord>> {
    let record = store.register(&body.driver_id, body.vehicle_class)?;
    tracing::info!(driver = %record.driver_id, class = %record.vehicle_class, "driver registered");
    Ok(Json(record))
}

/// POST /drivers/online - 司机上线
async fn go_online(
    State(store): State<DriverStore>,
    Json(body): Json<LocationBody>,
) -> MatcherResult<Json<DriverRecord>> {
    let record = store
        .go_online(&body.driver_id, GeoPoint::new(body.lat, body.lng))?
        .ok_or_else(|| MatcherError::NotFound(body.driver_id.clone()))?;
    tracing::info!(driver = %record.driver_id, "driver online");
    Ok(Json(record))
}

/// POST /drivers/offline - 司机下线
async fn go_offline(
    State(store): State<DriverStore>,
    Json(body): Json<DriverIdBody>,
) -> MatcherResult<Json<DriverRecord>> {
    let record = store
        .go_offline(&body.driver_id)?
        .ok_or_else(|| MatcherError::NotFound(body.driver_id.clone()))?;
    tracing::info!(driver = %record.driver_id, "driver offline");
    Ok(Json(record))
}

/// POST /drivers/location - 刷新坐标
async fn update_location(
    State(store): State<DriverStore>,
    Json(body): Json<LocationBody>,
) -> MatcherResult<Json<DriverRecord>> {
    let record = store
        .update_location(&body.driver_id, GeoPoint::new(body.lat, body.lng))?
        .ok_or_else(|| MatcherError::NotFound(body.driver_id.clone()))?;
    Ok(Json(record))
}

/// GET /drivers/{id} - 查询记录
async fn get_by_id(
    State(store): State<DriverStore>,
    Path(id): Path<ParticipantId>,
) -> MatcherResult<Json<DriverRecord>> {
    let record = store
        .get(&id)?
        .ok_or_else(|| MatcherError::NotFound(id.clone()))?;
    Ok(Json(record))
}
