//! 候选筛选
//!
//! 消费 `driver-candidate-notify`，按可用性 + 车辆类型 + 坐标新鲜度 +
//! 1 km 半径过滤司机池，命中则向网关发布候选集。

use shared::bus::{Delivery, DurableBus};
use shared::message::{CandidateQuery, CandidateSet, QUEUE_CANDIDATE_NOTIFY, QUEUE_CANDIDATE_PUSH};
use shared::now_millis;
use shared::types::ParticipantId;
use tokio_util::sync::CancellationToken;

use crate::geo::haversine_km;
use crate::store::{DriverStore, StoreResult};

/// 匹配半径 (km)
pub const MATCH_RADIUS_KM: f64 = 1.0;

/// 候选筛选
///
/// 对照上次坐标更新时间做过期判断；过期记录的坐标不可信，
/// 直接排除 (宁可漏派也不派给早已离开的司机)。
pub fn find_candidates(
    store: &DriverStore,
    query: &CandidateQuery,
    stale_after_ms: i64,
) -> StoreResult<Vec<ParticipantId>> {
    let now = now_millis();
    let drivers = store.scan_available()?;

    let candidates = drivers
        .into_iter()
        .filter(|d| d.vehicle_class == query.vehicle_class)
        .filter(|d| {
            d.located_at
                .is_some_and(|t| now.saturating_sub(t) <= stale_after_ms)
        })
        .filter(|d| {
            d.coordinates
                .is_some_and(|p| haversine_km(query.coordinates, p) <= MATCH_RADIUS_KM)
        })
        .map(|d| d.driver_id)
        .collect();

    Ok(candidates)
}

/// 消费 `driver-candidate-notify` 队列
pub async fn run_candidate_consumer(
    store: DriverStore,
    bus: DurableBus,
    stale_after_ms: i64,
    shutdown: CancellationToken,
) {
    let consumer = bus.consumer(QUEUE_CANDIDATE_NOTIFY);
    tracing::info!("candidate consumer started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("candidate consumer shutting down");
                break;
            }

            result = consumer.recv() => {
                match result {
                    Ok(delivery) => handle_query(&store, &bus, stale_after_ms, delivery),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to receive candidate query");
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

fn handle_query(store: &DriverStore, bus: &DurableBus, stale_after_ms: i64, delivery: Delivery) {
    let query: CandidateQuery = match delivery.parse() {
        Ok(query) => query,
        Err(e) => {
            tracing::warn!(error = %e, "malformed candidate query dropped");
            if let Err(e) = delivery.ack() {
                tracing::warn!(error = %e, "failed to ack delivery");
            }
            return;
        }
    };

    let candidates = match find_candidates(store, &query, stale_after_ms) {
        Ok(candidates) => candidates,
        Err(e) => {
            // 扫描失败交给重投机制重试，不吞掉
            tracing::error!(ride_id = %query.ride_id, error = %e, "driver scan failed");
            delivery.nack();
            return;
        }
    };

    if candidates.is_empty() {
        // 空集不发事件，乘客侧超时自行放弃
        tracing::info!(ride_id = %query.ride_id, "no drivers in range");
        if let Err(e) = delivery.ack() {
            tracing::warn!(error = %e, "failed to ack delivery");
        }
        return;
    }

    tracing::info!(
        ride_id = %query.ride_id,
        count = candidates.len(),
        "candidates found"
    );

    let set = CandidateSet {
        ride_id: query.ride_id,
        requester_id: query.requester_id,
        pickup: query.pickup,
        destination: query.destination,
        coordinates: query.coordinates,
        vehicle_class: query.vehicle_class,
        drivers: candidates,
    };

    match bus.publish(QUEUE_CANDIDATE_PUSH, &set) {
        Ok(_) => {
            if let Err(e) = delivery.ack() {
                tracing::warn!(error = %e, "failed to ack delivery");
            }
        }
        Err(e) => {
            tracing::error!(ride_id = %set.ride_id, error = %e, "failed to publish candidate set");
            delivery.nack();
        }
    }
}
