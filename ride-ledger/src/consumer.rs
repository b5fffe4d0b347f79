//! 持久总线消费循环
//!
//! 两个队列，各一个长驻任务：
//!
//! - `ride-requests`: 创建行程。载荷坏掉或校验失败直接 ack 丢弃
//!   (重投不会让坏请求变好)，基础设施错误 nack 等待重投。
//! - `ride-acceptance`: 条件接单。竞争落败时向落败司机发
//!   ride-unavailable 通知；同一司机的重复投递按已生效处理。

use shared::bus::{Delivery, DurableBus};
use shared::message::{
    AcceptanceRequest, GatewayNotify, NotifyEvent, QUEUE_GATEWAY_NOTIFY, QUEUE_RIDE_ACCEPTANCE,
    QUEUE_RIDE_REQUESTS, RideRequest,
};
use shared::types::ParticipantRef;
use tokio_util::sync::CancellationToken;

use crate::error::LedgerError;
use crate::ledger::{AcceptOutcome, RideLedger};

/// 消费 `ride-requests` 队列
pub async fn run_request_consumer(
    ledger: RideLedger,
    bus: DurableBus,
    shutdown: CancellationToken,
) {
    let consumer = bus.consumer(QUEUE_RIDE_REQUESTS);
    tracing::info!("ride request consumer started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("ride request consumer shutting down");
                break;
            }

            result = consumer.recv() => {
                match result {
                    Ok(delivery) => handle_request(&ledger, delivery),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to receive ride request");
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

fn handle_request(ledger: &RideLedger, delivery: Delivery) {
    let request: RideRequest = match delivery.parse() {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "malformed ride request dropped");
            ack_or_warn(delivery);
            return;
        }
    };

    match ledger.create_ride(request) {
        Ok(ride) => {
            tracing::info!(ride_id = %ride.id, "ride request processed");
            ack_or_warn(delivery);
        }
        // 校验失败不重投：同一条消息重来还是会失败
        Err(LedgerError::Validation(reason)) => {
            tracing::warn!(reason = %reason, "invalid ride request dropped");
            ack_or_warn(delivery);
        }
        Err(e) => {
            tracing::error!(error = %e, "ride creation failed, leaving for redelivery");
            delivery.nack();
        }
    }
}

/// 消费 `ride-acceptance` 队列
pub async fn run_acceptance_consumer(
    ledger: RideLedger,
    bus: DurableBus,
    shutdown: CancellationToken,
) {
    let consumer = bus.consumer(QUEUE_RIDE_ACCEPTANCE);
    tracing::info!("ride acceptance consumer started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("ride acceptance consumer shutting down");
                break;
            }

            result = consumer.recv() => {
                match result {
                    Ok(delivery) => handle_acceptance(&ledger, &bus, delivery),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to receive acceptance");
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

fn handle_acceptance(ledger: &RideLedger, bus: &DurableBus, delivery: Delivery) {
    let request: AcceptanceRequest = match delivery.parse() {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "malformed acceptance dropped");
            ack_or_warn(delivery);
            return;
        }
    };

    match ledger.accept_ride(&request.ride_id, &request.driver_id) {
        Ok(AcceptOutcome::Accepted(_)) => ack_or_warn(delivery),

        Ok(AcceptOutcome::Lost(ride)) => {
            if ride.driver_id.as_deref() == Some(request.driver_id.as_str()) {
                // at-least-once 重投：这单就是本司机接的，已生效
                tracing::debug!(ride_id = %ride.id, "duplicate acceptance, already applied");
                ack_or_warn(delivery);
                return;
            }

            let notice = GatewayNotify {
                target: ParticipantRef::driver(request.driver_id.clone()),
                event: NotifyEvent::RideUnavailable,
                ride_id: ride.id.clone(),
                driver_id: None,
            };
            match bus.publish(QUEUE_GATEWAY_NOTIFY, &notice) {
                Ok(_) => ack_or_warn(delivery),
                Err(e) => {
                    tracing::error!(error = %e, "failed to publish ride-unavailable notice");
                    delivery.nack();
                }
            }
        }

        // 未知行程对这条消息是终态，重投无意义
        Err(LedgerError::NotFound(ride_id)) => {
            tracing::warn!(ride_id = %ride_id, "acceptance for unknown ride dropped");
            ack_or_warn(delivery);
        }

        Err(e) => {
            tracing::error!(error = %e, "acceptance failed, leaving for redelivery");
            delivery.nack();
        }
    }
}

fn ack_or_warn(delivery: Delivery) {
    if let Err(e) = delivery.ack() {
        tracing::warn!(error = %e, "failed to ack delivery, message will be redelivered");
    }
}
