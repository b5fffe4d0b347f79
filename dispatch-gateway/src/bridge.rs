//! 持久总线 → 实时推送桥
//!
//! 两个消费任务：
//!
//! - `gateway-candidate-push`: 逐个司机查在线表推 new-ride-offer。
//!   不在线的司机收不到也不补投 —— 实时投递是 at-most-once，
//!   可靠性由持久层的条件更新兜底。
//! - `ledger-to-gateway-notify`: 定向通知 (接单结果等) 推给目标
//!   参与者，不在线就丢。
//!
//! 两类消息推完即 ack：推送失败不是基础设施错误，重投只会造成
//! 重复打扰。

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use shared::bus::{Delivery, DurableBus};
use shared::live::ServerEvent;
use shared::message::{CandidateSet, GatewayNotify, NotifyEvent, QUEUE_CANDIDATE_PUSH, QUEUE_GATEWAY_NOTIFY};
use shared::types::Role;

use crate::presence::PresenceRegistry;

/// 消费 `gateway-candidate-push` 队列
pub async fn run_candidate_push_consumer(
    registry: Arc<PresenceRegistry>,
    bus: DurableBus,
    shutdown: CancellationToken,
) {
    let consumer = bus.consumer(QUEUE_CANDIDATE_PUSH);
    tracing::info!("candidate push consumer started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("candidate push consumer shutting down");
                break;
            }

            result = consumer.recv() => {
                match result {
                    Ok(delivery) => handle_candidate_push(&registry, delivery),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to receive candidate push");
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

fn handle_candidate_push(registry: &PresenceRegistry, delivery: Delivery) {
    let set: CandidateSet = match delivery.parse() {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(error = %e, "malformed candidate set dropped");
            ack_or_warn(delivery);
            return;
        }
    };

    let mut delivered = 0usize;
    for driver_id in &set.drivers {
        let offer = ServerEvent::NewRideOffer {
            ride_id: set.ride_id.clone(),
            requester_id: set.requester_id.clone(),
            pickup: set.pickup.clone(),
            destination: set.destination.clone(),
            coordinates: set.coordinates,
            vehicle_class: set.vehicle_class,
        };
        if registry.push(Role::Driver, driver_id, offer) {
            delivered += 1;
        }
    }

    tracing::info!(
        ride_id = %set.ride_id,
        candidates = set.drivers.len(),
        delivered,
        "ride offer pushed"
    );
    ack_or_warn(delivery);
}

/// 消费 `ledger-to-gateway-notify` 队列
pub async fn run_notify_consumer(
    registry: Arc<PresenceRegistry>,
    bus: DurableBus,
    shutdown: CancellationToken,
) {
    let consumer = bus.consumer(QUEUE_GATEWAY_NOTIFY);
    tracing::info!("ledger notify consumer started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("ledger notify consumer shutting down");
                break;
            }

            result = consumer.recv() => {
                match result {
                    Ok(delivery) => handle_notify(&registry, delivery),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to receive ledger notify");
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

fn handle_notify(registry: &PresenceRegistry, delivery: Delivery) {
    let notify: GatewayNotify = match delivery.parse() {
        Ok(notify) => notify,
        Err(e) => {
            tracing::warn!(error = %e, "malformed gateway notify dropped");
            ack_or_warn(delivery);
            return;
        }
    };

    let event = match notify.event {
        NotifyEvent::RideAccepted => match notify.driver_id.clone() {
            Some(driver_id) => ServerEvent::RideAccepted {
                ride_id: notify.ride_id.clone(),
                driver_id,
            },
            None => {
                tracing::warn!(ride_id = %notify.ride_id, "ride-accepted notify without driver");
                ack_or_warn(delivery);
                return;
            }
        },
        NotifyEvent::RideUnavailable => ServerEvent::RideUnavailable {
            ride_id: notify.ride_id.clone(),
        },
    };

    registry.push(notify.target.role, &notify.target.id, event);
    ack_or_warn(delivery);
}

fn ack_or_warn(delivery: Delivery) {
    if let Err(e) = delivery.ack() {
        tracing::warn!(error = %e, "failed to ack delivery, message will be redelivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ConnectionHandle;
    use shared::types::{GeoPoint, ParticipantRef, VehicleClass};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn online(registry: &PresenceRegistry, role: Role, id: &str) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(8);
        registry.register(role, id.to_string(), ConnectionHandle::new(Uuid::new_v4(), tx));
        rx
    }

    fn candidate_set(drivers: Vec<&str>) -> CandidateSet {
        CandidateSet {
            ride_id: "r1".to_string(),
            requester_id: "u1".to_string(),
            pickup: "MG Road".to_string(),
            destination: "Airport".to_string(),
            coordinates: GeoPoint::new(12.9, 77.6),
            vehicle_class: VehicleClass::Cab,
            drivers: drivers.into_iter().map(String::from).collect(),
        }
    }

    #[tokio::test]
    async fn test_offer_pushed_to_online_drivers_only() {
        let registry = Arc::new(PresenceRegistry::new());
        let bus = DurableBus::open_in_memory().unwrap();
        let mut online_rx = online(&registry, Role::Driver, "d-online");

        let shutdown = CancellationToken::new();
        tokio::spawn(run_candidate_push_consumer(
            registry.clone(),
            bus.clone(),
            shutdown.clone(),
        ));

        bus.publish(QUEUE_CANDIDATE_PUSH, &candidate_set(vec!["d-online", "d-offline"]))
            .unwrap();

        let event = timeout(Duration::from_secs(2), online_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::NewRideOffer { ride_id, vehicle_class, .. } => {
                assert_eq!(ride_id, "r1");
                assert_eq!(vehicle_class, VehicleClass::Cab);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // 离线司机不排队：队列已清空
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.pending_count(QUEUE_CANDIDATE_PUSH).unwrap(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_notify_reaches_target_participant() {
        let registry = Arc::new(PresenceRegistry::new());
        let bus = DurableBus::open_in_memory().unwrap();
        let mut requester_rx = online(&registry, Role::Requester, "u1");

        let shutdown = CancellationToken::new();
        tokio::spawn(run_notify_consumer(
            registry.clone(),
            bus.clone(),
            shutdown.clone(),
        ));

        bus.publish(
            QUEUE_GATEWAY_NOTIFY,
            &GatewayNotify {
                target: ParticipantRef::requester("u1"),
                event: NotifyEvent::RideAccepted,
                ride_id: "r1".to_string(),
                driver_id: Some("d1".to_string()),
            },
        )
        .unwrap();

        let event = timeout(Duration::from_secs(2), requester_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::RideAccepted { ride_id, driver_id } => {
                assert_eq!(ride_id, "r1");
                assert_eq!(driver_id, "d1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_notify_for_offline_target_is_dropped() {
        let registry = Arc::new(PresenceRegistry::new());
        let bus = DurableBus::open_in_memory().unwrap();

        let shutdown = CancellationToken::new();
        tokio::spawn(run_notify_consumer(
            registry.clone(),
            bus.clone(),
            shutdown.clone(),
        ));

        bus.publish(
            QUEUE_GATEWAY_NOTIFY,
            &GatewayNotify {
                target: ParticipantRef::driver("ghost"),
                event: NotifyEvent::RideUnavailable,
                ride_id: "r1".to_string(),
                driver_id: None,
            },
        )
        .unwrap();

        // 消息被消费并 ack，不会滞留等目标上线
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bus.pending_count(QUEUE_GATEWAY_NOTIFY).unwrap(), 0);
        shutdown.cancel();
    }
}
