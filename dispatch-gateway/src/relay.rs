//! 客户端事件分发
//!
//! 连接读到的每个事件在这里落到三类动作之一：
//!
//! 1. 登记在线 (register-as-*)
//! 2. 接单转投持久总线 (accept-ride)，网关不做任何裁决
//! 3. 即时转发给收件人 (定位/聊天/开始信号/呼叫信令)，收件人
//!    不在线就静默丢弃

use std::sync::Arc;
use uuid::Uuid;

use shared::bus::DurableBus;
use shared::live::{ClientEvent, ServerEvent};
use shared::message::{AcceptanceRequest, QUEUE_RIDE_ACCEPTANCE};
use shared::types::Role;

use crate::presence::{ConnectionHandle, LiveSender, PresenceRegistry};

/// 单条连接的分发上下文
pub struct ConnectionContext {
    pub conn_id: Uuid,
    pub registry: Arc<PresenceRegistry>,
    pub bus: DurableBus,
    pub sender: LiveSender,
}

impl ConnectionContext {
    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.conn_id, self.sender.clone())
    }
}

/// 处理一个客户端事件
pub fn handle_client_event(ctx: &ConnectionContext, event: ClientEvent) {
    match event {
        // ========== 在线登记 ==========
        ClientEvent::RegisterAsRequester { id } => {
            ctx.registry.register(Role::Requester, id, ctx.handle());
        }
        ClientEvent::RegisterAsDriver { id } => {
            ctx.registry.register(Role::Driver, id, ctx.handle());
        }

        // ========== 接单转投 ==========
        ClientEvent::AcceptRide { ride_id, driver_id } => {
            let request = AcceptanceRequest { ride_id, driver_id };
            if let Err(e) = ctx.bus.publish(QUEUE_RIDE_ACCEPTANCE, &request) {
                tracing::error!(
                    ride_id = %request.ride_id,
                    error = %e,
                    "failed to forward acceptance to bus"
                );
            }
        }

        // ========== 即时转发 ==========
        ClientEvent::DriverLocation {
            ride_id,
            requester_id,
            lat,
            lng,
        } => {
            ctx.registry.push(
                Role::Requester,
                &requester_id,
                ServerEvent::DriverLocation { ride_id, lat, lng },
            );
        }

        ClientEvent::RiderLocation {
            ride_id,
            driver_id,
            lat,
            lng,
        } => {
            ctx.registry.push(
                Role::Driver,
                &driver_id,
                ServerEvent::RiderLocation { ride_id, lat, lng },
            );
        }

        ClientEvent::ChatMessage(msg) => {
            // 发件人角色决定收件方
            let (role, target) = match msg.sender {
                Role::Requester => (Role::Driver, msg.driver_id.clone()),
                Role::Driver => (Role::Requester, msg.requester_id.clone()),
            };
            ctx.registry.push(role, &target, ServerEvent::ChatMessage(msg));
        }

        ClientEvent::RideStart {
            ride_id,
            requester_id,
        } => {
            ctx.registry.push(
                Role::Requester,
                &requester_id,
                ServerEvent::RideStart { ride_id },
            );
        }

        // ========== 呼叫信令 (带角色标签的收件人) ==========
        ClientEvent::CallOffer { from, to, offer } => {
            ctx.registry
                .push(to.role, &to.id, ServerEvent::CallOffer { from, offer });
        }
        ClientEvent::CallAnswer { from, to, answer } => {
            ctx.registry
                .push(to.role, &to.id, ServerEvent::CallAnswer { from, answer });
        }
        ClientEvent::IceCandidate {
            from,
            to,
            candidate,
        } => {
            ctx.registry
                .push(to.role, &to.id, ServerEvent::IceCandidate { from, candidate });
        }
        ClientEvent::CallDeclined { from, to } => {
            ctx.registry
                .push(to.role, &to.id, ServerEvent::CallDeclined { from });
        }
        ClientEvent::CallEnded { from, to } => {
            ctx.registry
                .push(to.role, &to.id, ServerEvent::CallEnded { from });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::live::ChatMessage;
    use shared::types::ParticipantRef;
    use tokio::sync::mpsc;

    fn context(registry: Arc<PresenceRegistry>) -> (ConnectionContext, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let ctx = ConnectionContext {
            conn_id: Uuid::new_v4(),
            registry,
            bus: DurableBus::open_in_memory().unwrap(),
            sender: tx,
        };
        (ctx, rx)
    }

    fn online(
        registry: &PresenceRegistry,
        role: Role,
        id: &str,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(8);
        registry.register(role, id.to_string(), ConnectionHandle::new(Uuid::new_v4(), tx));
        rx
    }

    #[tokio::test]
    async fn test_register_event_adds_presence() {
        let registry = Arc::new(PresenceRegistry::new());
        let (ctx, _rx) = context(registry.clone());

        handle_client_event(
            &ctx,
            ClientEvent::RegisterAsDriver {
                id: "d1".to_string(),
            },
        );
        assert!(registry.lookup(Role::Driver, "d1").is_some());
    }

    #[tokio::test]
    async fn test_accept_ride_lands_on_bus() {
        let registry = Arc::new(PresenceRegistry::new());
        let (ctx, _rx) = context(registry);

        handle_client_event(
            &ctx,
            ClientEvent::AcceptRide {
                ride_id: "r1".to_string(),
                driver_id: "d1".to_string(),
            },
        );

        let consumer = ctx.bus.consumer(QUEUE_RIDE_ACCEPTANCE);
        let delivery = consumer.recv().await.unwrap();
        let request: AcceptanceRequest = delivery.parse().unwrap();
        assert_eq!(request.ride_id, "r1");
        assert_eq!(request.driver_id, "d1");
        delivery.ack().unwrap();
    }

    #[tokio::test]
    async fn test_driver_location_relayed_to_requester() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut requester_rx = online(&registry, Role::Requester, "u1");
        let (ctx, _rx) = context(registry);

        handle_client_event(
            &ctx,
            ClientEvent::DriverLocation {
                ride_id: "r1".to_string(),
                requester_id: "u1".to_string(),
                lat: 12.91,
                lng: 77.61,
            },
        );

        match requester_rx.recv().await {
            Some(ServerEvent::DriverLocation { ride_id, lat, .. }) => {
                assert_eq!(ride_id, "r1");
                assert_eq!(lat, 12.91);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_routed_by_sender_role() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut driver_rx = online(&registry, Role::Driver, "d1");
        let mut requester_rx = online(&registry, Role::Requester, "u1");
        let (ctx, _rx) = context(registry);

        let from_requester = ChatMessage {
            ride_id: "r1".to_string(),
            sender: Role::Requester,
            requester_id: "u1".to_string(),
            driver_id: "d1".to_string(),
            text: "where are you?".to_string(),
        };
        handle_client_event(&ctx, ClientEvent::ChatMessage(from_requester));
        assert!(matches!(
            driver_rx.recv().await,
            Some(ServerEvent::ChatMessage(_))
        ));

        let from_driver = ChatMessage {
            ride_id: "r1".to_string(),
            sender: Role::Driver,
            requester_id: "u1".to_string(),
            driver_id: "d1".to_string(),
            text: "two minutes".to_string(),
        };
        handle_client_event(&ctx, ClientEvent::ChatMessage(from_driver));
        assert!(matches!(
            requester_rx.recv().await,
            Some(ServerEvent::ChatMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_call_signaling_respects_role_tag() {
        let registry = Arc::new(PresenceRegistry::new());
        // 同名 id，不同角色：呼叫必须只落在目标角色上
        let mut driver_rx = online(&registry, Role::Driver, "42");
        let mut requester_rx = online(&registry, Role::Requester, "42");
        let (ctx, _rx) = context(registry);

        handle_client_event(
            &ctx,
            ClientEvent::CallOffer {
                from: ParticipantRef::requester("u1"),
                to: ParticipantRef::driver("42"),
                offer: serde_json::json!({"sdp": "offer"}),
            },
        );

        assert!(matches!(
            driver_rx.recv().await,
            Some(ServerEvent::CallOffer { .. })
        ));
        assert!(requester_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_to_offline_participant_is_silent() {
        let registry = Arc::new(PresenceRegistry::new());
        let (ctx, _rx) = context(registry);

        // 没有任何在线登记，转发必须静默完成
        handle_client_event(
            &ctx,
            ClientEvent::RideStart {
                ride_id: "r1".to_string(),
                requester_id: "ghost".to_string(),
            },
        );
    }
}
