//! 行程生命周期操作
//!
//! 每个变更遵循同一纪律: 先在自己的存储里提交，再发布事件。
//! 下游看到事件时行程记录必然已落盘 (单行程因果序)。

use rand::Rng;
use shared::bus::DurableBus;
use shared::message::{
    CandidateQuery, GatewayNotify, NotifyEvent, QUEUE_CANDIDATE_NOTIFY, QUEUE_GATEWAY_NOTIFY,
    RideRequest,
};
use shared::types::{ParticipantRef, Ride, RideId, RideStatus};
use shared::now_millis;

use crate::error::{LedgerError, LedgerResult};
use crate::store::{AssignOutcome, CompleteOutcome, RideStore, StartOutcome};

/// 接单结果
///
/// 竞争落败是预期值而不是异常，调用方据此通知落败司机。
#[derive(Debug)]
pub enum AcceptOutcome {
    /// 本司机赢得行程
    Accepted(Ride),
    /// 行程已被占用，附当前记录
    Lost(Ride),
}

/// 行程账本
///
/// 行程记录的唯一写入方。
#[derive(Clone)]
pub struct RideLedger {
    store: RideStore,
    bus: DurableBus,
}

impl RideLedger {
    pub fn new(store: RideStore, bus: DurableBus) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &RideStore {
        &self.store
    }

    /// 创建行程
    ///
    /// 生成四位 OTP (1000..=9999，并发行程间碰撞可接受，不查重)，
    /// 落库后发布候选筛选事件。
    pub fn create_ride(&self, request: RideRequest) -> LedgerResult<Ride> {
        if request.requester_id.trim().is_empty() {
            return Err(LedgerError::Validation("requester_id is required".into()));
        }
        let Some(coordinates) = request.coordinates else {
            return Err(LedgerError::Validation("coordinates are required".into()));
        };

        let otp: u16 = rand::thread_rng().gen_range(1000..=9999);
        let now = now_millis();
        let ride = Ride {
            id: uuid::Uuid::new_v4().to_string(),
            requester_id: request.requester_id,
            driver_id: None,
            pickup: request.pickup,
            destination: request.destination,
            distance_km: request.distance_km,
            duration_min: request.duration_min,
            fare: request.fare,
            vehicle_class: request.vehicle_class,
            coordinates,
            otp,
            status: RideStatus::Requested,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(&ride)?;

        self.bus.publish(
            QUEUE_CANDIDATE_NOTIFY,
            &CandidateQuery {
                ride_id: ride.id.clone(),
                requester_id: ride.requester_id.clone(),
                pickup: ride.pickup.clone(),
                destination: ride.destination.clone(),
                coordinates: ride.coordinates,
                vehicle_class: ride.vehicle_class,
            },
        )?;

        tracing::info!(ride_id = %ride.id, requester = %ride.requester_id, "ride created");
        Ok(ride)
    }

    /// 司机接单 (条件更新)
    ///
    /// 成功时向乘客推送 ride-accepted 通知。落败返回 `Lost`，
    /// 由调用方决定是否通知落败司机。
    pub fn accept_ride(&self, ride_id: &str, driver_id: &str) -> LedgerResult<AcceptOutcome> {
        match self.store.try_assign_driver(ride_id, driver_id)? {
            None => Err(LedgerError::NotFound(ride_id.to_string())),
            Some(AssignOutcome::Assigned(ride)) => {
                self.bus.publish(
                    QUEUE_GATEWAY_NOTIFY,
                    &GatewayNotify {
                        target: ParticipantRef::requester(ride.requester_id.clone()),
                        event: NotifyEvent::RideAccepted,
                        ride_id: ride.id.clone(),
                        driver_id: ride.driver_id.clone(),
                    },
                )?;
                tracing::info!(ride_id = %ride.id, driver = %driver_id, "ride accepted");
                Ok(AcceptOutcome::Accepted(ride))
            }
            Some(AssignOutcome::StatusConflict(ride)) => {
                tracing::debug!(
                    ride_id = %ride.id,
                    driver = %driver_id,
                    status = %ride.status,
                    "acceptance lost the race"
                );
                Ok(AcceptOutcome::Lost(ride))
            }
        }
    }

    /// OTP 校验并开始行程
    ///
    /// OTP 不匹配可由同一司机重试，状态不动。
    pub fn verify_and_start(&self, ride_id: &str, otp: u16) -> LedgerResult<Ride> {
        match self.store.start_with_otp(ride_id, otp)? {
            None => Err(LedgerError::NotFound(ride_id.to_string())),
            Some(StartOutcome::Started(ride)) => {
                tracing::info!(ride_id = %ride.id, "ride started");
                Ok(ride)
            }
            Some(StartOutcome::WrongOtp(ride)) => {
                tracing::debug!(ride_id = %ride.id, "OTP mismatch");
                Err(LedgerError::OtpMismatch)
            }
            Some(StartOutcome::WrongStatus(ride)) => Err(LedgerError::InvalidState {
                expected: RideStatus::Accepted,
                actual: ride.status,
            }),
        }
    }

    /// 完成行程
    ///
    /// at-least-once 投递下完成信号可能重复到达，重复完成是 no-op。
    pub fn complete_ride(&self, ride_id: &str) -> LedgerResult<Ride> {
        match self.store.complete(ride_id)? {
            None => Err(LedgerError::NotFound(ride_id.to_string())),
            Some(CompleteOutcome::Completed(ride)) => {
                tracing::info!(ride_id = %ride.id, "ride completed");
                Ok(ride)
            }
            Some(CompleteOutcome::AlreadyCompleted(ride)) => Ok(ride),
            Some(CompleteOutcome::WrongStatus(ride)) => Err(LedgerError::InvalidState {
                expected: RideStatus::Started,
                actual: ride.status,
            }),
        }
    }

    pub fn get_ride(&self, ride_id: &RideId) -> LedgerResult<Ride> {
        self.store
            .get(ride_id)?
            .ok_or_else(|| LedgerError::NotFound(ride_id.clone()))
    }
}
