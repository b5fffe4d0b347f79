//! 在线表 (Presence Registry)
//!
//! 参与者 → 活动连接的运行时目录，网关进程私有。单把锁保护，
//! 不持久化、不跨进程、没有 TTL：在线的定义就是"这条连接上一次
//! 登记过这个 id 且连接还开着"。
//!
//! key 带角色标签，乘客和司机的 id 空间互不干扰。

use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use shared::live::ServerEvent;
use shared::types::{ParticipantId, Role};

/// 连接出站通道
pub type LiveSender = mpsc::Sender<ServerEvent>;

/// 在线表项: 连接标识 + 出站通道
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub sender: LiveSender,
}

impl ConnectionHandle {
    pub fn new(conn_id: Uuid, sender: LiveSender) -> Self {
        Self { conn_id, sender }
    }
}

/// 在线表
///
/// 网关启动时创建并注入，进程退出即消失。所有读写都经过同一把锁，
/// register/lookup/deregister 之间不会看到中间状态。
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<(Role, ParticipantId), ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记参与者，后登记者覆盖先登记者
    ///
    /// 同一连接换 id 重新登记也是覆盖语义，不会产生重复表项。
    pub fn register(&self, role: Role, id: ParticipantId, handle: ConnectionHandle) {
        let mut entries = self.entries.write();
        if let Some(previous) = entries.insert((role, id.clone()), handle) {
            tracing::debug!(
                role = %role,
                id = %id,
                old_conn = %previous.conn_id,
                "presence entry overwritten by new registration"
            );
        }
        tracing::info!(role = %role, id = %id, "participant online");
    }

    /// 查找参与者的连接
    pub fn lookup(&self, role: Role, id: &str) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .get(&(role, id.to_string()))
            .cloned()
    }

    /// 清掉某条连接登记的所有表项，连接关闭时调用一次
    pub fn deregister_by_connection(&self, conn_id: Uuid) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, handle| handle.conn_id != conn_id);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(conn_id = %conn_id, removed, "presence entries removed");
        }
        removed
    }

    /// 尽力推送一条事件
    ///
    /// 不在线、缓冲满、连接已关都静默丢弃 —— 发送方不会得知推送
    /// 失败，对称性完全靠客户端超时。返回值仅供日志与测试观察。
    pub fn push(&self, role: Role, id: &str, event: ServerEvent) -> bool {
        let Some(handle) = self.lookup(role, id) else {
            tracing::debug!(role = %role, id = %id, "push dropped, participant offline");
            return false;
        };

        match handle.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(role = %role, id = %id, "push dropped, outbound buffer full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(role = %role, id = %id, "push dropped, connection closing");
                false
            }
        }
    }

    /// 当前在线表项数
    pub fn online_count(&self) -> usize {
        self.entries.read().len()
    }
}
