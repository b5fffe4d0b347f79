//! 单连接处理
//!
//! 每条连接两个任务：读循环 (当前任务) + 出站写任务。出站走有界
//! mpsc，桥接和转发方用 try_send，写不进去就丢，绝不反压到总线
//! 消费。任意一侧终止都会取消 disconnect token 拉倒另一侧，
//! 最后无条件清理在线表。

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::bus::DurableBus;
use shared::live::{ClientEvent, ProtocolError, read_frame, write_frame};

use crate::presence::PresenceRegistry;
use crate::relay::{ConnectionContext, handle_client_event};

/// 处理一条客户端连接，连接关闭后返回
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<PresenceRegistry>,
    bus: DurableBus,
    channel_capacity: usize,
    shutdown: CancellationToken,
) {
    let conn_id = Uuid::new_v4();
    tracing::debug!(conn_id = %conn_id, addr = %addr, "client connected");

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel(channel_capacity);
    let disconnect = CancellationToken::new();

    // 出站写任务
    let writer_disconnect = disconnect.clone();
    let writer_shutdown = shutdown.clone();
    let writer_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                _ = writer_disconnect.cancelled() => break,
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = write_frame(&mut writer, &event).await {
                                tracing::debug!(conn_id = %conn_id, error = %e, "client write failed");
                                writer_disconnect.cancel();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let ctx = ConnectionContext {
        conn_id,
        registry: registry.clone(),
        bus,
        sender: tx,
    };

    // 读循环
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = disconnect.cancelled() => break,

            result = read_frame::<_, ClientEvent>(&mut reader) => {
                match result {
                    Ok(event) => handle_client_event(&ctx, event),
                    Err(ProtocolError::Closed) => {
                        tracing::debug!(conn_id = %conn_id, "client disconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = %conn_id, error = %e, "client read error");
                        break;
                    }
                }
            }
        }
    }

    // 清理: 先停写任务，再无条件清在线表
    disconnect.cancel();
    let _ = writer_handle.await;
    registry.deregister_by_connection(conn_id);
    tracing::debug!(conn_id = %conn_id, addr = %addr, "connection cleaned up");
}
