//! 实时连接 TCP 服务

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use shared::bus::DurableBus;

use crate::connection::handle_connection;
use crate::presence::PresenceRegistry;

/// 实时连接服务入口
///
/// 每接受一条连接就 spawn 一个独立任务，互不阻塞。
pub async fn run_live_server(
    listener: TcpListener,
    registry: Arc<PresenceRegistry>,
    bus: DurableBus,
    channel_capacity: usize,
    shutdown: CancellationToken,
) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    tracing::info!("live connection server listening on {}", local);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("live connection server shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let registry = registry.clone();
                        let bus = bus.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, registry, bus, channel_capacity, shutdown)
                                .await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }
}
