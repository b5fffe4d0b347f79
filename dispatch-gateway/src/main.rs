use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use dispatch_gateway::{Config, PresenceRegistry, api, bridge, logger, server};
use proximity_matcher::{DriverStore, run_candidate_consumer};
use ride_ledger::consumer::{run_acceptance_consumer, run_request_consumer};
use ride_ledger::ledger::RideLedger;
use ride_ledger::store::RideStore;
use shared::bus::DurableBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境 (dotenv + 日志)
    dotenv::dotenv().ok();
    let config = Config::from_env();
    logger::init_logger_with_file(None, config.log_dir.as_deref());

    tracing::info!("🚕 Dispatch node starting...");

    // 2. 工作目录与持久层
    std::fs::create_dir_all(&config.work_dir)?;
    let bus = DurableBus::open(config.bus_db_path())?;
    let ride_store = RideStore::open(config.rides_db_path())?;
    let driver_store = DriverStore::open(config.drivers_db_path())?;
    let ledger = RideLedger::new(ride_store, bus.clone());

    // 3. 在线表 (网关启动时创建并注入，进程退出即销毁)
    let registry = Arc::new(PresenceRegistry::new());
    let shutdown = CancellationToken::new();

    // 4. 总线消费任务
    tokio::spawn(run_request_consumer(
        ledger.clone(),
        bus.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_acceptance_consumer(
        ledger.clone(),
        bus.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_candidate_consumer(
        driver_store.clone(),
        bus.clone(),
        config.matcher_stale_after_ms(),
        shutdown.clone(),
    ));
    tokio::spawn(bridge::run_candidate_push_consumer(
        registry.clone(),
        bus.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(bridge::run_notify_consumer(
        registry.clone(),
        bus.clone(),
        shutdown.clone(),
    ));

    // 5. 实时连接服务
    let live_listener = TcpListener::bind(("0.0.0.0", config.live_tcp_port)).await?;
    tokio::spawn(server::run_live_server(
        live_listener,
        registry.clone(),
        bus.clone(),
        config.live_channel_capacity,
        shutdown.clone(),
    ));

    // 6. HTTP API
    let app = axum::Router::new()
        .nest(
            "/api",
            ride_ledger::api::router(ledger)
                .merge(proximity_matcher::api::router(driver_store))
                .merge(api::router(bus)),
        )
        .merge(api::health_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let http_listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tracing::info!("HTTP API listening on 0.0.0.0:{}", config.http_port);
    tracing::info!("live connections on 0.0.0.0:{}", config.live_tcp_port);

    let serve_shutdown = shutdown.clone();
    axum::serve(http_listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    tracing::info!("dispatch node stopped");
    Ok(())
}
