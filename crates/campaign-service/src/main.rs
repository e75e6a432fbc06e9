//! 营销活动核心服务进程
//!
//! 启动后常驻运行每日调度，指标通过 Prometheus 端点暴露。

use std::sync::Arc;

use campaign_service::{
    CampaignServices, DailyScheduler, Repositories, ServiceSettings, SystemClock,
};
use campaign_shared::{config::AppConfig, database::Database, observability};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("campaign-service").unwrap_or_default();

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        status_update_time = %config.scheduler.status_update_time,
        "Starting campaign-service"
    );

    let settings = ServiceSettings::from_config(&config)?;

    let db = Database::connect(&config.database).await?;
    db.health_check().await?;

    let repos = Repositories::postgres(db.pool().clone());
    let clock = Arc::new(SystemClock);
    let services = CampaignServices::with_random_codes(&repos, clock.clone(), &settings);

    let scheduler = Arc::new(DailyScheduler::from_config(
        &services,
        clock,
        &config.scheduler,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };
    info!("DailyScheduler spawned");

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        error!(error = %e, "DailyScheduler 异常退出");
    }

    db.close().await;
    info!("Shutdown complete");

    Ok(())
}

/// 监听关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
