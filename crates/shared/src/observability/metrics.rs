//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册业务指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("voucher_issues_total", "Total number of voucher issuances");
    metrics::describe_histogram!(
        "voucher_issue_duration_seconds",
        "Voucher issuance duration in seconds"
    );

    metrics::describe_counter!(
        "voucher_redemptions_total",
        "Total number of voucher redemptions"
    );
    metrics::describe_histogram!(
        "voucher_redemption_duration_seconds",
        "Voucher redemption duration in seconds"
    );

    metrics::describe_counter!(
        "quota_reservations_total",
        "Total number of quota reservation attempts"
    );

    metrics::describe_counter!(
        "lifecycle_transitions_total",
        "Total number of status transitions applied by the sweep"
    );
    metrics::describe_counter!(
        "lifecycle_sweep_failures_total",
        "Total number of entities skipped by the sweep after an update error"
    );

    metrics::describe_counter!(
        "reward_trx_reconciled_total",
        "Total number of orphan reservations compensated by reconciliation"
    );

    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last completed worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录发券结果
#[inline]
pub fn record_voucher_issue(status: &str, duration_secs: f64) {
    metrics::counter!(
        "voucher_issues_total",
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "voucher_issue_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// 记录核销结果
#[inline]
pub fn record_voucher_redemption(status: &str, duration_secs: f64) {
    metrics::counter!(
        "voucher_redemptions_total",
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "voucher_redemption_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// 记录配额预占结果
#[inline]
pub fn record_quota_reservation(status: &str) {
    metrics::counter!(
        "quota_reservations_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录状态流转
#[inline]
pub fn record_lifecycle_transitions(entity: &str, count: u64) {
    metrics::counter!(
        "lifecycle_transitions_total",
        "entity" => entity.to_string()
    )
    .increment(count);
}

/// 记录巡检中被跳过的实体
#[inline]
pub fn record_sweep_failures(count: u64) {
    metrics::counter!("lifecycle_sweep_failures_total").increment(count);
}

/// 记录对账补偿数量
#[inline]
pub fn record_reconciled(count: u64) {
    metrics::counter!("reward_trx_reconciled_total").increment(count);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
