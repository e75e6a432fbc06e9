//! 每日状态巡检 Worker
//!
//! 每天在配置的时刻（UTC）触发一次：先执行活动状态巡检，再执行流水对账。
//! 触发时间由 cron 表达式计算，进程停机错过的日子在下一次触发时自然追平，
//! 因为巡检只依据当前时间计算状态。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use campaign_shared::config::SchedulerConfig;
use campaign_shared::observability::metrics;
use campaign_shared::retry::{RetryPolicy, retry_with_policy};

use crate::clock::Clock;
use crate::error::{CampaignError, Result};
use crate::service::dto::{ReconcileReport, SweepReport};
use crate::service::{CampaignServices, LifecycleController, RewardTransactionLog};

const WORKER_NAME: &str = "daily_scheduler";

/// 单次触发的执行结果，失败的步骤为 None
#[derive(Debug, Default)]
pub struct TickSummary {
    pub sweep: Option<SweepReport>,
    pub reconcile: Option<ReconcileReport>,
}

pub struct DailyScheduler {
    lifecycle: Arc<LifecycleController>,
    transaction_log: Arc<RewardTransactionLog>,
    clock: Arc<dyn Clock>,
    schedule: Schedule,
    run_on_startup: bool,
    retry_policy: RetryPolicy,
    /// 最近一次已执行的触发时间
    last_run: RwLock<Option<DateTime<Utc>>>,
}

impl DailyScheduler {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        transaction_log: Arc<RewardTransactionLog>,
        clock: Arc<dyn Clock>,
        status_update_time: &str,
        run_on_startup: bool,
    ) -> Result<Self> {
        let (hour, minute) = parse_time_of_day(status_update_time)?;
        let expression = format!("0 {} {} * * *", minute, hour);
        let schedule = Schedule::from_str(&expression)
            .map_err(|e| CampaignError::Validation(format!("无效的调度表达式 {expression}: {e}")))?;

        Ok(Self {
            lifecycle,
            transaction_log,
            clock,
            schedule,
            run_on_startup,
            retry_policy: RetryPolicy::default(),
            last_run: RwLock::new(None),
        })
    }

    pub fn from_config(
        services: &CampaignServices,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        Self::new(
            services.lifecycle.clone(),
            services.transaction_log.clone(),
            clock,
            &config.status_update_time,
            config.run_on_startup,
        )
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// `after` 之后的下一次触发时间
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read()
    }

    /// 执行一次巡检 + 对账
    ///
    /// 不晚于上次触发时间的 now 直接跳过
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        {
            let mut last_run = self.last_run.write();
            if let Some(last) = *last_run
                && now <= last
            {
                debug!(now = %now, last = %last, "该时刻已执行过，跳过");
                return TickSummary::default();
            }
            *last_run = Some(now);
        }

        let sweep = match retry_with_policy(
            &self.retry_policy,
            "lifecycle_sweep",
            CampaignError::is_retryable,
            || self.lifecycle.sweep(now),
        )
        .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "状态巡检失败");
                None
            }
        };

        let reconcile = self.reconcile(now).await;
        metrics::set_worker_last_run(WORKER_NAME);

        TickSummary { sweep, reconcile }
    }

    async fn reconcile(&self, now: DateTime<Utc>) -> Option<ReconcileReport> {
        match self.transaction_log.refresh(now).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "流水对账失败");
                None
            }
        }
    }

    /// 主循环：直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(run_on_startup = self.run_on_startup, "DailyScheduler 已启动");

        if self.run_on_startup {
            self.reconcile(self.clock.now()).await;
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = self.clock.now();
            let Some(next) = self.next_fire(now) else {
                error!("无法计算下一次触发时间，调度退出");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "等待下一次触发");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let fired_at = self.clock.now().max(next);
                    let summary = self.tick(fired_at).await;
                    if summary.sweep.is_none() {
                        warn!(fired_at = %fired_at, "本次巡检未完成，将在下次触发时追平");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("DailyScheduler 已退出");
    }
}

/// 解析 "HH:MM"
fn parse_time_of_day(value: &str) -> Result<(u32, u32)> {
    let invalid = || CampaignError::Validation(format!("无效的每日触发时间: {value}"));

    let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }

    Ok((hour, minute))
}
