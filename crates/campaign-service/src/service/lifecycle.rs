//! 活动生命周期控制
//!
//! 活动状态机 Draft -> Active -> Expired 由 (now, start, end) 纯函数决定，
//! 只进不退。巡检（sweep）把生效状态持久化，并级联到奖励和券：
//!
//! - 奖励未单独锁定时跟随活动生效状态
//! - 活动生效状态为 Expired 时，其下 Pending/Active 券全部置为 Expired
//!
//! 所有写入都是 CAS，同一个 now 重复执行不会产生新的变化；
//! 单个实体失败只记录并跳过，不中断整批巡检。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use campaign_shared::observability::metrics;

use super::dto::{CreateCampaignRequest, EntityKind, StatusChange, SweepFailure, SweepReport};
use super::reward_service::RewardService;
use crate::clock::Clock;
use crate::error::{CampaignError, Result};
use crate::models::{Campaign, CampaignDetail, CampaignStatus, NewCampaign, VoucherStatus};
use crate::repository::{CampaignRepositoryTrait, RewardRepositoryTrait, VoucherRepositoryTrait};

pub struct LifecycleController {
    campaign_repo: Arc<dyn CampaignRepositoryTrait>,
    reward_repo: Arc<dyn RewardRepositoryTrait>,
    voucher_repo: Arc<dyn VoucherRepositoryTrait>,
    reward_service: Arc<RewardService>,
    clock: Arc<dyn Clock>,
}

impl LifecycleController {
    pub fn new(
        campaign_repo: Arc<dyn CampaignRepositoryTrait>,
        reward_repo: Arc<dyn RewardRepositoryTrait>,
        voucher_repo: Arc<dyn VoucherRepositoryTrait>,
        reward_service: Arc<RewardService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaign_repo,
            reward_repo,
            voucher_repo,
            reward_service,
            clock,
        }
    }

    /// 创建活动，初始状态为创建时刻的计算状态
    #[instrument(skip(self), fields(name = %request.name))]
    pub async fn create_campaign(&self, request: CreateCampaignRequest) -> Result<Campaign> {
        request.validate()?;

        let now = self.clock.now();
        let campaign = self
            .campaign_repo
            .create_campaign(&NewCampaign {
                name: request.name.trim().to_string(),
                start_at: request.start_at,
                end_at: request.end_at,
                status: CampaignStatus::at(now, request.start_at, request.end_at),
                created_at: now,
            })
            .await?;

        info!(
            campaign_id = campaign.id,
            status = campaign.status.as_str(),
            "活动创建成功"
        );
        Ok(campaign)
    }

    /// 活动详情（含奖励）
    pub async fn get_campaign(&self, campaign_id: i64) -> Result<CampaignDetail> {
        let campaign = self
            .campaign_repo
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::CampaignNotFound(campaign_id))?;
        let rewards = self.reward_service.list_rewards(campaign_id).await?;

        Ok(CampaignDetail { campaign, rewards })
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        self.campaign_repo.list_campaigns().await
    }

    /// 人工设置活动状态
    ///
    /// 锁定后巡检不再按时间重算该活动，级联仍按锁定的状态执行
    #[instrument(skip(self))]
    pub async fn override_status(
        &self,
        campaign_id: i64,
        status: CampaignStatus,
    ) -> Result<Campaign> {
        let campaign = self
            .campaign_repo
            .override_campaign_status(campaign_id, status, self.clock.now())
            .await?
            .ok_or(CampaignError::CampaignNotFound(campaign_id))?;

        info!(status = status.as_str(), "活动状态已人工锁定");
        Ok(campaign)
    }

    /// 状态巡检
    ///
    /// 只有读取活动列表失败才返回错误
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let campaigns = self.campaign_repo.list_campaigns().await?;
        let mut report = SweepReport::default();

        for campaign in &campaigns {
            self.sweep_campaign(campaign, now, &mut report).await;
        }

        for entity in [EntityKind::Campaign, EntityKind::Reward, EntityKind::Voucher] {
            let count = report.count(entity);
            if count > 0 {
                metrics::record_lifecycle_transitions(entity.as_str(), count as u64);
            }
        }
        if !report.failures.is_empty() {
            metrics::record_sweep_failures(report.failures.len() as u64);
        }

        info!(
            campaigns = campaigns.len(),
            changes = report.changes.len(),
            failures = report.failures.len(),
            "状态巡检完成"
        );
        Ok(report)
    }

    async fn sweep_campaign(&self, campaign: &Campaign, now: DateTime<Utc>, report: &mut SweepReport) {
        let mut effective = campaign.effective_status(now);

        if effective != campaign.status {
            match self
                .campaign_repo
                .update_campaign_status(campaign.id, campaign.status, effective, now)
                .await
            {
                Ok(true) => report.changes.push(StatusChange {
                    entity: EntityKind::Campaign,
                    entity_id: campaign.id,
                    old_status: campaign.status.as_str(),
                    new_status: effective.as_str(),
                }),
                Ok(false) => {
                    // 列表中的记录已过时（如刚被人工锁定），级联以最新记录为准
                    match self.campaign_repo.get_campaign(campaign.id).await {
                        Ok(Some(fresh)) => {
                            effective = fresh.effective_status(now);
                            warn!(
                                campaign_id = campaign.id,
                                status = fresh.status.as_str(),
                                locked = fresh.status_locked,
                                "活动状态已被并发修改，按最新记录级联"
                            );
                        }
                        Ok(None) => {
                            warn!(campaign_id = campaign.id, "活动已不存在，跳过");
                            return;
                        }
                        Err(e) => {
                            record_failure(report, EntityKind::Campaign, campaign.id, &e);
                            return;
                        }
                    }
                }
                Err(e) => record_failure(report, EntityKind::Campaign, campaign.id, &e),
            }
        }

        self.sweep_rewards(campaign.id, effective, now, report).await;

        if effective == CampaignStatus::Expired {
            self.expire_vouchers(campaign.id, now, report).await;
        }
    }

    async fn sweep_rewards(
        &self,
        campaign_id: i64,
        campaign_status: CampaignStatus,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let rewards = match self.reward_repo.list_rewards_by_campaign(campaign_id).await {
            Ok(rewards) => rewards,
            Err(e) => {
                record_failure(report, EntityKind::Campaign, campaign_id, &e);
                return;
            }
        };

        for reward in rewards {
            let target = reward.effective_status(campaign_status);
            if target == reward.status {
                continue;
            }

            match self
                .reward_repo
                .update_reward_status(reward.id, reward.status, target, now)
                .await
            {
                Ok(true) => report.changes.push(StatusChange {
                    entity: EntityKind::Reward,
                    entity_id: reward.id,
                    old_status: reward.status.as_str(),
                    new_status: target.as_str(),
                }),
                Ok(false) => debug!(reward_id = reward.id, "奖励状态已变更，跳过"),
                Err(e) => record_failure(report, EntityKind::Reward, reward.id, &e),
            }
        }
    }

    async fn expire_vouchers(&self, campaign_id: i64, now: DateTime<Utc>, report: &mut SweepReport) {
        let vouchers = match self
            .voucher_repo
            .list_vouchers_by_campaign(campaign_id, &VoucherStatus::EXPIRABLE)
            .await
        {
            Ok(vouchers) => vouchers,
            Err(e) => {
                record_failure(report, EntityKind::Campaign, campaign_id, &e);
                return;
            }
        };

        for voucher in vouchers {
            match self
                .voucher_repo
                .expire_voucher(voucher.id, voucher.status, now)
                .await
            {
                Ok(true) => report.changes.push(StatusChange {
                    entity: EntityKind::Voucher,
                    entity_id: voucher.id,
                    old_status: voucher.status.as_str(),
                    new_status: VoucherStatus::Expired.as_str(),
                }),
                // 并发核销或激活，终态以先提交者为准
                Ok(false) => debug!(voucher_id = voucher.id, "券状态已变更，跳过"),
                Err(e) => record_failure(report, EntityKind::Voucher, voucher.id, &e),
            }
        }
    }
}

fn record_failure(report: &mut SweepReport, entity: EntityKind, entity_id: i64, e: &CampaignError) {
    error!(
        entity = entity.as_str(),
        entity_id,
        error = %e,
        "巡检处理实体失败，跳过"
    );
    report.failures.push(SweepFailure {
        entity,
        entity_id,
        error: e.to_string(),
    });
}
