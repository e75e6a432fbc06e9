//! 奖励管理服务
//!
//! 负责奖励创建、标签维护与配额绑定。奖励与配额在仓储层一次性创建，
//! 不会留下没有配额的奖励。奖励初始状态取所属活动当前的生效状态，
//! 之后默认跟随活动，除非被单独人工锁定。

use std::sync::Arc;

use tracing::{info, instrument};

use super::dto::CreateRewardRequest;
use super::quota_ledger::QuotaLedger;
use crate::clock::Clock;
use crate::error::{CampaignError, Result};
use crate::models::campaign::normalize_tags;
use crate::models::{Campaign, CampaignStatus, NewReward, Quota, QuotaSnapshot, Reward};
use crate::repository::{CampaignRepositoryTrait, RewardRepositoryTrait};

pub struct RewardService {
    campaign_repo: Arc<dyn CampaignRepositoryTrait>,
    reward_repo: Arc<dyn RewardRepositoryTrait>,
    ledger: Arc<QuotaLedger>,
    clock: Arc<dyn Clock>,
}

impl RewardService {
    pub fn new(
        campaign_repo: Arc<dyn CampaignRepositoryTrait>,
        reward_repo: Arc<dyn RewardRepositoryTrait>,
        ledger: Arc<QuotaLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaign_repo,
            reward_repo,
            ledger,
            clock,
        }
    }

    /// 创建奖励并绑定配额
    #[instrument(skip(self), fields(campaign_id = request.campaign_id))]
    pub async fn create_reward(&self, request: CreateRewardRequest) -> Result<Reward> {
        request.validate()?;

        let campaign = self.load_campaign(request.campaign_id).await?;
        let now = self.clock.now();

        let (reward, quota) = self
            .reward_repo
            .create_reward(&NewReward {
                campaign_id: campaign.id,
                name: request.name.trim().to_string(),
                status: campaign.effective_status(now),
                tags: normalize_tags(&request.tags),
                quota_capacity: request.quota_capacity,
                created_at: now,
            })
            .await?;

        info!(
            reward_id = reward.id,
            capacity = quota.capacity,
            status = reward.status.as_str(),
            "奖励创建成功"
        );
        Ok(reward)
    }

    /// 为已有奖励绑定配额
    pub async fn bind_quota(&self, reward_id: i64, capacity: i64) -> Result<Quota> {
        self.get_reward(reward_id).await?;
        self.ledger.bind(reward_id, capacity).await
    }

    pub async fn get_reward(&self, reward_id: i64) -> Result<Reward> {
        self.reward_repo
            .get_reward(reward_id)
            .await?
            .ok_or(CampaignError::RewardNotFound(reward_id))
    }

    pub async fn list_rewards(&self, campaign_id: i64) -> Result<Vec<Reward>> {
        self.reward_repo.list_rewards_by_campaign(campaign_id).await
    }

    pub async fn reward_quota(&self, reward_id: i64) -> Result<QuotaSnapshot> {
        self.get_reward(reward_id).await?;
        self.ledger.snapshot(reward_id).await
    }

    /// 整体替换标签
    #[instrument(skip(self))]
    pub async fn set_tags(&self, reward_id: i64, tags: Vec<i64>) -> Result<Reward> {
        if !self.reward_repo.set_reward_tags(reward_id, &tags).await? {
            return Err(CampaignError::RewardNotFound(reward_id));
        }
        self.get_reward(reward_id).await
    }

    /// 人工设置奖励状态（锁定后不再跟随活动）
    #[instrument(skip(self))]
    pub async fn override_status(&self, reward_id: i64, status: CampaignStatus) -> Result<Reward> {
        let reward = self
            .reward_repo
            .override_reward_status(reward_id, status, self.clock.now())
            .await?
            .ok_or(CampaignError::RewardNotFound(reward_id))?;

        info!(status = status.as_str(), "奖励状态已人工锁定");
        Ok(reward)
    }

    pub async fn increase_capacity(
        &self,
        reward_id: i64,
        amount: i64,
        operator: &str,
    ) -> Result<QuotaSnapshot> {
        self.get_reward(reward_id).await?;
        self.ledger
            .increase_capacity(reward_id, amount, operator)
            .await
    }

    /// 解析可发券的奖励
    ///
    /// 奖励的生效状态必须为 Active，否则返回 `RewardNotActive`
    pub async fn resolve_issuable(&self, reward_id: i64) -> Result<(Reward, Campaign)> {
        let reward = self.get_reward(reward_id).await?;
        let campaign = self.load_campaign(reward.campaign_id).await?;

        let status = reward.effective_status(campaign.effective_status(self.clock.now()));
        if status != CampaignStatus::Active {
            return Err(CampaignError::RewardNotActive { reward_id, status });
        }

        Ok((reward, campaign))
    }

    /// 活动在当前时间的生效状态
    pub async fn campaign_status(&self, campaign_id: i64) -> Result<CampaignStatus> {
        let campaign = self.load_campaign(campaign_id).await?;
        Ok(campaign.effective_status(self.clock.now()))
    }

    async fn load_campaign(&self, campaign_id: i64) -> Result<Campaign> {
        self.campaign_repo
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::CampaignNotFound(campaign_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::NewCampaign;
    use crate::repository::{
        MemoryStore, MockRewardRepositoryTrait, RewardTransactionRepositoryTrait,
    };
    use chrono::{Duration, Utc};

    struct Fixture {
        store: Arc<MemoryStore>,
        service: RewardService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let ledger = Arc::new(QuotaLedger::new(store.clone(), store.clone(), clock.clone()));
        let service = RewardService::new(store.clone(), store.clone(), ledger, clock);
        Fixture { store, service }
    }

    async fn campaign(store: &MemoryStore, start_days: i64, end_days: i64) -> Campaign {
        let now = Utc::now();
        store
            .create_campaign(&NewCampaign {
                name: "周年庆".to_string(),
                start_at: now + Duration::days(start_days),
                end_at: now + Duration::days(end_days),
                status: CampaignStatus::Draft,
                created_at: now,
            })
            .await
            .unwrap()
    }

    fn request(campaign_id: i64, capacity: i64, tags: Vec<i64>) -> CreateRewardRequest {
        CreateRewardRequest {
            campaign_id,
            name: "满100减10".to_string(),
            quota_capacity: capacity,
            tags,
        }
    }

    #[tokio::test]
    async fn test_create_reward_binds_quota_and_mirrors_campaign() {
        let f = fixture();
        let c = campaign(&f.store, -1, 1).await;

        let reward = f
            .service
            .create_reward(request(c.id, 50, vec![3, 1, 3]))
            .await
            .unwrap();
        assert_eq!(reward.status, CampaignStatus::Active);
        assert_eq!(reward.tags, vec![1, 3]);

        let quota = f.service.reward_quota(reward.id).await.unwrap();
        assert_eq!(quota.capacity, 50);
        assert_eq!(quota.consumed, 0);

        let err = f.service.bind_quota(reward.id, 10).await.unwrap_err();
        assert!(matches!(err, CampaignError::QuotaAlreadyBound(_)));
    }

    #[tokio::test]
    async fn test_create_reward_unknown_campaign() {
        let f = fixture();
        let err = f
            .service
            .create_reward(request(404, 1, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::CampaignNotFound(404)));
    }

    #[tokio::test]
    async fn test_set_tags_last_writer_wins() {
        let f = fixture();
        let c = campaign(&f.store, -1, 1).await;
        let reward = f
            .service
            .create_reward(request(c.id, 1, vec![1]))
            .await
            .unwrap();

        f.service.set_tags(reward.id, vec![5, 6]).await.unwrap();
        let updated = f.service.set_tags(reward.id, vec![7]).await.unwrap();
        assert_eq!(updated.tags, vec![7]);

        assert!(matches!(
            f.service.set_tags(999, vec![1]).await,
            Err(CampaignError::RewardNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_resolve_issuable_requires_active() {
        let f = fixture();
        let future = campaign(&f.store, 1, 3).await;
        let reward = f
            .service
            .create_reward(request(future.id, 1, vec![]))
            .await
            .unwrap();
        assert_eq!(reward.status, CampaignStatus::Draft);

        let err = f.service.resolve_issuable(reward.id).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::RewardNotActive {
                status: CampaignStatus::Draft,
                ..
            }
        ));

        // 人工锁定为 Active 后可发券
        f.service
            .override_status(reward.id, CampaignStatus::Active)
            .await
            .unwrap();
        assert!(f.service.resolve_issuable(reward.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_increase_capacity_requires_reward() {
        let f = fixture();
        let c = campaign(&f.store, -1, 1).await;
        let reward = f
            .service
            .create_reward(request(c.id, 1, vec![]))
            .await
            .unwrap();

        let snapshot = f
            .service
            .increase_capacity(reward.id, 4, "ops")
            .await
            .unwrap();
        assert_eq!(snapshot.capacity, 5);

        assert!(matches!(
            f.service.increase_capacity(999, 4, "ops").await,
            Err(CampaignError::RewardNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_create_reward_failure_leaves_no_quota() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let ledger = Arc::new(QuotaLedger::new(store.clone(), store.clone(), clock.clone()));

        let mut reward_repo = MockRewardRepositoryTrait::new();
        reward_repo
            .expect_create_reward()
            .times(1)
            .returning(|_| Err(CampaignError::Internal("连接中断".to_string())));
        let service = RewardService::new(store.clone(), Arc::new(reward_repo), ledger, clock);

        let c = campaign(&store, -1, 1).await;
        let err = service
            .create_reward(request(c.id, 10, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Internal(_)));

        // 创建失败时不单独绑定配额
        assert!(store.list_quota_usage().await.unwrap().is_empty());
        assert!(store.list_rewards_by_campaign(c.id).await.unwrap().is_empty());
    }
}
