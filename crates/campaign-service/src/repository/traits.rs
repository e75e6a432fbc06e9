//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现：生产环境使用 PostgreSQL 实现，
//! 测试与本地运行使用内存实现，单元测试可使用 mock。
//!
//! 需要原子性的操作（配额条件追加、券码占位、核销、状态 CAS）
//! 必须由实现方在单个原子步骤内完成，不允许“先读后写”。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    AppendOutcome, Campaign, CampaignStatus, NewCampaign, NewReward, NewRewardTransaction,
    NewVoucher, PointHistoryEntry, Quota, QuotaAdjustment, QuotaSnapshot, RedeemOutcome, Reward,
    RewardTransaction, Voucher, VoucherCode, VoucherInsert, VoucherStatus,
};

/// 活动仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignRepositoryTrait: Send + Sync {
    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<Campaign>;
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>>;
    async fn list_campaigns(&self) -> Result<Vec<Campaign>>;

    /// 状态 CAS：仅当当前状态为 `from` 时更新，返回是否更新成功
    async fn update_campaign_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// 人工设置状态并锁定
    async fn override_campaign_status(
        &self,
        id: i64,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Campaign>>;
}

/// 奖励仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardRepositoryTrait: Send + Sync {
    /// 创建奖励及其配额，二者在同一原子步骤内落库
    async fn create_reward(&self, reward: &NewReward) -> Result<(Reward, Quota)>;
    async fn get_reward(&self, id: i64) -> Result<Option<Reward>>;
    async fn list_rewards_by_campaign(&self, campaign_id: i64) -> Result<Vec<Reward>>;

    /// 整体替换标签（后写者胜），奖励不存在时返回 false
    async fn set_reward_tags(&self, reward_id: i64, tags: &[i64]) -> Result<bool>;

    async fn update_reward_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn override_reward_status(
        &self,
        id: i64,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reward>>;
}

/// 配额仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaRepositoryTrait: Send + Sync {
    /// 绑定配额，已绑定时返回 None
    async fn create_quota(
        &self,
        reward_id: i64,
        capacity: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Quota>>;

    async fn get_quota(&self, reward_id: i64) -> Result<Option<Quota>>;

    /// 追加容量，未绑定配额时返回 None
    async fn add_capacity(
        &self,
        reward_id: i64,
        amount: i64,
        operator: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<QuotaAdjustment>>;

    async fn list_adjustments(&self, reward_id: i64) -> Result<Vec<QuotaAdjustment>>;
}

/// 配额流水仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardTransactionRepositoryTrait: Send + Sync {
    /// 条件追加流水
    ///
    /// 在同一原子步骤内：按流水重算已消耗量，校验 `0 <= consumed + delta <= capacity`，
    /// 校验冲正唯一性，全部通过才写入。
    async fn append_checked(&self, trx: &NewRewardTransaction) -> Result<AppendOutcome>;

    /// 已消耗量（全部 delta 之和）
    async fn sum_deltas(&self, reward_id: i64) -> Result<i64>;

    async fn get_transaction(&self, id: i64) -> Result<Option<RewardTransaction>>;

    /// 按时间倒序返回最近的 limit 条流水
    async fn list_by_reward(&self, reward_id: i64, limit: i64) -> Result<Vec<RewardTransaction>>;

    /// 早于 before 且从未被冲正的发券预占
    async fn list_unreversed_issuances(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RewardTransaction>>;

    /// 全部已绑定配额的使用情况
    async fn list_quota_usage(&self) -> Result<Vec<QuotaSnapshot>>;
}

/// 券仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoucherRepositoryTrait: Send + Sync {
    async fn create_voucher(&self, voucher: &NewVoucher) -> Result<VoucherInsert>;
    async fn get_voucher(&self, id: i64) -> Result<Option<Voucher>>;
    async fn get_voucher_by_idempotency_key(&self, key: &str) -> Result<Option<Voucher>>;
    async fn list_vouchers_by_user(&self, user_id: &str) -> Result<Vec<Voucher>>;
    async fn list_vouchers_by_campaign(
        &self,
        campaign_id: i64,
        statuses: &[VoucherStatus],
    ) -> Result<Vec<Voucher>>;

    /// Pending -> Active 并回填券码
    async fn activate_voucher(&self, id: i64, code: &str, at: DateTime<Utc>) -> Result<bool>;

    /// from -> Expired 的 CAS
    async fn expire_voucher(&self, id: i64, from: VoucherStatus, at: DateTime<Utc>)
    -> Result<bool>;

    /// 删除仍处于 Pending 的券（发券补偿）
    async fn delete_pending_voucher(&self, id: i64) -> Result<bool>;

    /// 返回给定预占流水中已被券引用的那部分
    async fn find_referenced_reservations(&self, reservation_ids: &[i64]) -> Result<Vec<i64>>;
}

/// 券码仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoucherCodeRepositoryTrait: Send + Sync {
    /// 券码占位（test-and-set），券码已存在时返回 None
    async fn try_insert_code(
        &self,
        voucher_id: i64,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VoucherCode>>;

    async fn get_by_code(&self, code: &str) -> Result<Option<VoucherCode>>;

    /// 原子核销：检查券码标记与券状态，通过后同时置位
    async fn redeem_code(&self, code: &str, at: DateTime<Utc>) -> Result<RedeemOutcome>;

    async fn delete_code_by_voucher(&self, voucher_id: i64) -> Result<bool>;
}

/// 积分历史记录器（外部协作方）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PointHistoryRecorder: Send + Sync {
    async fn record(&self, entry: &PointHistoryEntry) -> Result<()>;
}
