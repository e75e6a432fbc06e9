//! 内存存储
//!
//! 使用 DashMap 实现的全量仓储，适用于测试和本地开发环境。
//!
//! 原子性依靠 DashMap 的分片写锁实现：
//! - 配额流水按 reward_id 分组，条件追加在该分组的 entry 锁内完成
//! - 核销先锁券码再锁券，与其他只锁券的操作不会形成环路等待
//!
//! 任何时候都不在持有某个 map 引用的同时再访问同一个 map。

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::traits::{
    CampaignRepositoryTrait, PointHistoryRecorder, QuotaRepositoryTrait,
    RewardRepositoryTrait, RewardTransactionRepositoryTrait, VoucherCodeRepositoryTrait,
    VoucherRepositoryTrait,
};
use crate::error::Result;
use crate::models::campaign::normalize_tags;
use crate::models::{
    AppendOutcome, Campaign, CampaignStatus, NewCampaign, NewReward, NewRewardTransaction,
    NewVoucher, PointHistoryEntry, Quota, QuotaAdjustment, QuotaSnapshot, RedeemOutcome, Reward,
    RewardTransaction, TransactionReason, Voucher, VoucherCode, VoucherInsert, VoucherStatus,
};

/// 内存仓储
#[derive(Debug)]
pub struct MemoryStore {
    next_id: AtomicI64,
    campaigns: DashMap<i64, Campaign>,
    rewards: DashMap<i64, Reward>,
    /// reward_id -> 配额
    quotas: DashMap<i64, Quota>,
    adjustments: DashMap<i64, Vec<QuotaAdjustment>>,
    /// reward_id -> 流水（按写入顺序）
    transactions: DashMap<i64, Vec<RewardTransaction>>,
    /// 流水 ID -> reward_id
    transaction_index: DashMap<i64, i64>,
    vouchers: DashMap<i64, Voucher>,
    idempotency_keys: DashMap<String, i64>,
    /// code -> 券码
    codes: DashMap<String, VoucherCode>,
    point_histories: Mutex<Vec<PointHistoryEntry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            campaigns: DashMap::new(),
            rewards: DashMap::new(),
            quotas: DashMap::new(),
            adjustments: DashMap::new(),
            transactions: DashMap::new(),
            transaction_index: DashMap::new(),
            vouchers: DashMap::new(),
            idempotency_keys: DashMap::new(),
            codes: DashMap::new(),
            point_histories: Mutex::new(Vec::new()),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// 已记录的积分历史
    pub fn point_histories(&self) -> Vec<PointHistoryEntry> {
        self.point_histories.lock().clone()
    }

    /// 全部券码（测试断言用）
    pub fn all_codes(&self) -> Vec<VoucherCode> {
        self.codes.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 全部券（测试断言用）
    pub fn all_vouchers(&self) -> Vec<Voucher> {
        let mut vouchers: Vec<Voucher> =
            self.vouchers.iter().map(|entry| entry.value().clone()).collect();
        vouchers.sort_by_key(|v| v.id);
        vouchers
    }

    /// 直接写入一条流水，跳过容量检查
    ///
    /// 用于模拟预占之后、券落库之前进程崩溃留下的孤儿预占
    pub fn insert_raw_transaction(&self, trx: &NewRewardTransaction) -> RewardTransaction {
        let appended = RewardTransaction {
            id: self.next_id(),
            reward_id: trx.reward_id,
            delta: trx.delta,
            reason: trx.reason,
            reverses_id: trx.reverses_id,
            remark: trx.remark.clone(),
            created_at: trx.created_at,
        };
        self.transactions
            .entry(trx.reward_id)
            .or_default()
            .push(appended.clone());
        self.transaction_index.insert(appended.id, appended.reward_id);
        appended
    }
}

#[async_trait]
impl CampaignRepositoryTrait for MemoryStore {
    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<Campaign> {
        let created = Campaign {
            id: self.next_id(),
            name: campaign.name.clone(),
            start_at: campaign.start_at,
            end_at: campaign.end_at,
            status: campaign.status,
            status_locked: false,
            created_at: campaign.created_at,
            updated_at: campaign.created_at,
        };
        self.campaigns.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|c| c.clone()))
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|entry| entry.value().clone()).collect();
        campaigns.sort_by_key(|c| c.id);
        Ok(campaigns)
    }

    async fn update_campaign_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.campaigns.get_mut(&id) {
            Some(mut campaign) if campaign.status == from && !campaign.status_locked => {
                campaign.status = to;
                campaign.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn override_campaign_status(
        &self,
        id: i64,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        Ok(self.campaigns.get_mut(&id).map(|mut campaign| {
            campaign.status = status;
            campaign.status_locked = true;
            campaign.updated_at = at;
            campaign.clone()
        }))
    }
}

#[async_trait]
impl RewardRepositoryTrait for MemoryStore {
    async fn create_reward(&self, reward: &NewReward) -> Result<(Reward, Quota)> {
        let created = Reward {
            id: self.next_id(),
            campaign_id: reward.campaign_id,
            name: reward.name.clone(),
            status: reward.status,
            status_locked: false,
            tags: normalize_tags(&reward.tags),
            created_at: reward.created_at,
            updated_at: reward.created_at,
        };
        let quota = Quota {
            id: self.next_id(),
            reward_id: created.id,
            capacity: reward.quota_capacity,
            extra_capacity: 0,
            created_at: reward.created_at,
        };
        // 先写配额再写奖励，奖励可见时配额必然已存在
        self.quotas.insert(created.id, quota.clone());
        self.rewards.insert(created.id, created.clone());
        Ok((created, quota))
    }

    async fn get_reward(&self, id: i64) -> Result<Option<Reward>> {
        Ok(self.rewards.get(&id).map(|r| r.clone()))
    }

    async fn list_rewards_by_campaign(&self, campaign_id: i64) -> Result<Vec<Reward>> {
        let mut rewards: Vec<Reward> = self
            .rewards
            .iter()
            .filter(|entry| entry.campaign_id == campaign_id)
            .map(|entry| entry.value().clone())
            .collect();
        rewards.sort_by_key(|r| r.id);
        Ok(rewards)
    }

    async fn set_reward_tags(&self, reward_id: i64, tags: &[i64]) -> Result<bool> {
        match self.rewards.get_mut(&reward_id) {
            Some(mut reward) => {
                reward.tags = normalize_tags(tags);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_reward_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.rewards.get_mut(&id) {
            Some(mut reward) if reward.status == from && !reward.status_locked => {
                reward.status = to;
                reward.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn override_reward_status(
        &self,
        id: i64,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reward>> {
        Ok(self.rewards.get_mut(&id).map(|mut reward| {
            reward.status = status;
            reward.status_locked = true;
            reward.updated_at = at;
            reward.clone()
        }))
    }
}

#[async_trait]
impl QuotaRepositoryTrait for MemoryStore {
    async fn create_quota(
        &self,
        reward_id: i64,
        capacity: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Quota>> {
        match self.quotas.entry(reward_id) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(vacant) => {
                let quota = Quota {
                    id: self.next_id(),
                    reward_id,
                    capacity,
                    extra_capacity: 0,
                    created_at: at,
                };
                vacant.insert(quota.clone());
                Ok(Some(quota))
            }
        }
    }

    async fn get_quota(&self, reward_id: i64) -> Result<Option<Quota>> {
        Ok(self.quotas.get(&reward_id).map(|q| q.clone()))
    }

    async fn add_capacity(
        &self,
        reward_id: i64,
        amount: i64,
        operator: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<QuotaAdjustment>> {
        // 与条件追加共用同一把分组锁，顺序为 流水 -> 配额
        let _guard = self.transactions.entry(reward_id).or_default();

        let Some(mut quota) = self.quotas.get_mut(&reward_id) else {
            return Ok(None);
        };
        quota.extra_capacity += amount;
        drop(quota);

        let adjustment = QuotaAdjustment {
            id: self.next_id(),
            reward_id,
            amount,
            operator: operator.to_string(),
            created_at: at,
        };
        self.adjustments
            .entry(reward_id)
            .or_default()
            .push(adjustment.clone());
        Ok(Some(adjustment))
    }

    async fn list_adjustments(&self, reward_id: i64) -> Result<Vec<QuotaAdjustment>> {
        Ok(self
            .adjustments
            .get(&reward_id)
            .map(|list| list.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RewardTransactionRepositoryTrait for MemoryStore {
    async fn append_checked(&self, trx: &NewRewardTransaction) -> Result<AppendOutcome> {
        let mut group = self.transactions.entry(trx.reward_id).or_default();

        let Some(capacity) = self.quotas.get(&trx.reward_id).map(|q| q.total_capacity()) else {
            return Ok(AppendOutcome::QuotaNotBound);
        };

        if let Some(original_id) = trx.reverses_id {
            if let Some(existing) = group.iter().find(|t| t.reverses_id == Some(original_id)) {
                return Ok(AppendOutcome::AlreadyReversed {
                    reversal_id: existing.id,
                });
            }
        }

        let consumed: i64 = group.iter().map(|t| t.delta).sum();
        let after = consumed + trx.delta;
        if trx.delta > 0 && after > capacity {
            return Ok(AppendOutcome::CapacityExceeded { capacity, consumed });
        }
        if after < 0 {
            return Ok(AppendOutcome::Underflow { consumed });
        }

        let appended = RewardTransaction {
            id: self.next_id(),
            reward_id: trx.reward_id,
            delta: trx.delta,
            reason: trx.reason,
            reverses_id: trx.reverses_id,
            remark: trx.remark.clone(),
            created_at: trx.created_at,
        };
        group.push(appended.clone());
        self.transaction_index.insert(appended.id, appended.reward_id);

        Ok(AppendOutcome::Appended(appended))
    }

    async fn sum_deltas(&self, reward_id: i64) -> Result<i64> {
        Ok(self
            .transactions
            .get(&reward_id)
            .map(|group| group.iter().map(|t| t.delta).sum())
            .unwrap_or(0))
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<RewardTransaction>> {
        let Some(reward_id) = self.transaction_index.get(&id).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self
            .transactions
            .get(&reward_id)
            .and_then(|group| group.iter().find(|t| t.id == id).cloned()))
    }

    async fn list_by_reward(&self, reward_id: i64, limit: i64) -> Result<Vec<RewardTransaction>> {
        let mut list = self
            .transactions
            .get(&reward_id)
            .map(|group| group.clone())
            .unwrap_or_default();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn list_unreversed_issuances(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RewardTransaction>> {
        let mut found = Vec::new();
        for group in self.transactions.iter() {
            let reversed: HashSet<i64> = group.iter().filter_map(|t| t.reverses_id).collect();
            found.extend(
                group
                    .iter()
                    .filter(|t| {
                        t.reason == TransactionReason::Issuance
                            && t.created_at < before
                            && !reversed.contains(&t.id)
                    })
                    .cloned(),
            );
        }
        found.sort_by_key(|t| t.id);
        Ok(found)
    }

    async fn list_quota_usage(&self) -> Result<Vec<QuotaSnapshot>> {
        let capacities: Vec<(i64, i64)> = self
            .quotas
            .iter()
            .map(|q| (q.reward_id, q.total_capacity()))
            .collect();

        let mut usage = Vec::with_capacity(capacities.len());
        for (reward_id, capacity) in capacities {
            let consumed = self.sum_deltas(reward_id).await?;
            usage.push(QuotaSnapshot::new(reward_id, capacity, consumed));
        }
        usage.sort_by_key(|s| s.reward_id);
        Ok(usage)
    }
}

#[async_trait]
impl VoucherRepositoryTrait for MemoryStore {
    async fn create_voucher(&self, voucher: &NewVoucher) -> Result<VoucherInsert> {
        let build = |id: i64| Voucher {
            id,
            reward_id: voucher.reward_id,
            campaign_id: voucher.campaign_id,
            user_id: voucher.user_id.clone(),
            status: VoucherStatus::Pending,
            reservation_id: voucher.reservation_id,
            code: None,
            idempotency_key: voucher.idempotency_key.clone(),
            redeemed_at: None,
            expired_at: None,
            created_at: voucher.created_at,
            updated_at: voucher.created_at,
        };

        let Some(key) = voucher.idempotency_key.clone() else {
            let created = build(self.next_id());
            self.vouchers.insert(created.id, created.clone());
            return Ok(VoucherInsert::Created(created));
        };

        match self.idempotency_keys.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = self.vouchers.get(occupied.get()).map(|v| v.clone()) {
                    return Ok(VoucherInsert::DuplicateKey(existing));
                }
                // 对应的券已被补偿删除，幂等键可以复用
                let created = build(self.next_id());
                self.vouchers.insert(created.id, created.clone());
                occupied.insert(created.id);
                Ok(VoucherInsert::Created(created))
            }
            Entry::Vacant(vacant) => {
                let created = build(self.next_id());
                self.vouchers.insert(created.id, created.clone());
                vacant.insert(created.id);
                Ok(VoucherInsert::Created(created))
            }
        }
    }

    async fn get_voucher(&self, id: i64) -> Result<Option<Voucher>> {
        Ok(self.vouchers.get(&id).map(|v| v.clone()))
    }

    async fn get_voucher_by_idempotency_key(&self, key: &str) -> Result<Option<Voucher>> {
        let Some(id) = self.idempotency_keys.get(key).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.vouchers.get(&id).map(|v| v.clone()))
    }

    async fn list_vouchers_by_user(&self, user_id: &str) -> Result<Vec<Voucher>> {
        let mut vouchers: Vec<Voucher> = self
            .vouchers
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        vouchers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(vouchers)
    }

    async fn list_vouchers_by_campaign(
        &self,
        campaign_id: i64,
        statuses: &[VoucherStatus],
    ) -> Result<Vec<Voucher>> {
        let mut vouchers: Vec<Voucher> = self
            .vouchers
            .iter()
            .filter(|entry| entry.campaign_id == campaign_id && statuses.contains(&entry.status))
            .map(|entry| entry.value().clone())
            .collect();
        vouchers.sort_by_key(|v| v.id);
        Ok(vouchers)
    }

    async fn activate_voucher(&self, id: i64, code: &str, at: DateTime<Utc>) -> Result<bool> {
        match self.vouchers.get_mut(&id) {
            Some(mut voucher) if voucher.status == VoucherStatus::Pending => {
                voucher.status = VoucherStatus::Active;
                voucher.code = Some(code.to_string());
                voucher.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_voucher(
        &self,
        id: i64,
        from: VoucherStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.vouchers.get_mut(&id) {
            Some(mut voucher) if voucher.status == from => {
                voucher.status = VoucherStatus::Expired;
                voucher.expired_at = Some(at);
                voucher.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_pending_voucher(&self, id: i64) -> Result<bool> {
        let removed = self
            .vouchers
            .remove_if(&id, |_, v| v.status == VoucherStatus::Pending);
        let Some((_, voucher)) = removed else {
            return Ok(false);
        };

        if let Some(key) = voucher.idempotency_key {
            self.idempotency_keys.remove_if(&key, |_, owner| *owner == id);
        }
        self.codes.retain(|_, code| code.voucher_id != id);
        Ok(true)
    }

    async fn find_referenced_reservations(&self, reservation_ids: &[i64]) -> Result<Vec<i64>> {
        let wanted: HashSet<i64> = reservation_ids.iter().copied().collect();
        let mut found: Vec<i64> = self
            .vouchers
            .iter()
            .map(|entry| entry.reservation_id)
            .filter(|id| wanted.contains(id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        found.sort_unstable();
        Ok(found)
    }
}

#[async_trait]
impl VoucherCodeRepositoryTrait for MemoryStore {
    async fn try_insert_code(
        &self,
        voucher_id: i64,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VoucherCode>> {
        match self.codes.entry(code.to_string()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(vacant) => {
                let inserted = VoucherCode {
                    id: self.next_id(),
                    voucher_id,
                    code: code.to_string(),
                    redeemed: false,
                    redeemed_at: None,
                    created_at: at,
                };
                vacant.insert(inserted.clone());
                Ok(Some(inserted))
            }
        }
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<VoucherCode>> {
        Ok(self.codes.get(code).map(|c| c.clone()))
    }

    async fn redeem_code(&self, code: &str, at: DateTime<Utc>) -> Result<RedeemOutcome> {
        let Some(mut voucher_code) = self.codes.get_mut(code) else {
            return Ok(RedeemOutcome::NotFound);
        };
        if voucher_code.redeemed {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }

        let Some(mut voucher) = self.vouchers.get_mut(&voucher_code.voucher_id) else {
            return Ok(RedeemOutcome::NotFound);
        };
        match voucher.status {
            VoucherStatus::Active => {}
            VoucherStatus::Expired => return Ok(RedeemOutcome::VoucherExpired),
            VoucherStatus::Redeemed => return Ok(RedeemOutcome::AlreadyRedeemed),
            other => return Ok(RedeemOutcome::NotRedeemable(other)),
        }

        voucher_code.redeemed = true;
        voucher_code.redeemed_at = Some(at);
        voucher.status = VoucherStatus::Redeemed;
        voucher.redeemed_at = Some(at);
        voucher.updated_at = at;

        Ok(RedeemOutcome::Redeemed(voucher.clone()))
    }

    async fn delete_code_by_voucher(&self, voucher_id: i64) -> Result<bool> {
        let before = self.codes.len();
        self.codes.retain(|_, code| code.voucher_id != voucher_id);
        Ok(self.codes.len() < before)
    }
}

#[async_trait]
impl PointHistoryRecorder for MemoryStore {
    async fn record(&self, entry: &PointHistoryEntry) -> Result<()> {
        self.point_histories.lock().push(entry.clone());
        Ok(())
    }
}
