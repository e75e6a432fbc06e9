//! 配额账本
//!
//! 奖励配额的唯一入口。已消耗量始终由流水重新聚合，
//! 预占/退还/人工调整都通过存储层的条件追加原子完成。

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use campaign_shared::observability::metrics;

use crate::clock::Clock;
use crate::error::{CampaignError, Result};
use crate::models::{
    AppendOutcome, NewRewardTransaction, Quota, QuotaSnapshot, ReservationToken,
    RewardTransaction,
};
use crate::repository::{QuotaRepositoryTrait, RewardTransactionRepositoryTrait};

/// 发券失败补偿时写入的流水备注
pub const REMARK_COMPENSATION: &str = "发券失败补偿";

pub struct QuotaLedger {
    quota_repo: Arc<dyn QuotaRepositoryTrait>,
    trx_repo: Arc<dyn RewardTransactionRepositoryTrait>,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    pub fn new(
        quota_repo: Arc<dyn QuotaRepositoryTrait>,
        trx_repo: Arc<dyn RewardTransactionRepositoryTrait>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quota_repo,
            trx_repo,
            clock,
        }
    }

    /// 为奖励绑定配额
    #[instrument(skip(self))]
    pub async fn bind(&self, reward_id: i64, capacity: i64) -> Result<Quota> {
        if capacity < 0 {
            return Err(CampaignError::Validation(format!(
                "配额容量不能为负数: {}",
                capacity
            )));
        }

        let quota = self
            .quota_repo
            .create_quota(reward_id, capacity, self.clock.now())
            .await?
            .ok_or(CampaignError::QuotaAlreadyBound(reward_id))?;

        info!(reward_id, capacity, "配额绑定成功");
        Ok(quota)
    }

    /// 预占配额
    ///
    /// 超出容量时返回 `QuotaExceeded` 且不产生任何写入
    #[instrument(skip(self))]
    pub async fn reserve(&self, reward_id: i64, amount: i64) -> Result<ReservationToken> {
        if amount <= 0 {
            return Err(CampaignError::Validation(format!(
                "预占数量必须为正数: {}",
                amount
            )));
        }

        let trx = NewRewardTransaction::issuance(reward_id, amount, self.clock.now());
        match self.trx_repo.append_checked(&trx).await? {
            AppendOutcome::Appended(appended) => {
                metrics::record_quota_reservation("success");
                debug!(reward_id, transaction_id = appended.id, amount, "配额预占成功");
                Ok(ReservationToken::from(&appended))
            }
            AppendOutcome::CapacityExceeded { capacity, consumed } => {
                metrics::record_quota_reservation("exceeded");
                info!(reward_id, capacity, consumed, amount, "配额不足");
                Err(CampaignError::QuotaExceeded {
                    reward_id,
                    capacity,
                    consumed,
                })
            }
            AppendOutcome::QuotaNotBound => {
                metrics::record_quota_reservation("not_bound");
                Err(CampaignError::QuotaNotBound(reward_id))
            }
            other => Err(CampaignError::Internal(format!(
                "预占流水出现意外结果: {:?}",
                other
            ))),
        }
    }

    /// 退还预占
    pub async fn release(&self, token: &ReservationToken) -> Result<()> {
        self.release_with_remark(token, REMARK_COMPENSATION).await
    }

    /// 退还预占并附带备注
    ///
    /// 同一凭证重复退还为幂等空操作
    #[instrument(skip(self), fields(reward_id = token.reward_id, transaction_id = token.transaction_id))]
    pub async fn release_with_remark(&self, token: &ReservationToken, remark: &str) -> Result<()> {
        let refund = NewRewardTransaction::refund_for(token, remark, self.clock.now());
        match self.trx_repo.append_checked(&refund).await? {
            AppendOutcome::Appended(appended) => {
                info!(refund_id = appended.id, amount = token.amount, remark, "配额已退还");
                Ok(())
            }
            AppendOutcome::AlreadyReversed { reversal_id } => {
                debug!(reversal_id, "预占已被退还，忽略重复退还");
                Ok(())
            }
            AppendOutcome::QuotaNotBound => Err(CampaignError::QuotaNotBound(token.reward_id)),
            other => {
                warn!(outcome = ?other, "退还流水被拒绝");
                Err(CampaignError::Internal(format!(
                    "退还预占失败: transaction_id={}, outcome={:?}",
                    token.transaction_id, other
                )))
            }
        }
    }

    /// 已消耗量（由流水聚合）
    pub async fn consumed_total(&self, reward_id: i64) -> Result<i64> {
        self.trx_repo.sum_deltas(reward_id).await
    }

    /// 配额快照
    pub async fn snapshot(&self, reward_id: i64) -> Result<QuotaSnapshot> {
        let quota = self
            .quota_repo
            .get_quota(reward_id)
            .await?
            .ok_or(CampaignError::QuotaNotBound(reward_id))?;
        let consumed = self.trx_repo.sum_deltas(reward_id).await?;

        Ok(QuotaSnapshot::new(
            reward_id,
            quota.total_capacity(),
            consumed,
        ))
    }

    /// 人工调整已消耗量
    ///
    /// 调整后仍需满足 0 <= consumed <= capacity
    #[instrument(skip(self))]
    pub async fn adjust(&self, reward_id: i64, delta: i64, remark: &str) -> Result<RewardTransaction> {
        if delta == 0 {
            return Err(CampaignError::Validation("调整量不能为 0".to_string()));
        }

        let trx = NewRewardTransaction::manual(reward_id, delta, remark, self.clock.now());
        match self.trx_repo.append_checked(&trx).await? {
            AppendOutcome::Appended(appended) => {
                info!(transaction_id = appended.id, delta, "配额人工调整成功");
                Ok(appended)
            }
            AppendOutcome::CapacityExceeded { capacity, consumed } => {
                Err(CampaignError::QuotaExceeded {
                    reward_id,
                    capacity,
                    consumed,
                })
            }
            AppendOutcome::Underflow { consumed } => Err(CampaignError::Validation(format!(
                "调整后已消耗量为负: consumed={}, delta={}",
                consumed, delta
            ))),
            AppendOutcome::QuotaNotBound => Err(CampaignError::QuotaNotBound(reward_id)),
            AppendOutcome::AlreadyReversed { .. } => Err(CampaignError::Internal(
                "人工调整不应出现冲正冲突".to_string(),
            )),
        }
    }

    /// 追加容量
    ///
    /// 基础容量不变，追加部分以调整明细记录
    #[instrument(skip(self))]
    pub async fn increase_capacity(
        &self,
        reward_id: i64,
        amount: i64,
        operator: &str,
    ) -> Result<QuotaSnapshot> {
        if amount <= 0 {
            return Err(CampaignError::Validation(format!(
                "追加容量必须为正数: {}",
                amount
            )));
        }

        let adjustment = self
            .quota_repo
            .add_capacity(reward_id, amount, operator, self.clock.now())
            .await?
            .ok_or(CampaignError::QuotaNotBound(reward_id))?;
        info!(adjustment_id = adjustment.id, amount, operator, "配额容量已追加");

        self.snapshot(reward_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::TransactionReason;
    use crate::repository::{MemoryStore, MockRewardTransactionRepositoryTrait};
    use chrono::Utc;

    fn ledger_over(store: Arc<MemoryStore>) -> QuotaLedger {
        QuotaLedger::new(store.clone(), store, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_reserve_until_exhausted() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store);
        ledger.bind(1, 2).await.unwrap();

        ledger.reserve(1, 1).await.unwrap();
        ledger.reserve(1, 1).await.unwrap();
        let err = ledger.reserve(1, 1).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::QuotaExceeded {
                capacity: 2,
                consumed: 2,
                ..
            }
        ));
        assert_eq!(ledger.consumed_total(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_release_restores_consumed_and_is_idempotent() {
        let ledger = ledger_over(Arc::new(MemoryStore::new()));
        ledger.bind(1, 5).await.unwrap();

        let token = ledger.reserve(1, 2).await.unwrap();
        assert_eq!(ledger.consumed_total(1).await.unwrap(), 2);

        ledger.release(&token).await.unwrap();
        ledger.release(&token).await.unwrap();
        assert_eq!(ledger.consumed_total(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bind_twice_fails() {
        let ledger = ledger_over(Arc::new(MemoryStore::new()));
        ledger.bind(1, 5).await.unwrap();
        let err = ledger.bind(1, 6).await.unwrap_err();
        assert!(matches!(err, CampaignError::QuotaAlreadyBound(1)));
    }

    #[tokio::test]
    async fn test_reserve_without_quota() {
        let ledger = ledger_over(Arc::new(MemoryStore::new()));
        let err = ledger.reserve(42, 1).await.unwrap_err();
        assert!(matches!(err, CampaignError::QuotaNotBound(42)));
    }

    #[tokio::test]
    async fn test_increase_capacity_and_snapshot() {
        let ledger = ledger_over(Arc::new(MemoryStore::new()));
        ledger.bind(1, 1).await.unwrap();
        ledger.reserve(1, 1).await.unwrap();
        assert!(ledger.reserve(1, 1).await.is_err());

        let snapshot = ledger.increase_capacity(1, 2, "admin").await.unwrap();
        assert_eq!(snapshot.capacity, 3);
        assert_eq!(snapshot.consumed, 1);
        assert_eq!(snapshot.remaining, 2);

        ledger.reserve(1, 1).await.unwrap();
        assert!(ledger.increase_capacity(1, 0, "admin").await.is_err());
    }

    #[tokio::test]
    async fn test_adjust_is_bounded() {
        let ledger = ledger_over(Arc::new(MemoryStore::new()));
        ledger.bind(1, 3).await.unwrap();

        let trx = ledger.adjust(1, 2, "线下补发").await.unwrap();
        assert_eq!(trx.reason, TransactionReason::ManualAdjustment);

        assert!(matches!(
            ledger.adjust(1, 2, "超量").await,
            Err(CampaignError::QuotaExceeded { .. })
        ));
        assert!(matches!(
            ledger.adjust(1, -3, "回收").await,
            Err(CampaignError::Validation(_))
        ));
        ledger.adjust(1, -2, "回收").await.unwrap();
        assert_eq!(ledger.consumed_total(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_surfaced() {
        let mut trx_repo = MockRewardTransactionRepositoryTrait::new();
        trx_repo
            .expect_sum_deltas()
            .returning(|_| Err(CampaignError::Internal("存储不可用".to_string())));

        let ledger = QuotaLedger::new(
            Arc::new(MemoryStore::new()),
            Arc::new(trx_repo),
            Arc::new(SystemClock),
        );
        assert!(ledger.consumed_total(1).await.is_err());
    }

    #[tokio::test]
    async fn test_reserve_records_issuance_transaction() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());
        ledger.bind(9, 1).await.unwrap();

        let token = ledger.reserve(9, 1).await.unwrap();
        let trx = store
            .get_transaction(token.transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trx.reason, TransactionReason::Issuance);
        assert_eq!(trx.delta, 1);
        assert!(trx.created_at <= Utc::now());
    }
}
