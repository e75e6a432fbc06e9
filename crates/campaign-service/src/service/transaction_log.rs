//! 配额流水日志
//!
//! 提供流水查询与对账。对账（refresh）负责回收孤儿预占：
//! 预占成功后、券落库前进程崩溃，或补偿退还本身失败，都会留下
//! 既未被冲正、也没有任何券引用的发券流水。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, instrument};

use campaign_shared::observability::metrics;

use super::dto::ReconcileReport;
use super::quota_ledger::QuotaLedger;
use crate::error::Result;
use crate::models::{ReservationToken, RewardTransaction};
use crate::repository::{RewardTransactionRepositoryTrait, VoucherRepositoryTrait};

/// 对账回收时写入的流水备注
pub const REMARK_RECONCILE: &str = "对账回收孤儿预占";

pub struct RewardTransactionLog {
    trx_repo: Arc<dyn RewardTransactionRepositoryTrait>,
    voucher_repo: Arc<dyn VoucherRepositoryTrait>,
    ledger: Arc<QuotaLedger>,
    /// 预占宽限期，避免回收正在进行中的发券
    grace: Duration,
}

impl RewardTransactionLog {
    pub fn new(
        trx_repo: Arc<dyn RewardTransactionRepositoryTrait>,
        voucher_repo: Arc<dyn VoucherRepositoryTrait>,
        ledger: Arc<QuotaLedger>,
        grace: Duration,
    ) -> Self {
        Self {
            trx_repo,
            voucher_repo,
            ledger,
            grace,
        }
    }

    /// 最近的流水（按时间倒序）
    pub async fn list(&self, reward_id: i64, limit: i64) -> Result<Vec<RewardTransaction>> {
        self.trx_repo.list_by_reward(reward_id, limit).await
    }

    pub async fn consumed_total(&self, reward_id: i64) -> Result<i64> {
        self.trx_repo.sum_deltas(reward_id).await
    }

    /// 流水对账
    ///
    /// 单条回收失败只记录并跳过；读取流水失败则整体返回错误
    #[instrument(skip(self))]
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let cutoff = now - self.grace;
        let candidates = self.trx_repo.list_unreversed_issuances(cutoff).await?;

        let mut report = ReconcileReport::default();

        if !candidates.is_empty() {
            let ids: Vec<i64> = candidates.iter().map(|t| t.id).collect();
            let referenced: HashSet<i64> = self
                .voucher_repo
                .find_referenced_reservations(&ids)
                .await?
                .into_iter()
                .collect();

            for orphan in candidates.iter().filter(|t| !referenced.contains(&t.id)) {
                let token = ReservationToken::from(orphan);
                match self.ledger.release_with_remark(&token, REMARK_RECONCILE).await {
                    Ok(()) => report.refunded.push(orphan.id),
                    Err(e) => {
                        error!(
                            transaction_id = orphan.id,
                            reward_id = orphan.reward_id,
                            error = %e,
                            "孤儿预占回收失败"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        for usage in self.trx_repo.list_quota_usage().await? {
            if usage.consumed > usage.capacity {
                error!(
                    reward_id = usage.reward_id,
                    capacity = usage.capacity,
                    consumed = usage.consumed,
                    "配额已消耗量超过容量"
                );
                report.over_capacity.push(usage);
            }
        }

        metrics::record_reconciled(report.refunded.len() as u64);
        info!(
            refunded = report.refunded.len(),
            over_capacity = report.over_capacity.len(),
            failures = report.failures,
            "流水对账完成"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{NewRewardTransaction, NewVoucher, VoucherInsert};
    use crate::repository::{MemoryStore, QuotaRepositoryTrait};

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: Arc<QuotaLedger>,
        log: RewardTransactionLog,
        now: DateTime<Utc>,
    }

    async fn fixture(capacity: i64) -> Fixture {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now - Duration::hours(1)));
        let ledger = Arc::new(QuotaLedger::new(store.clone(), store.clone(), clock));
        ledger.bind(1, capacity).await.unwrap();
        let log = RewardTransactionLog::new(
            store.clone(),
            store.clone(),
            ledger.clone(),
            Duration::minutes(5),
        );
        Fixture {
            store,
            ledger,
            log,
            now,
        }
    }

    #[tokio::test]
    async fn test_refresh_reclaims_orphan_reservation() {
        let f = fixture(2).await;

        // 一笔有券引用，一笔是孤儿
        let used = f.ledger.reserve(1, 1).await.unwrap();
        let orphan = f.ledger.reserve(1, 1).await.unwrap();
        let inserted = f
            .store
            .create_voucher(&NewVoucher {
                reward_id: 1,
                campaign_id: 1,
                user_id: "user-1".to_string(),
                reservation_id: used.transaction_id,
                idempotency_key: None,
                created_at: f.now,
            })
            .await
            .unwrap();
        assert!(matches!(inserted, VoucherInsert::Created(_)));

        let report = f.log.refresh(f.now).await.unwrap();
        assert_eq!(report.refunded, vec![orphan.transaction_id]);
        assert_eq!(f.log.consumed_total(1).await.unwrap(), 1);

        // 再次对账无事可做
        let again = f.log.refresh(f.now).await.unwrap();
        assert!(again.refunded.is_empty());
        assert_eq!(f.log.consumed_total(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refresh_respects_grace_period() {
        let f = fixture(1).await;
        f.ledger.reserve(1, 1).await.unwrap();

        // 预占时间 = now - 1h，宽限期 5 分钟，截止点之前无候选
        let report = f.log.refresh(f.now - Duration::minutes(58)).await.unwrap();
        assert!(report.refunded.is_empty());

        let report = f.log.refresh(f.now).await.unwrap();
        assert_eq!(report.refunded.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_reports_over_capacity() {
        let f = fixture(1).await;
        f.store
            .insert_raw_transaction(&NewRewardTransaction::manual(1, 3, "导入", f.now));
        f.store.create_quota(2, 10, f.now).await.unwrap();

        let report = f.log.refresh(f.now).await.unwrap();
        assert_eq!(report.over_capacity.len(), 1);
        assert_eq!(report.over_capacity[0].reward_id, 1);
        assert_eq!(report.over_capacity[0].consumed, 3);
        // 仅告警，不自动修正
        assert_eq!(f.log.consumed_total(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let f = fixture(3).await;
        let first = f.ledger.reserve(1, 1).await.unwrap();
        let second = f.ledger.reserve(1, 1).await.unwrap();

        let list = f.log.list(1, 10).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second.transaction_id);
        assert_eq!(list[1].id, first.transaction_id);
    }
}
