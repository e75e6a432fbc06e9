//! 配额流水仓储
//!
//! 流水只追加不修改。已消耗量 = SUM(delta)，在锁定配额行后重新聚合，
//! 因此条件检查与写入处于同一事务、同一把锁之内。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use super::quota_repo::QuotaRepository;
use super::traits::RewardTransactionRepositoryTrait;
use crate::error::Result;
use crate::models::{AppendOutcome, NewRewardTransaction, QuotaSnapshot, RewardTransaction};

pub struct RewardTransactionRepository {
    pool: PgPool,
}

impl RewardTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 条件追加流水
    pub async fn append_checked(&self, trx: &NewRewardTransaction) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(quota) = QuotaRepository::lock_in_tx(&mut tx, trx.reward_id).await? else {
            return Ok(AppendOutcome::QuotaNotBound);
        };

        if let Some(original_id) = trx.reverses_id {
            let existing = sqlx::query("SELECT id FROM reward_transactions WHERE reverses_id = $1")
                .bind(original_id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = existing {
                return Ok(AppendOutcome::AlreadyReversed {
                    reversal_id: row.get("id"),
                });
            }
        }

        let consumed = Self::sum_deltas_in_tx(&mut tx, trx.reward_id).await?;
        let after = consumed + trx.delta;
        if trx.delta > 0 && after > quota.total_capacity() {
            return Ok(AppendOutcome::CapacityExceeded {
                capacity: quota.total_capacity(),
                consumed,
            });
        }
        if after < 0 {
            return Ok(AppendOutcome::Underflow { consumed });
        }

        let appended = Self::insert_in_tx(&mut tx, trx).await?;
        tx.commit().await?;

        Ok(AppendOutcome::Appended(appended))
    }

    /// 在事务中写入流水（不做任何检查）
    pub async fn insert_in_tx(
        tx: &mut PgConnection,
        trx: &NewRewardTransaction,
    ) -> Result<RewardTransaction> {
        let appended = sqlx::query_as::<_, RewardTransaction>(
            r#"
            INSERT INTO reward_transactions (reward_id, delta, reason, reverses_id, remark, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, reward_id, delta, reason, reverses_id, remark, created_at
            "#,
        )
        .bind(trx.reward_id)
        .bind(trx.delta)
        .bind(trx.reason)
        .bind(trx.reverses_id)
        .bind(&trx.remark)
        .bind(trx.created_at)
        .fetch_one(tx)
        .await?;

        Ok(appended)
    }

    /// 在事务中聚合已消耗量
    pub async fn sum_deltas_in_tx(tx: &mut PgConnection, reward_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT AS consumed FROM reward_transactions WHERE reward_id = $1",
        )
        .bind(reward_id)
        .fetch_one(tx)
        .await?;

        Ok(row.get("consumed"))
    }

    pub async fn sum_deltas(&self, reward_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT AS consumed FROM reward_transactions WHERE reward_id = $1",
        )
        .bind(reward_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("consumed"))
    }

    pub async fn get(&self, id: i64) -> Result<Option<RewardTransaction>> {
        let trx = sqlx::query_as::<_, RewardTransaction>(
            r#"
            SELECT id, reward_id, delta, reason, reverses_id, remark, created_at
            FROM reward_transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(trx)
    }

    /// 按时间倒序列出流水
    pub async fn list_by_reward(&self, reward_id: i64, limit: i64) -> Result<Vec<RewardTransaction>> {
        let transactions = sqlx::query_as::<_, RewardTransaction>(
            r#"
            SELECT id, reward_id, delta, reason, reverses_id, remark, created_at
            FROM reward_transactions
            WHERE reward_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(reward_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    /// 未被冲正的发券预占
    pub async fn list_unreversed_issuances(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RewardTransaction>> {
        let transactions = sqlx::query_as::<_, RewardTransaction>(
            r#"
            SELECT t.id, t.reward_id, t.delta, t.reason, t.reverses_id, t.remark, t.created_at
            FROM reward_transactions t
            WHERE t.reason = 'issuance'
              AND t.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM reward_transactions r WHERE r.reverses_id = t.id
              )
            ORDER BY t.id ASC
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    /// 全部配额的使用情况
    pub async fn list_quota_usage(&self) -> Result<Vec<QuotaSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT q.reward_id,
                   (q.capacity + q.extra_capacity) AS capacity,
                   COALESCE(SUM(t.delta), 0)::BIGINT AS consumed
            FROM quotas q
            LEFT JOIN reward_transactions t ON t.reward_id = q.reward_id
            GROUP BY q.reward_id, q.capacity, q.extra_capacity
            ORDER BY q.reward_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let usage = rows
            .iter()
            .map(|row| {
                QuotaSnapshot::new(row.get("reward_id"), row.get("capacity"), row.get("consumed"))
            })
            .collect();

        Ok(usage)
    }
}

#[async_trait]
impl RewardTransactionRepositoryTrait for RewardTransactionRepository {
    async fn append_checked(&self, trx: &NewRewardTransaction) -> Result<AppendOutcome> {
        RewardTransactionRepository::append_checked(self, trx).await
    }

    async fn sum_deltas(&self, reward_id: i64) -> Result<i64> {
        RewardTransactionRepository::sum_deltas(self, reward_id).await
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<RewardTransaction>> {
        self.get(id).await
    }

    async fn list_by_reward(&self, reward_id: i64, limit: i64) -> Result<Vec<RewardTransaction>> {
        RewardTransactionRepository::list_by_reward(self, reward_id, limit).await
    }

    async fn list_unreversed_issuances(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RewardTransaction>> {
        RewardTransactionRepository::list_unreversed_issuances(self, before).await
    }

    async fn list_quota_usage(&self) -> Result<Vec<QuotaSnapshot>> {
        RewardTransactionRepository::list_quota_usage(self).await
    }
}
