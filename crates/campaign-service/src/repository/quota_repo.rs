//! 配额仓储
//!
//! 配额行同时充当该奖励的串行化锁：
//! 条件追加流水与追加容量都会先对配额行加 FOR UPDATE 锁。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::traits::QuotaRepositoryTrait;
use crate::error::Result;
use crate::models::{Quota, QuotaAdjustment};

pub struct QuotaRepository {
    pool: PgPool,
}

impl QuotaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 绑定配额，reward_id 唯一约束冲突时返回 None
    pub async fn create(
        &self,
        reward_id: i64,
        capacity: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Quota>> {
        let mut conn = self.pool.acquire().await?;
        Self::create_in_tx(&mut conn, reward_id, capacity, at).await
    }

    /// 在事务中绑定配额
    pub async fn create_in_tx(
        tx: &mut PgConnection,
        reward_id: i64,
        capacity: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Quota>> {
        let quota = sqlx::query_as::<_, Quota>(
            r#"
            INSERT INTO quotas (reward_id, capacity, extra_capacity, created_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (reward_id) DO NOTHING
            RETURNING id, reward_id, capacity, extra_capacity, created_at
            "#,
        )
        .bind(reward_id)
        .bind(capacity)
        .bind(at)
        .fetch_optional(tx)
        .await?;

        Ok(quota)
    }

    pub async fn get(&self, reward_id: i64) -> Result<Option<Quota>> {
        let quota = sqlx::query_as::<_, Quota>(
            r#"
            SELECT id, reward_id, capacity, extra_capacity, created_at
            FROM quotas
            WHERE reward_id = $1
            "#,
        )
        .bind(reward_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(quota)
    }

    /// 在事务中锁定配额行
    pub async fn lock_in_tx(tx: &mut PgConnection, reward_id: i64) -> Result<Option<Quota>> {
        let quota = sqlx::query_as::<_, Quota>(
            r#"
            SELECT id, reward_id, capacity, extra_capacity, created_at
            FROM quotas
            WHERE reward_id = $1
            FOR UPDATE
            "#,
        )
        .bind(reward_id)
        .fetch_optional(tx)
        .await?;

        Ok(quota)
    }

    /// 追加容量并记录调整明细
    pub async fn add_capacity(
        &self,
        reward_id: i64,
        amount: i64,
        operator: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<QuotaAdjustment>> {
        let mut tx = self.pool.begin().await?;

        if Self::lock_in_tx(&mut tx, reward_id).await?.is_none() {
            return Ok(None);
        }

        sqlx::query("UPDATE quotas SET extra_capacity = extra_capacity + $2 WHERE reward_id = $1")
            .bind(reward_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        let adjustment = sqlx::query_as::<_, QuotaAdjustment>(
            r#"
            INSERT INTO quota_adjustments (reward_id, amount, operator, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, reward_id, amount, operator, created_at
            "#,
        )
        .bind(reward_id)
        .bind(amount)
        .bind(operator)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(adjustment))
    }

    pub async fn list_adjustments(&self, reward_id: i64) -> Result<Vec<QuotaAdjustment>> {
        let adjustments = sqlx::query_as::<_, QuotaAdjustment>(
            r#"
            SELECT id, reward_id, amount, operator, created_at
            FROM quota_adjustments
            WHERE reward_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(reward_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(adjustments)
    }
}

#[async_trait]
impl QuotaRepositoryTrait for QuotaRepository {
    async fn create_quota(
        &self,
        reward_id: i64,
        capacity: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Quota>> {
        self.create(reward_id, capacity, at).await
    }

    async fn get_quota(&self, reward_id: i64) -> Result<Option<Quota>> {
        self.get(reward_id).await
    }

    async fn add_capacity(
        &self,
        reward_id: i64,
        amount: i64,
        operator: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<QuotaAdjustment>> {
        QuotaRepository::add_capacity(self, reward_id, amount, operator, at).await
    }

    async fn list_adjustments(&self, reward_id: i64) -> Result<Vec<QuotaAdjustment>> {
        QuotaRepository::list_adjustments(self, reward_id).await
    }
}
