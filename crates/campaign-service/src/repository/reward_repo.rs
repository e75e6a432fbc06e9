//! 奖励仓储
//!
//! 奖励标签存放在 reward_tags 关联表中，读取时回填到 `Reward::tags`

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use super::quota_repo::QuotaRepository;
use super::traits::RewardRepositoryTrait;
use crate::error::{CampaignError, Result};
use crate::models::campaign::normalize_tags;
use crate::models::{CampaignStatus, NewReward, Quota, Reward};

pub struct RewardRepository {
    pool: PgPool,
}

impl RewardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建奖励、标签与配额，三者同一事务提交
    pub async fn create(&self, reward: &NewReward) -> Result<(Reward, Quota)> {
        let mut tx = self.pool.begin().await?;

        let mut created = sqlx::query_as::<_, Reward>(
            r#"
            INSERT INTO rewards (campaign_id, name, status, status_locked, created_at, updated_at)
            VALUES ($1, $2, $3, false, $4, $4)
            RETURNING id, campaign_id, name, status, status_locked, created_at, updated_at
            "#,
        )
        .bind(reward.campaign_id)
        .bind(&reward.name)
        .bind(reward.status)
        .bind(reward.created_at)
        .fetch_one(&mut *tx)
        .await?;

        Self::replace_tags_in_tx(&mut tx, created.id, &reward.tags).await?;
        let quota = QuotaRepository::create_in_tx(
            &mut tx,
            created.id,
            reward.quota_capacity,
            reward.created_at,
        )
        .await?
        .ok_or(CampaignError::QuotaAlreadyBound(created.id))?;
        tx.commit().await?;

        created.tags = normalize_tags(&reward.tags);
        Ok((created, quota))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Reward>> {
        let reward = sqlx::query_as::<_, Reward>(
            r#"
            SELECT id, campaign_id, name, status, status_locked, created_at, updated_at
            FROM rewards
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match reward {
            Some(mut reward) => {
                reward.tags = self.load_tags(reward.id).await?;
                Ok(Some(reward))
            }
            None => Ok(None),
        }
    }

    pub async fn list_by_campaign(&self, campaign_id: i64) -> Result<Vec<Reward>> {
        let mut rewards = sqlx::query_as::<_, Reward>(
            r#"
            SELECT id, campaign_id, name, status, status_locked, created_at, updated_at
            FROM rewards
            WHERE campaign_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        if rewards.is_empty() {
            return Ok(rewards);
        }

        let rows = sqlx::query(
            r#"
            SELECT t.reward_id, t.tag_id
            FROM reward_tags t
            JOIN rewards r ON r.id = t.reward_id
            WHERE r.campaign_id = $1
            ORDER BY t.reward_id, t.tag_id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut tags: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in rows {
            tags.entry(row.get("reward_id"))
                .or_default()
                .push(row.get("tag_id"));
        }
        for reward in rewards.iter_mut() {
            reward.tags = tags.remove(&reward.id).unwrap_or_default();
        }

        Ok(rewards)
    }

    /// 整体替换标签
    ///
    /// 先锁定奖励行，使并发的替换串行执行，结果为最后提交的那一次
    pub async fn set_tags(&self, reward_id: i64, tags: &[i64]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM rewards WHERE id = $1 FOR UPDATE")
            .bind(reward_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Ok(false);
        }

        Self::replace_tags_in_tx(&mut tx, reward_id, tags).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// 在事务中替换标签
    pub async fn replace_tags_in_tx(
        tx: &mut PgConnection,
        reward_id: i64,
        tags: &[i64],
    ) -> Result<()> {
        sqlx::query("DELETE FROM reward_tags WHERE reward_id = $1")
            .bind(reward_id)
            .execute(&mut *tx)
            .await?;

        let tags = normalize_tags(tags);
        if !tags.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO reward_tags (reward_id, tag_id)
                SELECT $1, UNNEST($2::bigint[])
                "#,
            )
            .bind(reward_id)
            .bind(&tags)
            .execute(&mut *tx)
            .await?;
        }

        Ok(())
    }

    async fn load_tags(&self, reward_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT tag_id FROM reward_tags WHERE reward_id = $1 ORDER BY tag_id",
        )
        .bind(reward_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("tag_id")).collect())
    }

    pub async fn update_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rewards
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2 AND status_locked = false
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn override_status(
        &self,
        id: i64,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reward>> {
        let reward = sqlx::query_as::<_, Reward>(
            r#"
            UPDATE rewards
            SET status = $2, status_locked = true, updated_at = $3
            WHERE id = $1
            RETURNING id, campaign_id, name, status, status_locked, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match reward {
            Some(mut reward) => {
                reward.tags = self.load_tags(reward.id).await?;
                Ok(Some(reward))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RewardRepositoryTrait for RewardRepository {
    async fn create_reward(&self, reward: &NewReward) -> Result<(Reward, Quota)> {
        self.create(reward).await
    }

    async fn get_reward(&self, id: i64) -> Result<Option<Reward>> {
        self.get(id).await
    }

    async fn list_rewards_by_campaign(&self, campaign_id: i64) -> Result<Vec<Reward>> {
        self.list_by_campaign(campaign_id).await
    }

    async fn set_reward_tags(&self, reward_id: i64, tags: &[i64]) -> Result<bool> {
        self.set_tags(reward_id, tags).await
    }

    async fn update_reward_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.update_status(id, from, to, at).await
    }

    async fn override_reward_status(
        &self,
        id: i64,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reward>> {
        self.override_status(id, status, at).await
    }
}
