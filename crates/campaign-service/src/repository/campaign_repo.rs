//! 活动仓储
//!
//! 提供活动实体的数据访问，状态变更均以 CAS 方式执行

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::CampaignRepositoryTrait;
use crate::error::Result;
use crate::models::{Campaign, CampaignStatus, NewCampaign};

pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, campaign: &NewCampaign) -> Result<Campaign> {
        let created = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (name, start_at, end_at, status, status_locked, created_at, updated_at)
            VALUES ($1, $2, $3, $4, false, $5, $5)
            RETURNING id, name, start_at, end_at, status, status_locked, created_at, updated_at
            "#,
        )
        .bind(&campaign.name)
        .bind(campaign.start_at)
        .bind(campaign.end_at)
        .bind(campaign.status)
        .bind(campaign.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, start_at, end_at, status, status_locked, created_at, updated_at
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }

    pub async fn list(&self) -> Result<Vec<Campaign>> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, start_at, end_at, status, status_locked, created_at, updated_at
            FROM campaigns
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(campaigns)
    }

    /// 状态 CAS 更新
    ///
    /// 已锁定的活动不受巡检影响，WHERE 条件中一并排除
    pub async fn update_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
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
    ) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns
            SET status = $2, status_locked = true, updated_at = $3
            WHERE id = $1
            RETURNING id, name, start_at, end_at, status, status_locked, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }
}

#[async_trait]
impl CampaignRepositoryTrait for CampaignRepository {
    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<Campaign> {
        self.create(campaign).await
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        self.get(id).await
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        self.list().await
    }

    async fn update_campaign_status(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.update_status(id, from, to, at).await
    }

    async fn override_campaign_status(
        &self,
        id: i64,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        self.override_status(id, status, at).await
    }
}
