//! 积分历史仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::PointHistoryRecorder;
use crate::error::Result;
use crate::models::PointHistoryEntry;

pub struct PointHistoryRepository {
    pool: PgPool,
}

impl PointHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PointHistoryRecorder for PointHistoryRepository {
    async fn record(&self, entry: &PointHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO point_histories (user_id, voucher_id, reward_id, action, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.user_id)
        .bind(entry.voucher_id)
        .bind(entry.reward_id)
        .bind(&entry.action)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
