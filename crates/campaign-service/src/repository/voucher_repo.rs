//! 券仓储
//!
//! 券状态迁移全部使用 CAS 更新，保证终态不被覆盖

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use super::traits::VoucherRepositoryTrait;
use crate::error::{CampaignError, Result};
use crate::models::{NewVoucher, Voucher, VoucherInsert, VoucherStatus};

pub struct VoucherRepository {
    pool: PgPool,
}

impl VoucherRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建 Pending 券
    ///
    /// 幂等键冲突时不写入，返回已存在的券
    pub async fn create(&self, voucher: &NewVoucher) -> Result<VoucherInsert> {
        let created = sqlx::query_as::<_, Voucher>(
            r#"
            INSERT INTO vouchers (reward_id, campaign_id, user_id, status, reservation_id,
                                  idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id, reward_id, campaign_id, user_id, status, reservation_id, code,
                      idempotency_key, redeemed_at, expired_at, created_at, updated_at
            "#,
        )
        .bind(voucher.reward_id)
        .bind(voucher.campaign_id)
        .bind(&voucher.user_id)
        .bind(voucher.reservation_id)
        .bind(&voucher.idempotency_key)
        .bind(voucher.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(created) = created {
            return Ok(VoucherInsert::Created(created));
        }

        let key = voucher.idempotency_key.as_deref().ok_or_else(|| {
            CampaignError::Internal("券写入被忽略但未携带幂等键".to_string())
        })?;
        let existing = self.get_by_idempotency_key(key).await?.ok_or_else(|| {
            CampaignError::Internal(format!("幂等键冲突但未找到已存在的券: {}", key))
        })?;

        Ok(VoucherInsert::DuplicateKey(existing))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Voucher>> {
        let voucher = sqlx::query_as::<_, Voucher>(
            r#"
            SELECT id, reward_id, campaign_id, user_id, status, reservation_id, code,
                   idempotency_key, redeemed_at, expired_at, created_at, updated_at
            FROM vouchers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(voucher)
    }

    /// 在事务中锁定券
    pub async fn lock_in_tx(tx: &mut PgConnection, id: i64) -> Result<Option<Voucher>> {
        let voucher = sqlx::query_as::<_, Voucher>(
            r#"
            SELECT id, reward_id, campaign_id, user_id, status, reservation_id, code,
                   idempotency_key, redeemed_at, expired_at, created_at, updated_at
            FROM vouchers
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(tx)
        .await?;

        Ok(voucher)
    }

    pub async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Voucher>> {
        let voucher = sqlx::query_as::<_, Voucher>(
            r#"
            SELECT id, reward_id, campaign_id, user_id, status, reservation_id, code,
                   idempotency_key, redeemed_at, expired_at, created_at, updated_at
            FROM vouchers
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(voucher)
    }

    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Voucher>> {
        let vouchers = sqlx::query_as::<_, Voucher>(
            r#"
            SELECT id, reward_id, campaign_id, user_id, status, reservation_id, code,
                   idempotency_key, redeemed_at, expired_at, created_at, updated_at
            FROM vouchers
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(vouchers)
    }

    pub async fn list_by_campaign(
        &self,
        campaign_id: i64,
        statuses: &[VoucherStatus],
    ) -> Result<Vec<Voucher>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let vouchers = sqlx::query_as::<_, Voucher>(
            r#"
            SELECT id, reward_id, campaign_id, user_id, status, reservation_id, code,
                   idempotency_key, redeemed_at, expired_at, created_at, updated_at
            FROM vouchers
            WHERE campaign_id = $1 AND status = ANY($2)
            ORDER BY id ASC
            "#,
        )
        .bind(campaign_id)
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;

        Ok(vouchers)
    }

    pub async fn activate(&self, id: i64, code: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET status = 'active', code = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn expire(&self, id: i64, from: VoucherStatus, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET status = 'expired', expired_at = $3, updated_at = $3
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 删除 Pending 券，券码随外键级联删除
    pub async fn delete_pending(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vouchers WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_referenced_reservations(&self, reservation_ids: &[i64]) -> Result<Vec<i64>> {
        if reservation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT DISTINCT reservation_id FROM vouchers WHERE reservation_id = ANY($1)",
        )
        .bind(reservation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("reservation_id")).collect())
    }
}

#[async_trait]
impl VoucherRepositoryTrait for VoucherRepository {
    async fn create_voucher(&self, voucher: &NewVoucher) -> Result<VoucherInsert> {
        self.create(voucher).await
    }

    async fn get_voucher(&self, id: i64) -> Result<Option<Voucher>> {
        self.get(id).await
    }

    async fn get_voucher_by_idempotency_key(&self, key: &str) -> Result<Option<Voucher>> {
        self.get_by_idempotency_key(key).await
    }

    async fn list_vouchers_by_user(&self, user_id: &str) -> Result<Vec<Voucher>> {
        self.list_by_user(user_id).await
    }

    async fn list_vouchers_by_campaign(
        &self,
        campaign_id: i64,
        statuses: &[VoucherStatus],
    ) -> Result<Vec<Voucher>> {
        self.list_by_campaign(campaign_id, statuses).await
    }

    async fn activate_voucher(&self, id: i64, code: &str, at: DateTime<Utc>) -> Result<bool> {
        self.activate(id, code, at).await
    }

    async fn expire_voucher(
        &self,
        id: i64,
        from: VoucherStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.expire(id, from, at).await
    }

    async fn delete_pending_voucher(&self, id: i64) -> Result<bool> {
        self.delete_pending(id).await
    }

    async fn find_referenced_reservations(&self, reservation_ids: &[i64]) -> Result<Vec<i64>> {
        VoucherRepository::find_referenced_reservations(self, reservation_ids).await
    }
}
