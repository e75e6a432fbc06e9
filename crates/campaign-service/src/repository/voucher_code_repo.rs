//! 券码仓储
//!
//! 券码唯一性由 code 列唯一约束兜底，占位采用 `ON CONFLICT DO NOTHING`，
//! 不存在“先查询是否存在再写入”的竞争窗口。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::traits::VoucherCodeRepositoryTrait;
use super::voucher_repo::VoucherRepository;
use crate::error::Result;
use crate::models::{RedeemOutcome, Voucher, VoucherCode, VoucherStatus};

pub struct VoucherCodeRepository {
    pool: PgPool,
}

impl VoucherCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn try_insert(
        &self,
        voucher_id: i64,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VoucherCode>> {
        let inserted = sqlx::query_as::<_, VoucherCode>(
            r#"
            INSERT INTO voucher_codes (voucher_id, code, redeemed, created_at)
            VALUES ($1, $2, false, $3)
            ON CONFLICT (code) DO NOTHING
            RETURNING id, voucher_id, code, redeemed, redeemed_at, created_at
            "#,
        )
        .bind(voucher_id)
        .bind(code)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<VoucherCode>> {
        let found = sqlx::query_as::<_, VoucherCode>(
            r#"
            SELECT id, voucher_id, code, redeemed, redeemed_at, created_at
            FROM voucher_codes
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found)
    }

    /// 原子核销
    ///
    /// 加锁顺序固定为 券码 -> 券，与巡检的单行 CAS 更新不会形成环路等待
    pub async fn redeem(&self, code: &str, at: DateTime<Utc>) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT voucher_id, redeemed FROM voucher_codes WHERE code = $1 FOR UPDATE")
            .bind(code)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(RedeemOutcome::NotFound);
        };
        if row.get::<bool, _>("redeemed") {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }
        let voucher_id: i64 = row.get("voucher_id");

        let Some(voucher) = VoucherRepository::lock_in_tx(&mut tx, voucher_id).await? else {
            return Ok(RedeemOutcome::NotFound);
        };
        match voucher.status {
            VoucherStatus::Active => {}
            VoucherStatus::Expired => return Ok(RedeemOutcome::VoucherExpired),
            VoucherStatus::Redeemed => return Ok(RedeemOutcome::AlreadyRedeemed),
            other => return Ok(RedeemOutcome::NotRedeemable(other)),
        }

        sqlx::query("UPDATE voucher_codes SET redeemed = true, redeemed_at = $2 WHERE code = $1")
            .bind(code)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        let redeemed = sqlx::query_as::<_, Voucher>(
            r#"
            UPDATE vouchers
            SET status = 'redeemed', redeemed_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING id, reward_id, campaign_id, user_id, status, reservation_id, code,
                      idempotency_key, redeemed_at, expired_at, created_at, updated_at
            "#,
        )
        .bind(voucher_id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RedeemOutcome::Redeemed(redeemed))
    }

    pub async fn delete_by_voucher(&self, voucher_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM voucher_codes WHERE voucher_id = $1")
            .bind(voucher_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl VoucherCodeRepositoryTrait for VoucherCodeRepository {
    async fn try_insert_code(
        &self,
        voucher_id: i64,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VoucherCode>> {
        self.try_insert(voucher_id, code, at).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<VoucherCode>> {
        VoucherCodeRepository::get_by_code(self, code).await
    }

    async fn redeem_code(&self, code: &str, at: DateTime<Utc>) -> Result<RedeemOutcome> {
        self.redeem(code, at).await
    }

    async fn delete_code_by_voucher(&self, voucher_id: i64) -> Result<bool> {
        self.delete_by_voucher(voucher_id).await
    }
}
