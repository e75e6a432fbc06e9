//! 券与券码实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::VoucherStatus;

/// 券
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub id: i64,
    pub reward_id: i64,
    /// 冗余活动 ID，便于巡检按活动级联过期
    pub campaign_id: i64,
    pub user_id: String,
    pub status: VoucherStatus,
    /// 发券时的预占流水 ID
    pub reservation_id: i64,
    /// 生效后回填的券码
    pub code: Option<String>,
    pub idempotency_key: Option<String>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建券参数（状态固定为 Pending）
#[derive(Debug, Clone)]
pub struct NewVoucher {
    pub reward_id: i64,
    pub campaign_id: i64,
    pub user_id: String,
    pub reservation_id: i64,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 创建券的结果
#[derive(Debug, Clone)]
pub enum VoucherInsert {
    Created(Voucher),
    /// 幂等键已被占用，返回已存在的券
    DuplicateKey(Voucher),
}

/// 券码
///
/// 券码全局唯一；redeemed 只能由 false 变为 true 一次。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoucherCode {
    pub id: i64,
    pub voucher_id: i64,
    pub code: String,
    pub redeemed: bool,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 核销的原子检查结果
///
/// 存储层在同一个原子步骤内完成检查和置位；除 `Redeemed` 外均未产生任何写入。
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Redeemed(Voucher),
    NotFound,
    AlreadyRedeemed,
    VoucherExpired,
    /// 券不处于可核销状态（如仍为 Pending）
    NotRedeemable(VoucherStatus),
}

/// 积分/行为历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointHistoryEntry {
    pub user_id: String,
    pub voucher_id: i64,
    pub reward_id: i64,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

impl PointHistoryEntry {
    pub const ACTION_VOUCHER_REDEEMED: &'static str = "voucher_redeemed";

    pub fn redeemed(voucher: &Voucher, at: DateTime<Utc>) -> Self {
        Self {
            user_id: voucher.user_id.clone(),
            voucher_id: voucher.id,
            reward_id: voucher.reward_id,
            action: Self::ACTION_VOUCHER_REDEEMED.to_string(),
            created_at: at,
        }
    }
}
