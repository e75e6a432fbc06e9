//! 配额与配额流水实体定义
//!
//! 已消耗量从不以计数器形式存储：它始终是流水 delta 的聚合结果，
//! 因此可审计，并能在预占中途崩溃后精确恢复。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::TransactionReason;

/// 配额
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub id: i64,
    pub reward_id: i64,
    /// 创建时的基础容量，创建后不可修改
    pub capacity: i64,
    /// 管理员追加的容量合计
    pub extra_capacity: i64,
    pub created_at: DateTime<Utc>,
}

impl Quota {
    /// 总容量 = 基础容量 + 追加容量
    pub fn total_capacity(&self) -> i64 {
        self.capacity + self.extra_capacity
    }
}

/// 容量追加记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QuotaAdjustment {
    pub id: i64,
    pub reward_id: i64,
    pub amount: i64,
    pub operator: String,
    pub created_at: DateTime<Utc>,
}

/// 配额快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub reward_id: i64,
    pub capacity: i64,
    pub consumed: i64,
    pub remaining: i64,
}

impl QuotaSnapshot {
    pub fn new(reward_id: i64, capacity: i64, consumed: i64) -> Self {
        Self {
            reward_id,
            capacity,
            consumed,
            remaining: (capacity - consumed).max(0),
        }
    }
}

/// 配额流水（只追加）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RewardTransaction {
    pub id: i64,
    pub reward_id: i64,
    /// 有符号的配额调整量
    pub delta: i64,
    pub reason: TransactionReason,
    /// 冲正的原预占流水 ID（仅退还流水）
    pub reverses_id: Option<i64>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 新增流水参数
#[derive(Debug, Clone)]
pub struct NewRewardTransaction {
    pub reward_id: i64,
    pub delta: i64,
    pub reason: TransactionReason,
    pub reverses_id: Option<i64>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewRewardTransaction {
    /// 发券预占
    pub fn issuance(reward_id: i64, amount: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            reward_id,
            delta: amount,
            reason: TransactionReason::Issuance,
            reverses_id: None,
            remark: None,
            created_at,
        }
    }

    /// 冲正某笔预占
    pub fn refund_of(original: &RewardTransaction, remark: &str, created_at: DateTime<Utc>) -> Self {
        Self::refund_for(&ReservationToken::from(original), remark, created_at)
    }

    /// 按预占凭证冲正
    pub fn refund_for(token: &ReservationToken, remark: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            reward_id: token.reward_id,
            delta: -token.amount,
            reason: TransactionReason::Refund,
            reverses_id: Some(token.transaction_id),
            remark: Some(remark.to_string()),
            created_at,
        }
    }

    /// 人工调整
    pub fn manual(reward_id: i64, delta: i64, remark: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            reward_id,
            delta,
            reason: TransactionReason::ManualAdjustment,
            reverses_id: None,
            remark: Some(remark.to_string()),
            created_at,
        }
    }
}

/// 带条件追加流水的结果
///
/// 存储层在同一个原子步骤内完成校验和写入；除 `Appended` 外均未产生任何写入。
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended(RewardTransaction),
    /// consumed + delta 将超过容量
    CapacityExceeded { capacity: i64, consumed: i64 },
    /// consumed + delta 将小于 0
    Underflow { consumed: i64 },
    /// 该预占已被冲正过
    AlreadyReversed { reversal_id: i64 },
    /// 奖励尚未绑定配额
    QuotaNotBound,
}

/// 预占凭证
///
/// 由 `QuotaLedger::reserve` 返回，可用于 `release` 冲正。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationToken {
    /// 对应的预占流水 ID
    pub transaction_id: i64,
    pub reward_id: i64,
    pub amount: i64,
}

impl From<&RewardTransaction> for ReservationToken {
    fn from(trx: &RewardTransaction) -> Self {
        Self {
            transaction_id: trx.id,
            reward_id: trx.reward_id,
            amount: trx.delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_remaining_never_negative() {
        let s = QuotaSnapshot::new(1, 10, 4);
        assert_eq!(s.remaining, 6);
        let s = QuotaSnapshot::new(1, 3, 5);
        assert_eq!(s.remaining, 0);
    }

    #[test]
    fn test_refund_reverses_original_delta() {
        let now = Utc::now();
        let original = RewardTransaction {
            id: 42,
            reward_id: 7,
            delta: 2,
            reason: TransactionReason::Issuance,
            reverses_id: None,
            remark: None,
            created_at: now,
        };
        let refund = NewRewardTransaction::refund_of(&original, "补偿", now);
        assert_eq!(refund.delta, -2);
        assert_eq!(refund.reverses_id, Some(42));
        assert_eq!(refund.reason, TransactionReason::Refund);
        assert_eq!(refund.reward_id, 7);
    }

    #[test]
    fn test_total_capacity_includes_adjustments() {
        let quota = Quota {
            id: 1,
            reward_id: 1,
            capacity: 100,
            extra_capacity: 20,
            created_at: Utc::now(),
        };
        assert_eq!(quota.total_capacity(), 120);
    }
}
