//! 活动服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 活动状态
///
/// 同时用于奖励：奖励状态默认跟随所属活动。
/// 变量顺序即生命周期顺序，`Ord` 用于保证状态只进不退。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum CampaignStatus {
    /// 草稿 - 尚未开始
    #[default]
    Draft,
    /// 进行中 - start <= now < end
    Active,
    /// 已结束
    Expired,
}

impl CampaignStatus {
    /// 根据时间窗口计算状态（纯函数）
    pub fn at(now: DateTime<Utc>, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        if now < start_at {
            Self::Draft
        } else if now < end_at {
            Self::Active
        } else {
            Self::Expired
        }
    }

    /// 单调推进：只接受更靠后的状态
    pub fn advance_to(self, target: Self) -> Self {
        self.max(target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

/// 券状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum VoucherStatus {
    /// 待生效 - 已预占配额，券码尚未分配
    #[default]
    Pending,
    /// 可用
    Active,
    /// 已核销（终态）
    Redeemed,
    /// 已过期（终态）
    Expired,
}

impl VoucherStatus {
    /// 巡检时可被置为过期的状态
    pub const EXPIRABLE: [VoucherStatus; 2] = [VoucherStatus::Pending, VoucherStatus::Active];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Redeemed | Self::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Redeemed => "redeemed",
            Self::Expired => "expired",
        }
    }
}

/// 配额流水原因
///
/// 配额已消耗量 = 该奖励全部流水 delta 之和
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TransactionReason {
    /// 发券预占（+）
    Issuance,
    /// 退还（-）- 发券失败补偿或对账回收
    Refund,
    /// 人工调整（±）
    ManualAdjustment,
}

impl TransactionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issuance => "issuance",
            Self::Refund => "refund",
            Self::ManualAdjustment => "manual_adjustment",
        }
    }
}
