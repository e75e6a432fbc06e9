//! 活动服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use thiserror::Error;

use crate::models::{CampaignStatus, VoucherStatus};

/// 活动服务错误类型
#[derive(Debug, Error)]
pub enum CampaignError {
    // === 活动 / 奖励 ===
    #[error("活动不存在: {0}")]
    CampaignNotFound(i64),

    #[error("奖励不存在: {0}")]
    RewardNotFound(i64),

    #[error("奖励当前不可发券: reward_id={reward_id}, status={status:?}")]
    RewardNotActive {
        reward_id: i64,
        status: CampaignStatus,
    },

    // === 配额 ===
    #[error("配额不足: reward_id={reward_id}, capacity={capacity}, consumed={consumed}")]
    QuotaExceeded {
        reward_id: i64,
        capacity: i64,
        consumed: i64,
    },

    #[error("奖励未绑定配额: reward_id={0}")]
    QuotaNotBound(i64),

    #[error("奖励已绑定配额: reward_id={0}")]
    QuotaAlreadyBound(i64),

    // === 券 / 券码 ===
    #[error("券不存在: {0}")]
    VoucherNotFound(i64),

    #[error("券码不存在: {0}")]
    VoucherCodeNotFound(String),

    #[error("券码生成失败: voucher_id={voucher_id}, attempts={attempts}")]
    CodeGenerationFailed { voucher_id: i64, attempts: u32 },

    #[error("券码已核销: {0}")]
    AlreadyRedeemed(String),

    #[error("券已过期: {0}")]
    VoucherExpired(String),

    #[error("券状态不允许核销: code={code}, status={status:?}")]
    VoucherNotRedeemable { code: String, status: VoucherStatus },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 活动服务 Result 类型别名
pub type Result<T> = std::result::Result<T, CampaignError>;

impl CampaignError {
    /// 检查是否为可重试的错误
    ///
    /// 券码生成耗尽属于基础设施层面的瞬时失败，调用方可退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::ConcurrencyConflict | Self::CodeGenerationFailed { .. }
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Internal(_)
                | Self::ConcurrencyConflict
                | Self::CodeGenerationFailed { .. }
        )
    }

    /// 是否为资源不存在
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CampaignNotFound(_)
                | Self::RewardNotFound(_)
                | Self::VoucherNotFound(_)
                | Self::VoucherCodeNotFound(_)
        )
    }

    /// 获取错误码（供接入层转换为响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CampaignNotFound(_) => "CAMPAIGN_NOT_FOUND",
            Self::RewardNotFound(_) => "REWARD_NOT_FOUND",
            Self::RewardNotActive { .. } => "REWARD_NOT_ACTIVE",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::QuotaNotBound(_) => "QUOTA_NOT_BOUND",
            Self::QuotaAlreadyBound(_) => "QUOTA_ALREADY_BOUND",
            Self::VoucherNotFound(_) => "VOUCHER_NOT_FOUND",
            Self::VoucherCodeNotFound(_) => "VOUCHER_CODE_NOT_FOUND",
            Self::CodeGenerationFailed { .. } => "CODE_GENERATION_FAILED",
            Self::AlreadyRedeemed(_) => "ALREADY_REDEEMED",
            Self::VoucherExpired(_) => "VOUCHER_EXPIRED",
            Self::VoucherNotRedeemable { .. } => "VOUCHER_NOT_REDEEMABLE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
