//! 业务服务层
//!
//! - `quota_ledger`: 配额账本，预占与退还
//! - `transaction_log`: 流水查询与对账
//! - `code_issuer`: 券码签发
//! - `reward_service`: 奖励管理
//! - `voucher_service`: 发券与核销
//! - `lifecycle`: 活动生命周期与状态巡检

pub mod code_issuer;
pub mod dto;
pub mod lifecycle;
pub mod quota_ledger;
pub mod reward_service;
pub mod transaction_log;
pub mod voucher_service;

pub use code_issuer::{CodeGenerator, RandomCodeGenerator, VoucherCodeIssuer};
pub use lifecycle::LifecycleController;
pub use quota_ledger::QuotaLedger;
pub use reward_service::RewardService;
pub use transaction_log::RewardTransactionLog;
pub use voucher_service::VoucherService;

use std::sync::Arc;

use campaign_shared::config::AppConfig;

use crate::clock::Clock;
use crate::error::{CampaignError, Result};
use crate::repository::Repositories;

/// 服务层参数
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub code_length: usize,
    pub max_code_attempts: u32,
    /// 孤儿预占的判定宽限期
    pub reservation_grace: chrono::Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            code_length: 10,
            max_code_attempts: 5,
            reservation_grace: chrono::Duration::seconds(300),
        }
    }
}

/// 券码列的最大长度
pub const MAX_CODE_LENGTH: usize = 64;

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = Self {
            code_length: config.voucher.code_length,
            max_code_attempts: config.voucher.max_code_attempts,
            reservation_grace: chrono::Duration::seconds(
                config.scheduler.reservation_grace_secs.max(0),
            ),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.code_length == 0 || self.code_length > MAX_CODE_LENGTH {
            return Err(CampaignError::Validation(format!(
                "券码长度必须在 1..={} 之间: {}",
                MAX_CODE_LENGTH, self.code_length
            )));
        }
        if self.max_code_attempts == 0 {
            return Err(CampaignError::Validation(
                "券码最大尝试次数必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 组装完成的服务集合
#[derive(Clone)]
pub struct CampaignServices {
    pub ledger: Arc<QuotaLedger>,
    pub transaction_log: Arc<RewardTransactionLog>,
    pub rewards: Arc<RewardService>,
    pub vouchers: Arc<VoucherService>,
    pub lifecycle: Arc<LifecycleController>,
}

impl CampaignServices {
    pub fn new(
        repos: &Repositories,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn CodeGenerator>,
        settings: &ServiceSettings,
    ) -> Self {
        let ledger = Arc::new(QuotaLedger::new(
            repos.quotas.clone(),
            repos.transactions.clone(),
            clock.clone(),
        ));
        let transaction_log = Arc::new(RewardTransactionLog::new(
            repos.transactions.clone(),
            repos.vouchers.clone(),
            ledger.clone(),
            settings.reservation_grace,
        ));
        let rewards = Arc::new(RewardService::new(
            repos.campaigns.clone(),
            repos.rewards.clone(),
            ledger.clone(),
            clock.clone(),
        ));
        let code_issuer = Arc::new(VoucherCodeIssuer::new(
            repos.codes.clone(),
            generator,
            settings.max_code_attempts,
            clock.clone(),
        ));
        let vouchers = Arc::new(VoucherService::new(
            rewards.clone(),
            ledger.clone(),
            code_issuer,
            repos.vouchers.clone(),
            repos.codes.clone(),
            repos.point_history.clone(),
            clock.clone(),
        ));
        let lifecycle = Arc::new(LifecycleController::new(
            repos.campaigns.clone(),
            repos.rewards.clone(),
            repos.vouchers.clone(),
            rewards.clone(),
            clock,
        ));

        Self {
            ledger,
            transaction_log,
            rewards,
            vouchers,
            lifecycle,
        }
    }

    /// 使用随机券码生成器组装
    pub fn with_random_codes(
        repos: &Repositories,
        clock: Arc<dyn Clock>,
        settings: &ServiceSettings,
    ) -> Self {
        let generator = Arc::new(RandomCodeGenerator::new(settings.code_length));
        Self::new(repos, clock, generator, settings)
    }
}
