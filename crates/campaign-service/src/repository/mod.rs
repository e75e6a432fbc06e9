//! 数据仓储层
//!
//! 提供所有实体的数据访问接口，封装存储细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行 PostgreSQL 访问，需要原子性的操作在单个事务内完成
//! - 定义 trait 接口以支持 mock 测试和内存实现

mod campaign_repo;
mod memory;
mod point_history_repo;
mod quota_repo;
mod reward_repo;
mod traits;
mod transaction_repo;
mod voucher_code_repo;
mod voucher_repo;

pub use campaign_repo::CampaignRepository;
pub use memory::MemoryStore;
pub use point_history_repo::PointHistoryRepository;
pub use quota_repo::QuotaRepository;
pub use reward_repo::RewardRepository;
pub use traits::*;
pub use transaction_repo::RewardTransactionRepository;
pub use voucher_code_repo::VoucherCodeRepository;
pub use voucher_repo::VoucherRepository;

use std::sync::Arc;

use sqlx::PgPool;

/// 服务层所需的全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepositoryTrait>,
    pub rewards: Arc<dyn RewardRepositoryTrait>,
    pub quotas: Arc<dyn QuotaRepositoryTrait>,
    pub transactions: Arc<dyn RewardTransactionRepositoryTrait>,
    pub vouchers: Arc<dyn VoucherRepositoryTrait>,
    pub codes: Arc<dyn VoucherCodeRepositoryTrait>,
    pub point_history: Arc<dyn PointHistoryRecorder>,
}

impl Repositories {
    /// PostgreSQL 实现
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            campaigns: Arc::new(CampaignRepository::new(pool.clone())),
            rewards: Arc::new(RewardRepository::new(pool.clone())),
            quotas: Arc::new(QuotaRepository::new(pool.clone())),
            transactions: Arc::new(RewardTransactionRepository::new(pool.clone())),
            vouchers: Arc::new(VoucherRepository::new(pool.clone())),
            codes: Arc::new(VoucherCodeRepository::new(pool.clone())),
            point_history: Arc::new(PointHistoryRepository::new(pool)),
        }
    }

    /// 内存实现，所有仓储共享同一个存储
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            campaigns: store.clone(),
            rewards: store.clone(),
            quotas: store.clone(),
            transactions: store.clone(),
            vouchers: store.clone(),
            codes: store.clone(),
            point_history: store,
        }
    }
}
