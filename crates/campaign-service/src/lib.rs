//! 营销活动核心服务
//!
//! 管理活动、奖励、配额与券的完整生命周期。
//!
//! ## 核心功能
//!
//! - **配额账本**：预占与退还都以追加流水的方式记录，已消耗量始终等于流水之和
//! - **发券**：预占配额、写入券、签发券码，任一步失败都会补偿
//! - **核销**：券码只能被核销一次，并发重复提交只有一个成功
//! - **生命周期**：每日巡检按时间推进活动、奖励与券的状态
//!
//! ## 模块结构
//!
//! - `models`: 领域实体
//! - `repository`: 仓储 trait 及 PostgreSQL / 内存实现
//! - `service`: 业务服务
//! - `worker`: 每日调度
//! - `clock`: 时钟抽象
//! - `error`: 错误类型定义

pub mod clock;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;
pub mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CampaignError, Result};
pub use models::{
    Campaign, CampaignDetail, CampaignStatus, Quota, QuotaSnapshot, ReservationToken, Reward,
    RewardTransaction, Voucher, VoucherCode, VoucherStatus,
};
pub use repository::{MemoryStore, Repositories};
pub use service::{CampaignServices, ServiceSettings};
pub use worker::DailyScheduler;
