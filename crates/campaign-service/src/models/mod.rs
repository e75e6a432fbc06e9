//! 活动服务领域模型
//!
//! 实体之间通过 ID 引用：
//! Campaign 独占 Reward；Reward 与 Quota 一对一；Voucher 引用 Reward；VoucherCode 归属 Voucher。

pub mod campaign;
pub mod enums;
pub mod quota;
pub mod voucher;

pub use campaign::{Campaign, CampaignDetail, NewCampaign, NewReward, Reward};
pub use enums::{CampaignStatus, TransactionReason, VoucherStatus};
pub use quota::{
    AppendOutcome, NewRewardTransaction, Quota, QuotaAdjustment, QuotaSnapshot,
    ReservationToken, RewardTransaction,
};
pub use voucher::{
    NewVoucher, PointHistoryEntry, RedeemOutcome, Voucher, VoucherCode, VoucherInsert,
};
