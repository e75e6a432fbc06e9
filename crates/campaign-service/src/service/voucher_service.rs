//! 券服务
//!
//! 发券采用两阶段 saga：
//!
//! 1. 预占配额（失败直接返回，无任何副作用）
//! 2. 写入 Pending 券
//! 3. 签发券码（失败时退还预占并删除 Pending 券）
//! 4. 券置为 Active 并回填券码
//!
//! 每一笔预占要么对应一张可用的券，要么被显式退还；
//! 补偿本身失败时留下的孤儿预占由流水对账回收。
//!
//! 核销在存储层一次性完成“检查已核销标记 + 置位 + 券状态变更”，
//! 重复提交只会得到 `AlreadyRedeemed`。

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use campaign_shared::observability::metrics;

use super::code_issuer::VoucherCodeIssuer;
use super::dto::IssueVoucherRequest;
use super::quota_ledger::QuotaLedger;
use super::reward_service::RewardService;
use crate::clock::Clock;
use crate::error::{CampaignError, Result};
use crate::models::{
    CampaignStatus, NewVoucher, PointHistoryEntry, RedeemOutcome, ReservationToken, Voucher,
    VoucherInsert, VoucherStatus,
};
use crate::repository::{PointHistoryRecorder, VoucherCodeRepositoryTrait, VoucherRepositoryTrait};

pub struct VoucherService {
    reward_service: Arc<RewardService>,
    ledger: Arc<QuotaLedger>,
    code_issuer: Arc<VoucherCodeIssuer>,
    voucher_repo: Arc<dyn VoucherRepositoryTrait>,
    code_repo: Arc<dyn VoucherCodeRepositoryTrait>,
    point_history: Arc<dyn PointHistoryRecorder>,
    clock: Arc<dyn Clock>,
}

impl VoucherService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reward_service: Arc<RewardService>,
        ledger: Arc<QuotaLedger>,
        code_issuer: Arc<VoucherCodeIssuer>,
        voucher_repo: Arc<dyn VoucherRepositoryTrait>,
        code_repo: Arc<dyn VoucherCodeRepositoryTrait>,
        point_history: Arc<dyn PointHistoryRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reward_service,
            ledger,
            code_issuer,
            voucher_repo,
            code_repo,
            point_history,
            clock,
        }
    }

    /// 发券
    #[instrument(skip(self), fields(reward_id = request.reward_id, user_id = %request.user_id))]
    pub async fn issue_voucher(&self, request: IssueVoucherRequest) -> Result<Voucher> {
        let start = Instant::now();
        let result = self.execute_issue(&request).await;

        let status = match &result {
            Ok(_) => "success".to_string(),
            Err(e) => e.error_code().to_ascii_lowercase(),
        };
        metrics::record_voucher_issue(&status, start.elapsed().as_secs_f64());

        result
    }

    async fn execute_issue(&self, request: &IssueVoucherRequest) -> Result<Voucher> {
        request.validate()?;

        // 1. 幂等检查
        if let Some(existing) = self.check_idempotency(request).await? {
            debug!(voucher_id = existing.id, "幂等请求，返回已签发的券");
            return Ok(existing);
        }

        // 2. 奖励必须处于可发券状态
        let (reward, campaign) = self.reward_service.resolve_issuable(request.reward_id).await?;

        // 3. 预占配额
        let token = self.ledger.reserve(reward.id, 1).await?;

        // 4. 写入 Pending 券
        let now = self.clock.now();
        let inserted = self
            .voucher_repo
            .create_voucher(&NewVoucher {
                reward_id: reward.id,
                campaign_id: campaign.id,
                user_id: request.user_id.clone(),
                reservation_id: token.transaction_id,
                idempotency_key: request.idempotency_key.clone(),
                created_at: now,
            })
            .await;

        let mut voucher = match inserted {
            Ok(VoucherInsert::Created(voucher)) => voucher,
            Ok(VoucherInsert::DuplicateKey(existing)) => {
                // 并发的同键请求已先落库，退还本次预占
                info!(voucher_id = existing.id, "幂等键冲突，退还本次预占");
                self.release_quietly(&token).await;
                if existing.reward_id != request.reward_id {
                    return Err(key_used_by_other_reward(
                        request.idempotency_key.as_deref().unwrap_or_default(),
                        existing.reward_id,
                    ));
                }
                return Ok(existing);
            }
            Err(e) => {
                error!(error = %e, "写入券失败，退还预占");
                self.release_quietly(&token).await;
                return Err(e);
            }
        };

        // 5. 签发券码
        let code = match self.code_issuer.issue(voucher.id).await {
            Ok(code) => code,
            Err(e) => {
                warn!(voucher_id = voucher.id, error = %e, "券码签发失败，执行补偿");
                self.compensate(&token, voucher.id).await;
                return Err(e);
            }
        };

        // 6. 激活
        let activated_at = self.clock.now();
        match self
            .voucher_repo
            .activate_voucher(voucher.id, &code.code, activated_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // 激活前券已被巡检置为过期
                warn!(voucher_id = voucher.id, "券在激活前状态已变更");
                if let Err(e) = self.code_repo.delete_code_by_voucher(voucher.id).await {
                    error!(voucher_id = voucher.id, error = %e, "清理券码失败");
                }
                return Err(CampaignError::ConcurrencyConflict);
            }
            Err(e) => {
                error!(voucher_id = voucher.id, error = %e, "激活券失败，执行补偿");
                self.compensate(&token, voucher.id).await;
                return Err(e);
            }
        }

        voucher.status = VoucherStatus::Active;
        voucher.code = Some(code.code);
        voucher.updated_at = activated_at;

        info!(voucher_id = voucher.id, "发券成功");
        Ok(voucher)
    }

    /// 幂等检查
    ///
    /// 同一幂等键只能用于同一奖励
    async fn check_idempotency(&self, request: &IssueVoucherRequest) -> Result<Option<Voucher>> {
        let Some(key) = request.idempotency_key.as_deref() else {
            return Ok(None);
        };

        match self.voucher_repo.get_voucher_by_idempotency_key(key).await? {
            Some(existing) if existing.reward_id != request.reward_id => {
                Err(key_used_by_other_reward(key, existing.reward_id))
            }
            other => Ok(other),
        }
    }

    /// 补偿：退还预占并删除 Pending 券
    async fn compensate(&self, token: &ReservationToken, voucher_id: i64) {
        self.release_quietly(token).await;

        match self.voucher_repo.delete_pending_voucher(voucher_id).await {
            Ok(true) => debug!(voucher_id, "已删除 Pending 券"),
            Ok(false) => warn!(voucher_id, "待删除的券已不处于 Pending 状态"),
            Err(e) => error!(voucher_id, error = %e, "删除 Pending 券失败"),
        }
    }

    /// 退还预占，失败只记录（由对账兜底）
    async fn release_quietly(&self, token: &ReservationToken) {
        if let Err(e) = self.ledger.release(token).await {
            error!(
                transaction_id = token.transaction_id,
                reward_id = token.reward_id,
                error = %e,
                "退还预占失败，等待流水对账回收"
            );
        }
    }

    /// 核销
    #[instrument(skip(self))]
    pub async fn redeem(&self, code: &str) -> Result<Voucher> {
        let start = Instant::now();
        let result = self.execute_redeem(code).await;

        let status = match &result {
            Ok(_) => "success".to_string(),
            Err(e) => e.error_code().to_ascii_lowercase(),
        };
        metrics::record_voucher_redemption(&status, start.elapsed().as_secs_f64());

        result
    }

    async fn execute_redeem(&self, code: &str) -> Result<Voucher> {
        let voucher_code = self
            .code_repo
            .get_by_code(code)
            .await?
            .ok_or_else(|| CampaignError::VoucherCodeNotFound(code.to_string()))?;
        if voucher_code.redeemed {
            return Err(CampaignError::AlreadyRedeemed(code.to_string()));
        }

        let voucher = self
            .voucher_repo
            .get_voucher(voucher_code.voucher_id)
            .await?
            .ok_or_else(|| CampaignError::VoucherCodeNotFound(code.to_string()))?;

        // 活动已结束但巡检尚未执行时同样拒绝
        if self.reward_service.campaign_status(voucher.campaign_id).await?
            == CampaignStatus::Expired
        {
            return Err(CampaignError::VoucherExpired(code.to_string()));
        }

        let now = self.clock.now();
        let redeemed = match self.code_repo.redeem_code(code, now).await? {
            RedeemOutcome::Redeemed(voucher) => voucher,
            RedeemOutcome::NotFound => {
                return Err(CampaignError::VoucherCodeNotFound(code.to_string()));
            }
            RedeemOutcome::AlreadyRedeemed => {
                return Err(CampaignError::AlreadyRedeemed(code.to_string()));
            }
            RedeemOutcome::VoucherExpired => {
                return Err(CampaignError::VoucherExpired(code.to_string()));
            }
            RedeemOutcome::NotRedeemable(status) => {
                return Err(CampaignError::VoucherNotRedeemable {
                    code: code.to_string(),
                    status,
                });
            }
        };

        info!(voucher_id = redeemed.id, user_id = %redeemed.user_id, "核销成功");

        // 核销已提交，外部记录失败不影响结果
        let entry = PointHistoryEntry::redeemed(&redeemed, now);
        if let Err(e) = self.point_history.record(&entry).await {
            error!(voucher_id = redeemed.id, error = %e, "记录积分历史失败");
        }

        Ok(redeemed)
    }

    pub async fn get_voucher(&self, voucher_id: i64) -> Result<Voucher> {
        self.voucher_repo
            .get_voucher(voucher_id)
            .await?
            .ok_or(CampaignError::VoucherNotFound(voucher_id))
    }

    pub async fn list_user_vouchers(&self, user_id: &str) -> Result<Vec<Voucher>> {
        self.voucher_repo.list_vouchers_by_user(user_id).await
    }
}

fn key_used_by_other_reward(key: &str, reward_id: i64) -> CampaignError {
    CampaignError::Validation(format!(
        "幂等键已用于其他奖励: key={}, reward_id={}",
        key, reward_id
    ))
}
