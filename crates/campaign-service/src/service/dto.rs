//! 服务层数据传输对象
//!
//! 定义服务层请求参数与批处理报告，与内部领域模型解耦

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CampaignError, Result};
use crate::models::QuotaSnapshot;

/// 创建活动请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl CreateCampaignRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CampaignError::Validation("活动名称不能为空".to_string()));
        }
        if self.end_at <= self.start_at {
            return Err(CampaignError::Validation(
                "活动结束时间必须晚于开始时间".to_string(),
            ));
        }
        Ok(())
    }
}

/// 创建奖励请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRewardRequest {
    pub campaign_id: i64,
    pub name: String,
    pub quota_capacity: i64,
    #[serde(default)]
    pub tags: Vec<i64>,
}

impl CreateRewardRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CampaignError::Validation("奖励名称不能为空".to_string()));
        }
        if self.quota_capacity < 0 {
            return Err(CampaignError::Validation(format!(
                "配额容量不能为负数: {}",
                self.quota_capacity
            )));
        }
        Ok(())
    }
}

/// 发券请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueVoucherRequest {
    pub reward_id: i64,
    pub user_id: String,
    /// 幂等键，携带时重复请求返回同一张券
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl IssueVoucherRequest {
    pub fn new(reward_id: i64, user_id: impl Into<String>) -> Self {
        Self {
            reward_id,
            user_id: user_id.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(CampaignError::Validation("用户 ID 不能为空".to_string()));
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(CampaignError::Validation("幂等键不能为空字符串".to_string()));
            }
        }
        Ok(())
    }
}

/// 巡检涉及的实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Campaign,
    Reward,
    Voucher,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::Reward => "reward",
            Self::Voucher => "voucher",
        }
    }
}

/// 单个实体的状态变化 (entity, oldStatus, newStatus)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub entity: EntityKind,
    pub entity_id: i64,
    pub old_status: &'static str,
    pub new_status: &'static str,
}

/// 单个实体处理失败
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepFailure {
    pub entity: EntityKind,
    pub entity_id: i64,
    pub error: String,
}

/// 巡检报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub changes: Vec<StatusChange>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    /// 本次巡检是否没有任何失败
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn count(&self, entity: EntityKind) -> usize {
        self.changes.iter().filter(|c| c.entity == entity).count()
    }
}

/// 流水对账报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// 被冲正的孤儿预占流水 ID
    pub refunded: Vec<i64>,
    /// 已消耗量超过容量的配额（仅告警，不自动修正）
    pub over_capacity: Vec<QuotaSnapshot>,
    pub failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_create_campaign_request_validation() {
        let now = Utc::now();
        let ok = CreateCampaignRequest {
            name: "春节活动".to_string(),
            start_at: now,
            end_at: now + Duration::days(7),
        };
        assert!(ok.validate().is_ok());

        let inverted = CreateCampaignRequest {
            end_at: now - Duration::days(1),
            ..ok.clone()
        };
        assert!(matches!(
            inverted.validate(),
            Err(CampaignError::Validation(_))
        ));

        let unnamed = CreateCampaignRequest {
            name: "  ".to_string(),
            ..ok
        };
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_create_reward_request_rejects_negative_capacity() {
        let request = CreateRewardRequest {
            campaign_id: 1,
            name: "九折券".to_string(),
            quota_capacity: -1,
            tags: vec![],
        };
        assert!(request.validate().is_err());

        let zero = CreateRewardRequest {
            quota_capacity: 0,
            ..request
        };
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn test_issue_voucher_request_builder() {
        let request = IssueVoucherRequest::new(3, "user-1").with_idempotency_key("order-9");
        assert_eq!(request.idempotency_key.as_deref(), Some("order-9"));
        assert!(request.validate().is_ok());

        assert!(IssueVoucherRequest::new(3, "").validate().is_err());
        assert!(
            IssueVoucherRequest::new(3, "user-1")
                .with_idempotency_key(" ")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_sweep_report_counts() {
        let report = SweepReport {
            changes: vec![
                StatusChange {
                    entity: EntityKind::Campaign,
                    entity_id: 1,
                    old_status: "active",
                    new_status: "expired",
                },
                StatusChange {
                    entity: EntityKind::Voucher,
                    entity_id: 7,
                    old_status: "active",
                    new_status: "expired",
                },
            ],
            failures: vec![],
        };
        assert!(report.is_clean());
        assert_eq!(report.count(EntityKind::Campaign), 1);
        assert_eq!(report.count(EntityKind::Reward), 0);
    }
}
