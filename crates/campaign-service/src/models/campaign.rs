//! 活动与奖励实体定义
//!
//! 活动独占其奖励：奖励的生命周期随活动级联。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::CampaignStatus;

/// 活动
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: CampaignStatus,
    /// 人工锁定状态后，巡检不再按时间重算
    pub status_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// 按时间窗口计算的状态（不考虑当前存储值）
    pub fn computed_status(&self, now: DateTime<Utc>) -> CampaignStatus {
        CampaignStatus::at(now, self.start_at, self.end_at)
    }

    /// 生效状态
    ///
    /// 锁定时取存储值；否则取存储值向计算值的单调推进结果。
    pub fn effective_status(&self, now: DateTime<Utc>) -> CampaignStatus {
        if self.status_locked {
            self.status
        } else {
            self.status.advance_to(self.computed_status(now))
        }
    }
}

/// 新建活动参数
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
}

/// 奖励
///
/// 标签以外键形式引用，配额通过 reward_id 一对一绑定。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: i64,
    pub campaign_id: i64,
    pub name: String,
    pub status: CampaignStatus,
    pub status_locked: bool,
    #[sqlx(skip)]
    pub tags: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reward {
    /// 生效状态：未被单独锁定时跟随活动生效状态
    pub fn effective_status(&self, campaign_status: CampaignStatus) -> CampaignStatus {
        if self.status_locked {
            self.status
        } else {
            self.status.advance_to(campaign_status)
        }
    }
}

/// 标签按集合语义保存：排序并去重
pub fn normalize_tags(tags: &[i64]) -> Vec<i64> {
    let mut tags = tags.to_vec();
    tags.sort_unstable();
    tags.dedup();
    tags
}

/// 新建奖励参数，奖励与配额一起创建
#[derive(Debug, Clone)]
pub struct NewReward {
    pub campaign_id: i64,
    pub name: String,
    pub status: CampaignStatus,
    pub tags: Vec<i64>,
    pub quota_capacity: i64,
    pub created_at: DateTime<Utc>,
}

/// 活动详情（含奖励列表）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub rewards: Vec<Reward>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign(start_offset_days: i64, end_offset_days: i64, status: CampaignStatus) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: 1,
            name: "双十一".to_string(),
            start_at: now + Duration::days(start_offset_days),
            end_at: now + Duration::days(end_offset_days),
            status,
            status_locked: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_effective_status_follows_window() {
        let c = campaign(-1, 1, CampaignStatus::Draft);
        assert_eq!(c.effective_status(Utc::now()), CampaignStatus::Active);
    }

    #[test]
    fn test_effective_status_is_monotonic() {
        // 时间窗口被改到未来，也不会回退到草稿
        let c = campaign(3, 5, CampaignStatus::Active);
        assert_eq!(c.effective_status(Utc::now()), CampaignStatus::Active);
    }

    #[test]
    fn test_normalize_tags() {
        assert_eq!(normalize_tags(&[3, 1, 3, 2]), vec![1, 2, 3]);
        assert!(normalize_tags(&[]).is_empty());
    }

    #[test]
    fn test_locked_status_is_kept() {
        let mut c = campaign(-10, -1, CampaignStatus::Active);
        c.status_locked = true;
        assert_eq!(c.effective_status(Utc::now()), CampaignStatus::Active);
        assert_eq!(c.computed_status(Utc::now()), CampaignStatus::Expired);
    }
}
