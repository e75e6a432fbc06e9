//! 生命周期巡检集成测试
//!
//! 以可拨动的时钟模拟跨日运行，验证活动、奖励与券的状态推进。

use std::sync::Arc;

use campaign_service::repository::{MemoryStore, Repositories};
use campaign_service::service::dto::{
    CreateCampaignRequest, CreateRewardRequest, EntityKind, IssueVoucherRequest,
};
use campaign_service::service::{CampaignServices, ServiceSettings};
use campaign_service::worker::DailyScheduler;
use campaign_service::{CampaignStatus, Clock, FixedClock, VoucherStatus};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn today() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 0, 0, 0).unwrap()
}

fn setup(now: DateTime<Utc>) -> (Arc<MemoryStore>, Arc<FixedClock>, CampaignServices) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(now));
    let services = CampaignServices::with_random_codes(
        &Repositories::memory(store.clone()),
        clock.clone(),
        &ServiceSettings::default(),
    );
    (store, clock, services)
}

#[tokio::test]
async fn test_draft_campaign_becomes_active_without_voucher_changes() {
    let now = today();
    // 活动在开始前创建
    let (_store, clock, services) = setup(now - Duration::days(3));
    let campaign = services
        .lifecycle
        .create_campaign(CreateCampaignRequest {
            name: "端午促销".to_string(),
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(1),
        })
        .await
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Draft);

    clock.set(now);
    let report = services.lifecycle.sweep(now).await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.count(EntityKind::Campaign), 1);
    assert_eq!(report.count(EntityKind::Voucher), 0);
    let detail = services.lifecycle.get_campaign(campaign.id).await.unwrap();
    assert_eq!(detail.campaign.status, CampaignStatus::Active);
}

#[tokio::test]
async fn test_ended_campaign_expires_its_active_voucher() {
    let now = today();
    let (store, clock, services) = setup(now - Duration::days(2));
    let campaign = services
        .lifecycle
        .create_campaign(CreateCampaignRequest {
            name: "618 预售".to_string(),
            start_at: now - Duration::days(5),
            end_at: now - Duration::days(1),
        })
        .await
        .unwrap();
    let reward = services
        .rewards
        .create_reward(CreateRewardRequest {
            campaign_id: campaign.id,
            name: "定金膨胀券".to_string(),
            quota_capacity: 10,
            tags: vec![7],
        })
        .await
        .unwrap();
    let voucher = services
        .vouchers
        .issue_voucher(IssueVoucherRequest::new(reward.id, "user-1"))
        .await
        .unwrap();
    assert_eq!(voucher.status, VoucherStatus::Active);

    clock.set(now);
    let report = services.lifecycle.sweep(now).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.count(EntityKind::Campaign), 1);
    assert_eq!(report.count(EntityKind::Reward), 1);
    assert_eq!(report.count(EntityKind::Voucher), 1);

    let expired = services.vouchers.get_voucher(voucher.id).await.unwrap();
    assert_eq!(expired.status, VoucherStatus::Expired);
    assert_eq!(expired.expired_at, Some(now));

    let reward = services.rewards.get_reward(reward.id).await.unwrap();
    assert_eq!(reward.status, CampaignStatus::Expired);

    // 过期不退还配额
    let snapshot = services.rewards.reward_quota(reward.id).await.unwrap();
    assert_eq!(snapshot.consumed, 1);
    assert_eq!(store.point_histories().len(), 0);
}

#[tokio::test]
async fn test_sweep_twice_with_same_now_changes_nothing() {
    let now = today();
    let (_store, clock, services) = setup(now - Duration::days(10));
    for (start, end) in [(-8, -1), (-1, 3), (2, 4)] {
        services
            .lifecycle
            .create_campaign(CreateCampaignRequest {
                name: format!("活动{start}"),
                start_at: now + Duration::days(start),
                end_at: now + Duration::days(end),
            })
            .await
            .unwrap();
    }

    clock.set(now);
    let first = services.lifecycle.sweep(now).await.unwrap();
    assert_eq!(first.count(EntityKind::Campaign), 2);

    let second = services.lifecycle.sweep(now).await.unwrap();
    assert!(second.changes.is_empty());
    assert!(second.failures.is_empty());

    let statuses: Vec<CampaignStatus> = services
        .lifecycle
        .list_campaigns()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            CampaignStatus::Expired,
            CampaignStatus::Active,
            CampaignStatus::Draft
        ]
    );
}

#[tokio::test]
async fn test_daily_ticks_walk_campaign_through_lifecycle() {
    let start = today();
    let (_store, clock, services) = setup(start);
    let campaign = services
        .lifecycle
        .create_campaign(CreateCampaignRequest {
            name: "暑期狂欢".to_string(),
            start_at: start + Duration::days(1),
            end_at: start + Duration::days(3),
        })
        .await
        .unwrap();

    let scheduler = DailyScheduler::new(
        services.lifecycle.clone(),
        services.transaction_log.clone(),
        clock.clone(),
        "00:00",
        false,
    )
    .unwrap();

    let mut seen = Vec::new();
    for _ in 0..5 {
        clock.advance(Duration::days(1));
        let summary = scheduler.tick(clock.now()).await;
        assert!(summary.sweep.is_some());
        assert!(summary.reconcile.is_some());
        seen.push(
            services
                .lifecycle
                .get_campaign(campaign.id)
                .await
                .unwrap()
                .campaign
                .status,
        );
    }

    assert_eq!(
        seen,
        vec![
            CampaignStatus::Active,
            CampaignStatus::Active,
            CampaignStatus::Expired,
            CampaignStatus::Expired,
            CampaignStatus::Expired,
        ]
    );
}

#[tokio::test]
async fn test_manual_override_survives_sweep() {
    let now = today();
    let (_store, _clock, services) = setup(now);
    let campaign = services
        .lifecycle
        .create_campaign(CreateCampaignRequest {
            name: "长期会员权益".to_string(),
            start_at: now - Duration::days(30),
            end_at: now + Duration::days(1),
        })
        .await
        .unwrap();

    services
        .lifecycle
        .override_status(campaign.id, CampaignStatus::Expired)
        .await
        .unwrap();

    let report = services.lifecycle.sweep(now).await.unwrap();
    assert!(report.changes.iter().all(|c| c.entity != EntityKind::Campaign));
    let detail = services.lifecycle.get_campaign(campaign.id).await.unwrap();
    assert_eq!(detail.campaign.status, CampaignStatus::Expired);
    assert!(detail.campaign.status_locked);
}
