//! 可观测性模块集成测试
//!
//! 未安装 recorder 时所有指标记录函数都不应 panic。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use campaign_shared::observability::metrics::{
        get_handle, record_lifecycle_transitions, record_quota_reservation, record_reconciled,
        record_sweep_failures, record_voucher_issue, record_voucher_redemption,
        set_worker_last_run,
    };

    #[test]
    fn test_record_voucher_issue() {
        record_voucher_issue("success", 0.02);
        record_voucher_issue("quota_exceeded", 0.01);
        record_voucher_issue("code_generation_failed", 0.15);
    }

    #[test]
    fn test_record_voucher_redemption() {
        record_voucher_redemption("success", 0.05);
        record_voucher_redemption("already_redeemed", 0.01);
        record_voucher_redemption("voucher_expired", 0.01);
    }

    #[test]
    fn test_record_sweep_and_reconcile() {
        record_quota_reservation("success");
        record_quota_reservation("exceeded");
        record_lifecycle_transitions("campaign", 3);
        record_lifecycle_transitions("voucher", 0);
        record_sweep_failures(1);
        record_reconciled(2);
        set_worker_last_run("daily_scheduler");
    }

    #[test]
    fn test_metrics_with_edge_cases() {
        record_voucher_issue("", 0.0);
        record_voucher_issue("success", 999.99);
        record_voucher_redemption(&"x".repeat(1000), 0.000001);
        set_worker_last_run("");
    }

    #[test]
    fn test_handle_absent_without_init() {
        assert!(get_handle().is_none());
    }
}

// ============================================================================
// 日志过滤器测试
// ============================================================================

mod tracing_tests {
    use campaign_shared::observability::tracing::build_env_filter;

    #[test]
    fn test_env_filter_accepts_directives() {
        let filter = build_env_filter("campaign_service=debug,sqlx=warn");
        assert!(!filter.to_string().is_empty());
    }
}

// ============================================================================
// 初始化测试
// ============================================================================

mod init_tests {
    use campaign_shared::observability::{ObservabilityConfig, ObservabilityGuard, init};

    #[tokio::test]
    async fn test_init_without_metrics() {
        let config = ObservabilityConfig {
            metrics_enabled: false,
            log_level: "warn".to_string(),
            ..Default::default()
        }
        .with_service_name("campaign-service-test");

        // 同一进程中 tracing 只能初始化一次，重复初始化返回错误而非 panic
        match init(&config).await {
            Ok(guard) => drop(guard),
            Err(e) => assert!(!e.to_string().is_empty()),
        }
        drop(ObservabilityGuard::empty());
    }
}
