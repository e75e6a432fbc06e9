//! test_utils 模块的集成测试
//!
//! 验证测试工具模块的功能正确性

use std::collections::HashSet;

use campaign_shared::test_utils::*;

#[test]
fn test_database_config_defaults() {
    let config = test_database_config();
    assert!(config.url.starts_with("postgres://"));
    assert_eq!(config.max_connections, 5);
    assert!(config.min_connections <= config.max_connections);
}

#[test]
fn test_user_id_format() {
    let id = test_user_id();
    assert!(id.starts_with("test-user-"));
    // 前缀 + UUID
    assert_eq!(id.len(), "test-user-".len() + 36);
}

#[test]
fn test_unique_suffix_across_threads() {
    let handles: Vec<_> = (0..8)
        .map(|_| std::thread::spawn(|| (0..100).map(|_| unique_suffix()).collect::<Vec<_>>()))
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for suffix in handle.join().unwrap() {
            seen.insert(suffix);
        }
    }
    assert_eq!(seen.len(), 800);
}
