//! PostgreSQL 连接池
//!
//! 活动、配额流水与券数据共用同一个连接池。配额预占和核销会在事务内持有行锁，
//! 因此获取连接的超时取自配置，连接池耗尽时尽快失败而不是无限排队。

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池并预热最小连接数
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = pool_options(config)
            .min_connections(config.min_connections)
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(min_connections = config.min_connections, "数据库连接池已就绪");
        Ok(Self { pool })
    }

    /// 首次取连接时才建立连接
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = pool_options(config).connect_lazy(&config.url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 启动时确认数据库可用
    pub async fn health_check(&self) -> Result<()> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(1) {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "数据库响应缓慢");
        }
        Ok(())
    }

    /// 等待在途事务结束后关闭
    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
}
