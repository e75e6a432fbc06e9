//! 券码签发
//!
//! 生成候选券码并通过存储层的 test-and-set 占位，冲突时换新码重试。

use std::sync::Arc;

use rand::Rng;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::error::{CampaignError, Result};
use crate::models::VoucherCode;
use crate::repository::VoucherCodeRepositoryTrait;

/// 券码字符集（去除易混淆的 0/O、1/I）
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// 券码生成器
#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 随机券码生成器
#[derive(Debug, Clone)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self::new(10)
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

pub struct VoucherCodeIssuer {
    code_repo: Arc<dyn VoucherCodeRepositoryTrait>,
    generator: Arc<dyn CodeGenerator>,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl VoucherCodeIssuer {
    pub fn new(
        code_repo: Arc<dyn VoucherCodeRepositoryTrait>,
        generator: Arc<dyn CodeGenerator>,
        max_attempts: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            code_repo,
            generator,
            max_attempts: max_attempts.max(1),
            clock,
        }
    }

    /// 为券签发唯一券码
    ///
    /// 最多尝试 `max_attempts` 个候选码，全部冲突返回 `CodeGenerationFailed`
    #[instrument(skip(self))]
    pub async fn issue(&self, voucher_id: i64) -> Result<VoucherCode> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generator.generate();
            match self
                .code_repo
                .try_insert_code(voucher_id, &candidate, self.clock.now())
                .await?
            {
                Some(code) => {
                    if attempt > 1 {
                        info!(attempt, "券码在重试后签发成功");
                    }
                    return Ok(code);
                }
                None => {
                    warn!(attempt, max_attempts = self.max_attempts, "券码冲突，重新生成");
                }
            }
        }

        Err(CampaignError::CodeGenerationFailed {
            voucher_id,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::repository::MemoryStore;
    use std::collections::HashSet;

    #[test]
    fn test_random_code_format() {
        let generator = RandomCodeGenerator::new(10);
        let code = generator.generate();
        assert_eq!(code.len(), 10);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_random_codes_are_varied() {
        let generator = RandomCodeGenerator::default();
        let codes: HashSet<String> = (0..200).map(|_| generator.generate()).collect();
        assert_eq!(codes.len(), 200);
    }

    #[tokio::test]
    async fn test_issue_retries_on_collision() {
        let store = Arc::new(MemoryStore::new());
        store
            .try_insert_code(1, "TAKEN00000", chrono::Utc::now())
            .await
            .unwrap();

        let mut generator = MockCodeGenerator::new();
        let mut seq = mockall::Sequence::new();
        generator
            .expect_generate()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| "TAKEN00000".to_string());
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| "FRESH00000".to_string());

        let issuer = VoucherCodeIssuer::new(store, Arc::new(generator), 5, Arc::new(SystemClock));
        let code = issuer.issue(2).await.unwrap();
        assert_eq!(code.code, "FRESH00000");
        assert_eq!(code.voucher_id, 2);
        assert!(!code.redeemed);
    }

    #[tokio::test]
    async fn test_issue_gives_up_after_max_attempts() {
        let store = Arc::new(MemoryStore::new());
        store
            .try_insert_code(1, "SAMESAME00", chrono::Utc::now())
            .await
            .unwrap();

        let mut generator = MockCodeGenerator::new();
        generator
            .expect_generate()
            .times(5)
            .returning(|| "SAMESAME00".to_string());

        let issuer = VoucherCodeIssuer::new(store, Arc::new(generator), 5, Arc::new(SystemClock));
        let err = issuer.issue(2).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::CodeGenerationFailed {
                voucher_id: 2,
                attempts: 5
            }
        ));
        assert!(err.is_retryable());
    }
}
