use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;

use crate::error::Result;

/// 验证码存储
///
/// 归短信/外部身份系统所有，本服务只在清理任务中调用其过期清理钩子。
/// 这里定义接口并提供内存实现（单机部署与测试用）。
#[async_trait]
pub trait VerificationCodeStore: Send + Sync {
    /// 存储验证码
    async fn store_code(&self, target: &str, code: &str, ttl: Duration) -> Result<()>;

    /// 校验验证码（命中即消费）
    async fn verify_code(&self, target: &str, code: &str) -> Result<bool>;

    /// 清理过期验证码，返回清理数量
    async fn cleanup_expired(&self) -> Result<u64>;
}

/// 生成 6 位数字验证码
pub fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(100_000..=999_999);
    code.to_string()
}

#[derive(Debug, Clone)]
struct StoredCode {
    code: String,
    expires_at: DateTime<Utc>,
}

/// 内存验证码存储（DashMap，按目标号码/标识索引）
#[derive(Default)]
pub struct MemoryVerificationCodeStore {
    codes: DashMap<String, StoredCode>,
}

impl MemoryVerificationCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl VerificationCodeStore for MemoryVerificationCodeStore {
    async fn store_code(&self, target: &str, code: &str, ttl: Duration) -> Result<()> {
        self.codes.insert(
            target.to_string(),
            StoredCode {
                code: code.to_string(),
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn verify_code(&self, target: &str, code: &str) -> Result<bool> {
        let matched = match self.codes.get(target) {
            Some(entry) => entry.code == code && entry.expires_at > Utc::now(),
            None => false,
        };

        if matched {
            self.codes.remove(target);
        }

        Ok(matched)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let before = self.codes.len();
        self.codes.retain(|_, stored| stored.expires_at > now);
        Ok((before - self.codes.len()) as u64)
    }
}
