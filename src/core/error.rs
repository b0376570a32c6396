//! 统一错误类型
//!
//! 各层各自定义 thiserror 枚举，在这里汇总；周期任务返回 AgentError，由编排层记录后吞掉。

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 装配阶段缺少配置或凭据
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 后台周期任务 panic 或被取消
    #[error("Background task failed: {0}")]
    BackgroundTask(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_source_detail() {
        let store: AgentError = StoreError::TaskNotFound("reply_1".to_string()).into();
        assert!(store.to_string().contains("reply_1"));

        let config: AgentError = ConfigError::MissingSecret("GEMINI_API_KEY".to_string()).into();
        assert!(config.to_string().starts_with("Config error:"));
        assert!(config.to_string().contains("GEMINI_API_KEY"));
    }
}
