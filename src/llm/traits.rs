//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Gemini / 脚本化 Mock）实现 LlmClient：单次非流式补全。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 补全调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 单条 user prompt 的便捷入口
    async fn complete_prompt(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete(&[Message::user(prompt)]).await
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
