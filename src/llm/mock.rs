//! 脚本化 Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置的回复或错误；脚本耗尽后返回 Request 错误。同时记录收到的 prompt，
//! 便于断言重写提示中是否带上了拒绝原因。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role, TokenUsage};

/// Mock 客户端：按脚本逐条应答
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    usage: TokenUsage,
    /// 每次成功应答计入的 (prompt, completion) token
    per_call: (u64, u64),
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条成功回复
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// 追加一次失败
    pub fn fail(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    /// 每次成功应答累计的 token 数
    pub fn with_usage_per_call(mut self, prompt: u64, completion: u64) -> Self {
        self.per_call = (prompt, completion);
        self
    }

    fn push(&self, item: Result<String, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    /// 已收到的 prompt（每次调用取最后一条 user 消息）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(last_user);
        }

        let result = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(LlmError::Request("mock script exhausted".to_string())));
        if result.is_ok() {
            self.usage.add(self.per_call.0, self.per_call.1);
        }
        result
    }
}
