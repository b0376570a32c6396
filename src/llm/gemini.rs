//! Gemini 客户端（走 Google 的 OpenAI 兼容端点）
//!
//! - Base URL: https://generativelanguage.googleapis.com/v1beta/openai
//! - 模型: gemini-2.0-flash（打分、生成、安全审查共用）

use std::time::Duration;

use crate::llm::OpenAiClient;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const GEMINI_FLASH: &str = "gemini-2.0-flash";

/// 创建 Gemini 客户端；model 为空时使用 gemini-2.0-flash
pub fn create_gemini_client(api_key: &str, model: Option<&str>, timeout: Duration) -> OpenAiClient {
    let model = model.unwrap_or(GEMINI_FLASH);
    OpenAiClient::new(Some(GEMINI_BASE_URL), model, api_key).with_timeout(timeout)
}
