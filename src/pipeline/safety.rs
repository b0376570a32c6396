//! SafetyReviewer：候选回复的合规审查
//!
//! 审查调用或解析失败一律视为不通过（reason = "review failed"）。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::pipeline::prompts::safety_prompt;
use crate::pipeline::schema::{parse_safety, SafetyVerdict};

pub struct SafetyReviewer {
    llm: Arc<dyn LlmClient>,
}

impl SafetyReviewer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn review(&self, candidate: &str) -> SafetyVerdict {
        let output = match self.llm.complete_prompt(&safety_prompt(candidate)).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "safety review call failed");
                return SafetyVerdict::review_failed();
            }
        };
        parse_safety(&output).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "safety review output rejected");
            SafetyVerdict::review_failed()
        })
    }
}
