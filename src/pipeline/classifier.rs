//! Classifier：判断帖子是否值得回复
//!
//! 任何失败（调用错误、超时、输出不合 schema）都降级为 Verdict::conservative()，
//! 不向上传播，保证采集吞吐不被阻塞。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::pipeline::prompts::classifier_prompt;
use crate::pipeline::schema::{parse_verdict, Verdict};

pub struct Classifier {
    llm: Arc<dyn LlmClient>,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, text: &str, author: &str) -> Verdict {
        let output = match self.llm.complete_prompt(&classifier_prompt(text, author)).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(author = %author, error = %e, "classification call failed");
                return Verdict::conservative();
            }
        };

        match parse_verdict(&output) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(author = %author, error = %e, "classification output rejected");
                Verdict::conservative()
            }
        }
    }
}
