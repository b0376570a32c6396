//! ReplyComposer：人设生成 + 有界安全自纠循环
//!
//! 每轮：生成候选 → SafetyReviewer 审查。
//! - 生成失败：记日志，直接进入下一轮（该轮仍计入预算）
//! - 通过：返回 Approved
//! - 不通过且还有预算：把拒绝原因拼进重写 prompt，继续
//! - 不通过且已是最后一轮：照样返回该候选（AcceptedAfterRejection）
//!
//! 最后一轮生成失败时返回 NoReply，之前被拒绝的候选不会拿来兜底；
//! 安全拒绝本身不会导致 NoReply。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::pipeline::prompts::{generation_prompt, render_history, rewrite_prompt, Persona};
use crate::pipeline::safety::SafetyReviewer;
use crate::store::ConversationRecord;

/// 默认总轮数：首轮 + 一次重写
pub const MAX_ATTEMPTS: usize = 2;

/// 生成结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeOutcome {
    /// 审查通过
    Approved { text: String, attempts: usize },
    /// 最后一轮仍被拒绝，按策略照常接受
    AcceptedAfterRejection {
        text: String,
        reason: String,
        attempts: usize,
    },
    /// 每一轮都生成失败
    NoReply { attempts: usize },
}

impl ComposeOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Approved { text, .. } | Self::AcceptedAfterRejection { text, .. } => Some(text),
            Self::NoReply { .. } => None,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            Self::Approved { attempts, .. }
            | Self::AcceptedAfterRejection { attempts, .. }
            | Self::NoReply { attempts } => *attempts,
        }
    }
}

pub struct ReplyComposer {
    llm: Arc<dyn LlmClient>,
    reviewer: SafetyReviewer,
    persona: Persona,
    max_attempts: usize,
}

impl ReplyComposer {
    pub fn new(llm: Arc<dyn LlmClient>, reviewer: SafetyReviewer) -> Self {
        Self {
            llm,
            reviewer,
            persona: Persona::default(),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    /// 至少 1 轮
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// history：该作者最近的互动，新的在前（最多取 5 条）
    pub async fn compose(
        &self,
        text: &str,
        author: &str,
        history: &[ConversationRecord],
    ) -> ComposeOutcome {
        let history = &history[..history.len().min(5)];
        let mut prompt = generation_prompt(&self.persona, text, author, &render_history(history));
        let mut attempt = 0;

        while attempt < self.max_attempts {
            attempt += 1;

            let candidate = match self.generate(&prompt).await {
                Some(c) => c,
                None => {
                    tracing::warn!(attempt, author = %author, "reply generation failed");
                    continue;
                }
            };

            let review = self.reviewer.review(&candidate).await;
            if review.safe {
                return ComposeOutcome::Approved {
                    text: candidate,
                    attempts: attempt,
                };
            }

            let reason = review.reason_or_default().to_string();
            if attempt == self.max_attempts {
                tracing::info!(
                    attempt,
                    reason = %reason,
                    "safety check failed on final attempt, accepting reply anyway"
                );
                return ComposeOutcome::AcceptedAfterRejection {
                    text: candidate,
                    reason,
                    attempts: attempt,
                };
            }

            tracing::info!(attempt, reason = %reason, candidate = %candidate, "reply rejected, rewriting");
            prompt = rewrite_prompt(&self.persona, text, author, &reason);
        }

        tracing::warn!(attempts = attempt, author = %author, "no reply generated after max attempts");
        ComposeOutcome::NoReply { attempts: attempt }
    }

    /// 生成一条候选；调用失败或内容为空返回 None
    async fn generate(&self, prompt: &str) -> Option<String> {
        match self.llm.complete_prompt(prompt).await {
            Ok(raw) => {
                let candidate = clean_candidate(&raw);
                if candidate.is_empty() {
                    None
                } else {
                    Some(candidate)
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "generation call error");
                None
            }
        }
    }
}

/// 去掉首尾空白与整段包裹的引号
fn clean_candidate(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}
