//! 结构化输出的严格校验
//!
//! 模型输出先剥掉 Markdown 代码块等包裹，再按固定 schema 反序列化并校验取值范围。
//! 校验失败由调用方换成各自的保守默认值（Verdict::conservative / SafetyVerdict::review_failed）。
//! 同一 schema 由 schemars 生成 JSON Schema，拼进指令 prompt。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::PostType;

/// 结构化输出校验失败
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("no JSON object in model output: {0}")]
    NoJsonObject(String),

    #[error("JSON does not match schema: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engagement_score out of range: {0}")]
    ScoreOutOfRange(f64),
}

/// 分类结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub should_reply: bool,
    /// 0-100
    pub score: u8,
    pub post_type: PostType,
}

impl Verdict {
    /// 不确定时一律跳过：{false, 0, error}
    pub fn conservative() -> Self {
        Self {
            should_reply: false,
            score: 0,
            post_type: PostType::Error,
        }
    }

    pub fn is_accepted(&self, min_score: u8) -> bool {
        self.should_reply && self.score >= min_score
    }
}

/// 安全审查结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn review_failed() -> Self {
        Self {
            safe: false,
            reason: Some("review failed".to_string()),
        }
    }

    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or("unspecified")
    }
}

/// 分类器期望的 JSON 输出
#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct VerdictFormat {
    /// true if a reply would be relevant and valuable
    should_reply: bool,
    /// 0-100, how valuable a reply would be; above 70 is high value
    engagement_score: f64,
    /// one of: question, opinion, showcase, news, shitpost, other
    #[serde(default)]
    tweet_type: String,
}

/// 安全审查期望的 JSON 输出
#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct SafetyFormat {
    /// true if the reply is safe, non-spammy and human-like
    safe: bool,
    /// short reason when not safe
    #[serde(default)]
    reason: Option<String>,
}

pub fn verdict_schema_json() -> String {
    let schema = schema_for!(VerdictFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn safety_schema_json() -> String {
    let schema = schema_for!(SafetyFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 从模型输出中取出 JSON 对象（```json ... ``` 或首个 '{' 到最后一个 '}'）
pub fn extract_json_object(output: &str) -> Result<&str, SchemaError> {
    let trimmed = output.trim();
    let body = if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.find("```").map(|end| &rest[..end]).unwrap_or(rest)
    } else {
        trimmed
    };

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&body[start..=end]),
        _ => Err(SchemaError::NoJsonObject(truncate(trimmed, 120))),
    }
}

pub fn parse_verdict(output: &str) -> Result<Verdict, SchemaError> {
    let raw: VerdictFormat = serde_json::from_str(extract_json_object(output)?)?;
    let score = raw.engagement_score;
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(SchemaError::ScoreOutOfRange(score));
    }
    // 向下取整：门槛是整数，floor(x) >= min 当且仅当 x >= min
    Ok(Verdict {
        should_reply: raw.should_reply,
        score: score.floor() as u8,
        post_type: PostType::parse_lenient(&raw.tweet_type),
    })
}

pub fn parse_safety(output: &str) -> Result<SafetyVerdict, SchemaError> {
    let raw: SafetyFormat = serde_json::from_str(extract_json_object(output)?)?;
    let reason = raw.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    Ok(SafetyVerdict {
        safe: raw.safe,
        reason,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        s.chars().take(max_chars).collect::<String>() + "..."
    } else {
        s.to_string()
    }
}
