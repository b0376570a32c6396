//! Prompt 模板：分类、人设生成、重写、安全审查
//!
//! 只负责拼字符串；输出格式的校验在 schema 模块。

use crate::pipeline::schema::{safety_schema_json, verdict_schema_json};
use crate::store::ConversationRecord;

/// 回复人设
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub max_chars: usize,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Vintor".to_string(),
            max_chars: 240,
        }
    }
}

pub fn classifier_prompt(text: &str, author: &str) -> String {
    format!(
        r#"Analyze this post from a user for a potential reply.

Post: "{text}"
User: @{author}

Criteria:
1. should_reply: true if the post is relevant to startups, AI, coding, SaaS, indie hacking, or is an interesting question/opinion. False if it's spam, politics, hate speech, or low quality.
2. engagement_score: 0-100 score of how valuable a reply would be. >70 is high value.
3. tweet_type: "question", "opinion", "showcase", "news", "shitpost", "other".

Return JSON only, matching this schema:
{schema}"#,
        schema = verdict_schema_json()
    )
}

/// 历史互动渲染为 `Us: ...` 行（调用方保证新的在前）
pub fn render_history(history: &[ConversationRecord]) -> String {
    history
        .iter()
        .map(|c| format!("Us: {}", c.our_reply))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn generation_prompt(persona: &Persona, text: &str, author: &str, history: &str) -> String {
    let history = if history.is_empty() { "(none)" } else { history };
    format!(
        r#"You are {name}, a startup founder.
Your Voice: Casual, witty, sharp, non-corporate, human. Lowercase often but not always.

Context:
- User: @{author}
- Post: "{text}"
- Past interactions:
{history}

Task: Write a reply under {max} chars. Be helpful or insightful or funny.
Do NOT act like a bot. Do NOT use hashtags.

Reply:"#,
        name = persona.name,
        max = persona.max_chars,
    )
}

pub fn rewrite_prompt(persona: &Persona, text: &str, author: &str, reason: &str) -> String {
    format!(
        r#"The previous reply was rejected because: "{reason}".

Original Task: Write a casual, witty, human-like reply as {name} to @{author} who said: "{text}".
Constraints: Under {max} chars, no hashtags, no bot behavior.

Rewrite the reply to fit the persona and be safe. Output only the reply."#,
        name = persona.name,
        max = persona.max_chars,
    )
}

pub fn safety_prompt(reply: &str) -> String {
    format!(
        r#"Analyze this reply: "{reply}"

Is it:
1. Safe? (No hate speech, toxicity)
2. Non-spammy? (Doesn't look like a crypto bot or generic ChatGPT)
3. Human-like?

Return JSON only, matching this schema:
{schema}"#,
        schema = safety_schema_json()
    )
}
