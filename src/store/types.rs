//! 存储层领域记录：Post / ReplyTask / ConversationRecord / RateCounter
//!
//! ReplyTask 状态机：Pending → Claimed → {Posted, Failed}；
//! 仅租约过期回收允许 Claimed → Pending，Posted / Failed 为终态。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 帖子类型（分类器输出；error 表示分类失败后的保守默认）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Question,
    Opinion,
    Showcase,
    News,
    Shitpost,
    Other,
    Error,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Opinion => "opinion",
            Self::Showcase => "showcase",
            Self::News => "news",
            Self::Shitpost => "shitpost",
            Self::Other => "other",
            Self::Error => "error",
        }
    }

    /// 宽松解析：未知类型归为 Other
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "question" => Self::Question,
            "opinion" => Self::Opinion,
            "showcase" => Self::Showcase,
            "news" => Self::News,
            "shitpost" => Self::Shitpost,
            "error" => Self::Error,
            _ => Self::Other,
        }
    }
}

impl Default for PostType {
    fn default() -> Self {
        Self::Other
    }
}

/// 入站帖子（由外部采集写入，本系统只负责打分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: String,
    pub text: String,
    pub url: Option<String>,
    /// 是否已打分；false → true 只翻转一次
    pub scored: bool,
    pub should_reply: bool,
    /// 0-100
    pub score: u8,
    pub post_type: PostType,
}

/// 采集侧写入的新帖子；id 已存在时忽略
#[derive(Debug, Clone)]
pub struct NewPost {
    pub id: String,
    pub author: String,
    pub text: String,
    pub url: Option<String>,
}

impl NewPost {
    pub fn new(id: impl Into<String>, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            text: text.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn into_post(self) -> Post {
        Post {
            id: self.id,
            author: self.author,
            text: self.text,
            url: self.url,
            scored: false,
            should_reply: false,
            score: 0,
            post_type: PostType::Other,
        }
    }
}

/// 回复任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 等待到期
    Pending,
    /// 已被某个投递 worker 认领（带租约）
    Claimed,
    /// 已发出（终态）
    Posted,
    /// 投递失败（终态，不重试）
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Posted => "posted",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "posted" => Some(Self::Posted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Posted | Self::Failed)
    }
}

/// 定时回复任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTask {
    pub id: String,
    pub post_id: String,
    pub author: String,
    pub text: String,
    pub status: TaskStatus,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl ReplyTask {
    pub fn new(
        post_id: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("reply_{}", uuid::Uuid::new_v4()),
            post_id: post_id.into(),
            author: author.into(),
            text: text.into(),
            status: TaskStatus::Pending,
            scheduled_for,
            created_at,
            posted_at: None,
            claimed_by: None,
            lease_expires_at: None,
            failure_reason: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_for <= now
    }

    /// 任务已认领且租约已过期
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Claimed
            && self.lease_expires_at.map(|t| t <= now).unwrap_or(true)
    }
}

/// 与某作者的一条历史互动（仅在成功发出后写入，不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub author: String,
    pub post_id: String,
    pub our_reply: String,
    pub created_at: DateTime<Utc>,
}

/// 全局回复计数（单例）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateCounter {
    pub replies_today: u32,
    pub last_reply_time: Option<DateTime<Utc>>,
}

impl RateCounter {
    /// 当天（UTC）已回复数；跨天后视为 0
    pub fn replies_on(&self, now: DateTime<Utc>) -> u32 {
        match self.last_reply_time {
            Some(last) if last.date_naive() == now.date_naive() => self.replies_today,
            _ => 0,
        }
    }

    /// 计数 +1，跨天从 1 重新计数
    pub fn incremented(&self, now: DateTime<Utc>) -> Self {
        Self {
            replies_today: self.replies_on(now) + 1,
            last_reply_time: Some(now),
        }
    }
}
