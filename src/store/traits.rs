//! TaskStore 抽象
//!
//! 所有状态变更都是条件更新：打分只在 scored=false 时生效，任务状态只沿
//! Pending → Claimed → {Posted, Failed} 前进，计数自增在存储边界内原子完成。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::pipeline::Verdict;
use crate::store::{ConversationRecord, NewPost, Post, RateCounter, ReplyTask, TaskStatus};

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// 任务当前状态（或认领者）不允许该迁移
    #[error("Transition rejected for task {task_id}: {from:?} -> {to:?}")]
    TransitionRejected {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 持久化存储能力：帖子、回复任务、对话记忆、回复计数
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 采集侧写入帖子；id 已存在时忽略并返回 false
    async fn insert_post(&self, post: NewPost) -> Result<bool, StoreError>;

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>, StoreError>;

    /// 读取未打分帖子（最多 limit 条）
    async fn fetch_unscored_posts(&self, limit: usize) -> Result<Vec<Post>, StoreError>;

    /// 写入打分结果并置 scored=true；仅当帖子仍未打分时生效，返回是否由本次调用生效
    async fn record_verdict(&self, post_id: &str, verdict: &Verdict) -> Result<bool, StoreError>;

    /// 插入 Pending 任务
    async fn insert_task(&self, task: &ReplyTask) -> Result<(), StoreError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<ReplyTask>, StoreError>;

    async fn tasks_for_post(&self, post_id: &str) -> Result<Vec<ReplyTask>, StoreError>;

    /// 认领最早到期的一个 Pending 任务（scheduled_for ≤ now），置为 Claimed 并设置租约
    async fn claim_due_task(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<ReplyTask>, StoreError>;

    /// 租约过期的 Claimed 任务退回 Pending，返回回收数量
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Claimed → Posted（必须由认领者调用）
    async fn mark_posted(
        &self,
        task_id: &str,
        worker_id: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Claimed → Failed（必须由认领者调用）
    async fn mark_failed(
        &self,
        task_id: &str,
        worker_id: &str,
        reason: &str,
    ) -> Result<(), StoreError>;

    async fn append_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError>;

    /// 某作者最近 limit 条互动，新的在前
    async fn recent_conversations(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, StoreError>;

    async fn rate_counter(&self) -> Result<RateCounter, StoreError>;

    /// 原子自增回复计数（跨 UTC 日从 1 开始），返回更新后的计数
    async fn increment_replies(&self, now: DateTime<Utc>) -> Result<RateCounter, StoreError>;
}
