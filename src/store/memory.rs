//! 内存版存储（测试与试运行）
//!
//! 所有表放在同一把 RwLock 下，每个操作在一次写锁内完成读改写，
//! 因此条件更新与计数自增天然原子。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::pipeline::Verdict;
use crate::store::{
    ConversationRecord, NewPost, Post, RateCounter, ReplyTask, StoreError, TaskStatus, TaskStore,
};

#[derive(Default)]
struct Tables {
    posts: HashMap<String, Post>,
    /// 插入顺序，保证 fetch_unscored_posts 的结果稳定
    post_order: Vec<String>,
    tasks: HashMap<String, ReplyTask>,
    conversations: Vec<ConversationRecord>,
    counter: RateCounter,
}

/// 内存存储
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部任务快照（按创建时间排序）
    pub async fn all_tasks(&self) -> Vec<ReplyTask> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<_> = tables.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

fn transition(
    task: &mut ReplyTask,
    worker_id: &str,
    to: TaskStatus,
) -> Result<(), StoreError> {
    if task.status != TaskStatus::Claimed || task.claimed_by.as_deref() != Some(worker_id) {
        return Err(StoreError::TransitionRejected {
            task_id: task.id.clone(),
            from: task.status,
            to,
        });
    }
    task.status = to;
    task.lease_expires_at = None;
    Ok(())
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_post(&self, post: NewPost) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.posts.contains_key(&post.id) {
            return Ok(false);
        }
        tables.post_order.push(post.id.clone());
        tables.posts.insert(post.id.clone(), post.into_post());
        Ok(true)
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>, StoreError> {
        Ok(self.tables.read().await.posts.get(post_id).cloned())
    }

    async fn fetch_unscored_posts(&self, limit: usize) -> Result<Vec<Post>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .post_order
            .iter()
            .filter_map(|id| tables.posts.get(id))
            .filter(|p| !p.scored)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_verdict(&self, post_id: &str, verdict: &Verdict) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.posts.get_mut(post_id) {
            Some(post) if !post.scored => {
                post.scored = true;
                post.should_reply = verdict.should_reply;
                post.score = verdict.score;
                post.post_type = verdict.post_type;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_task(&self, task: &ReplyTask) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .tasks
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<ReplyTask>, StoreError> {
        Ok(self.tables.read().await.tasks.get(task_id).cloned())
    }

    async fn tasks_for_post(&self, post_id: &str) -> Result<Vec<ReplyTask>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn claim_due_task(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<ReplyTask>, StoreError> {
        let mut tables = self.tables.write().await;
        let next_id = tables
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .min_by_key(|t| (t.scheduled_for, t.created_at))
            .map(|t| t.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::minutes(10));
        let task = tables
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        task.status = TaskStatus::Claimed;
        task.claimed_by = Some(worker_id.to_string());
        task.lease_expires_at = Some(now + lease);
        Ok(Some(task.clone()))
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let mut count = 0;
        for task in tables.tasks.values_mut() {
            if task.lease_expired(now) {
                task.status = TaskStatus::Pending;
                task.claimed_by = None;
                task.lease_expires_at = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_posted(
        &self,
        task_id: &str,
        worker_id: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let task = tables
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        transition(task, worker_id, TaskStatus::Posted)?;
        task.posted_at = Some(posted_at);
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: &str,
        worker_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let task = tables
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        transition(task, worker_id, TaskStatus::Failed)?;
        task.failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn append_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        self.tables.write().await.conversations.push(record.clone());
        Ok(())
    }

    async fn recent_conversations(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .conversations
            .iter()
            .filter(|c| c.author == author)
            .cloned()
            .collect();
        // 稳定排序 + reverse：同一时刻写入的记录也保持「后写在前」
        records.reverse();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn rate_counter(&self) -> Result<RateCounter, StoreError> {
        Ok(self.tables.read().await.counter.clone())
    }

    async fn increment_replies(&self, now: DateTime<Utc>) -> Result<RateCounter, StoreError> {
        let mut tables = self.tables.write().await;
        tables.counter = tables.counter.incremented(now);
        Ok(tables.counter.clone())
    }
}
