//! 单任务投递周期
//!
//! 流程：回收过期租约 → 检查每日上限 → 认领最早到期任务 → 浏览器脚本 → 写回结果。
//! 浏览器任一步失败都记为 Failed（终态，不重试）；页面会话无论成败都会关闭。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::browser::{BrowserDriver, BrowserError, TypingCadence};
use crate::store::{ConversationRecord, ReplyTask, StoreError, TaskStore};

const REPLY_NOT_FOUND: &str = "reply affordance not found";

/// 页面脚本：URL 模板、选择器与各步之间的等待
#[derive(Debug, Clone)]
pub struct PostingScript {
    /// `{post_id}` 会被替换
    pub url_template: String,
    pub reply_selector: String,
    pub editor_selector: String,
    pub submit_selector: String,
    pub after_navigate: Duration,
    pub after_reply_click: Duration,
    pub after_typing: Duration,
    pub after_submit: Duration,
}

impl Default for PostingScript {
    fn default() -> Self {
        Self {
            url_template: "https://x.com/i/web/status/{post_id}".to_string(),
            reply_selector: r#"[data-testid="reply"]"#.to_string(),
            editor_selector: r#"[data-testid="tweetTextarea_0"]"#.to_string(),
            submit_selector: r#"[data-testid="tweetButton"]"#.to_string(),
            after_navigate: Duration::from_millis(5000),
            after_reply_click: Duration::from_millis(2000),
            after_typing: Duration::from_millis(2000),
            after_submit: Duration::from_millis(5000),
        }
    }
}

impl PostingScript {
    pub fn url_for(&self, post_id: &str) -> String {
        self.url_template.replace("{post_id}", post_id)
    }

    /// 所有等待为零，测试用
    pub fn without_delays(mut self) -> Self {
        self.after_navigate = Duration::ZERO;
        self.after_reply_click = Duration::ZERO;
        self.after_typing = Duration::ZERO;
        self.after_submit = Duration::ZERO;
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub lease: Duration,
    /// None 表示不限
    pub daily_reply_cap: Option<u32>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            lease: Duration::from_secs(300),
            daily_reply_cap: None,
        }
    }
}

/// 一次投递周期的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// 没有到期任务
    Idle,
    CapReached,
    Posted(String),
    Failed { task_id: String, reason: String },
}

pub struct PostingWorker {
    store: Arc<dyn TaskStore>,
    driver: Arc<dyn BrowserDriver>,
    script: PostingScript,
    cadence: TypingCadence,
    settings: WorkerSettings,
}

impl PostingWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        driver: Arc<dyn BrowserDriver>,
        script: PostingScript,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            driver,
            script,
            cadence: TypingCadence::default(),
            settings,
        }
    }

    pub fn with_cadence(mut self, cadence: TypingCadence) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<PostOutcome, StoreError> {
        let reclaimed = self.store.reclaim_expired(now).await?;
        if reclaimed > 0 {
            tracing::warn!(count = reclaimed, "returned expired leases to pending");
        }

        if let Some(cap) = self.settings.daily_reply_cap {
            let today = self.store.rate_counter().await?.replies_on(now);
            if today >= cap {
                tracing::info!(replies_today = today, cap, "daily reply cap reached");
                return Ok(PostOutcome::CapReached);
            }
        }

        let worker_id = self.settings.worker_id.as_str();
        let Some(task) = self
            .store
            .claim_due_task(now, worker_id, self.settings.lease)
            .await?
        else {
            tracing::debug!("no due replies");
            return Ok(PostOutcome::Idle);
        };

        tracing::info!(
            task_id = %task.id,
            post_id = %task.post_id,
            author = %task.author,
            "posting reply"
        );

        let result = self.drive(&task).await;
        if let Err(e) = self.driver.close().await {
            tracing::warn!(task_id = %task.id, error = %e, "failed to close page session");
        }

        match result {
            Ok(()) => {
                // 平台上已发出：此后的写入各自独立，失败只记日志
                let posted_at = now;
                self.store.mark_posted(&task.id, worker_id, posted_at).await?;
                let record = ConversationRecord {
                    author: task.author.clone(),
                    post_id: task.post_id.clone(),
                    our_reply: task.text.clone(),
                    created_at: posted_at,
                };
                if let Err(e) = self.store.append_conversation(&record).await {
                    tracing::error!(task_id = %task.id, error = %e, "failed to record conversation");
                }
                match self.store.increment_replies(posted_at).await {
                    Ok(counter) => tracing::info!(
                        task_id = %task.id,
                        replies_today = counter.replies_today,
                        "reply posted"
                    ),
                    Err(e) => tracing::error!(
                        task_id = %task.id,
                        error = %e,
                        "reply posted but rate counter not updated"
                    ),
                }
                Ok(PostOutcome::Posted(task.id))
            }
            Err(e) => {
                let reason = match e {
                    BrowserError::ElementNotFound(sel) if sel == self.script.reply_selector => {
                        REPLY_NOT_FOUND.to_string()
                    }
                    other => other.to_string(),
                };
                self.store.mark_failed(&task.id, worker_id, &reason).await?;
                tracing::error!(task_id = %task.id, reason = %reason, "failed to post reply");
                Ok(PostOutcome::Failed {
                    task_id: task.id,
                    reason,
                })
            }
        }
    }

    async fn drive(&self, task: &ReplyTask) -> Result<(), BrowserError> {
        let script = &self.script;
        let driver = self.driver.as_ref();

        driver.navigate(&script.url_for(&task.post_id)).await?;
        driver.settle(script.after_navigate).await;

        if !driver.click_if_present(&script.reply_selector).await? {
            return Err(BrowserError::ElementNotFound(script.reply_selector.clone()));
        }
        driver.settle(script.after_reply_click).await;

        driver.wait_for_element(&script.editor_selector).await?;
        driver
            .type_text(&script.editor_selector, &task.text, &self.cadence)
            .await?;
        driver.settle(script.after_typing).await;

        driver.click(&script.submit_selector).await?;
        driver.settle(script.after_submit).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::RecordingDriver;
    use crate::pipeline::Verdict;
    use crate::store::{InMemoryStore, NewPost, Post, RateCounter, TaskStatus};
    use chrono::Duration as ChronoDuration;

    fn worker(
        store: Arc<InMemoryStore>,
        driver: Arc<RecordingDriver>,
        cap: Option<u32>,
    ) -> PostingWorker {
        PostingWorker::new(
            store,
            driver,
            PostingScript::default().without_delays(),
            WorkerSettings {
                worker_id: "w1".to_string(),
                lease: Duration::from_secs(60),
                daily_reply_cap: cap,
            },
        )
        .with_cadence(TypingCadence::instant())
    }

    async fn due_task(store: &InMemoryStore, post_id: &str) -> ReplyTask {
        let now = Utc::now();
        let task = ReplyTask::new(post_id, "alice", "nice thread", now, now - ChronoDuration::minutes(1));
        store.insert_task(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_success_posts_and_records_history() {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(RecordingDriver::new());
        let task = due_task(&store, "123").await;

        let outcome = worker(store.clone(), driver.clone(), None)
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, PostOutcome::Posted(task.id.clone()));

        let stored = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Posted);
        assert!(stored.posted_at.is_some());

        let history = store.recent_conversations("alice", 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].our_reply, "nice thread");
        assert_eq!(store.rate_counter().await.unwrap().replies_today, 1);

        assert_eq!(
            driver.actions(),
            vec![
                "navigate https://x.com/i/web/status/123".to_string(),
                r#"click [data-testid="reply"]"#.to_string(),
                r#"wait [data-testid="tweetTextarea_0"]"#.to_string(),
                r#"type [data-testid="tweetTextarea_0"] nice thread"#.to_string(),
                r#"click [data-testid="tweetButton"]"#.to_string(),
                "close".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_reply_button_fails_task() {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(RecordingDriver::new().without(r#"[data-testid="reply"]"#));
        let task = due_task(&store, "123").await;

        let outcome = worker(store.clone(), driver.clone(), None)
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PostOutcome::Failed {
                task_id: task.id.clone(),
                reason: REPLY_NOT_FOUND.to_string()
            }
        );
        let stored = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some(REPLY_NOT_FOUND));
        assert!(store.recent_conversations("alice", 5).await.unwrap().is_empty());
        assert_eq!(store.rate_counter().await.unwrap().replies_today, 0);
        assert_eq!(driver.actions().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn test_navigation_error_fails_task_and_closes_page() {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(RecordingDriver::new().failing_navigation());
        let task = due_task(&store, "9").await;

        let outcome = worker(store.clone(), driver.clone(), None)
            .run_once(Utc::now())
            .await
            .unwrap();
        match outcome {
            PostOutcome::Failed { task_id, reason } => {
                assert_eq!(task_id, task.id);
                assert!(reason.contains("ERR_CONNECTION_RESET"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(driver.actions().last().map(String::as_str), Some("close"));

        // 终态任务不会再被认领
        let again = worker(store, driver, None).run_once(Utc::now()).await.unwrap();
        assert_eq!(again, PostOutcome::Idle);
    }

    #[tokio::test]
    async fn test_idle_when_nothing_due() {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(RecordingDriver::new());
        let now = Utc::now();
        let future = ReplyTask::new("1", "bob", "later", now, now + ChronoDuration::minutes(30));
        store.insert_task(&future).await.unwrap();

        let outcome = worker(store.clone(), driver.clone(), None)
            .run_once(now)
            .await
            .unwrap();
        assert_eq!(outcome, PostOutcome::Idle);
        assert!(driver.actions().is_empty());
        assert_eq!(
            store.get_task(&future.id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_daily_cap_skips_cycle() {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(RecordingDriver::new());
        let now = Utc::now();
        store.increment_replies(now).await.unwrap();
        store.increment_replies(now).await.unwrap();
        let task = due_task(&store, "5").await;

        let outcome = worker(store.clone(), driver.clone(), Some(2))
            .run_once(now)
            .await
            .unwrap();
        assert_eq!(outcome, PostOutcome::CapReached);
        assert!(driver.actions().is_empty());
        assert_eq!(
            store.get_task(&task.id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed_before_claim() {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(RecordingDriver::new());
        let past = Utc::now() - ChronoDuration::minutes(10);
        let task = ReplyTask::new("77", "alice", "hi", past, past - ChronoDuration::minutes(1));
        store.insert_task(&task).await.unwrap();
        store
            .claim_due_task(past, "crashed-worker", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let outcome = worker(store.clone(), driver, None)
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, PostOutcome::Posted(task.id));
    }

    /// 历史写入总是失败的存储，其余操作委托给内存实现
    struct HistoryDownStore {
        inner: InMemoryStore,
    }

    #[async_trait::async_trait]
    impl TaskStore for HistoryDownStore {
        async fn insert_post(&self, post: NewPost) -> Result<bool, StoreError> {
            self.inner.insert_post(post).await
        }
        async fn get_post(&self, post_id: &str) -> Result<Option<Post>, StoreError> {
            self.inner.get_post(post_id).await
        }
        async fn fetch_unscored_posts(&self, limit: usize) -> Result<Vec<Post>, StoreError> {
            self.inner.fetch_unscored_posts(limit).await
        }
        async fn record_verdict(&self, post_id: &str, verdict: &Verdict) -> Result<bool, StoreError> {
            self.inner.record_verdict(post_id, verdict).await
        }
        async fn insert_task(&self, task: &ReplyTask) -> Result<(), StoreError> {
            self.inner.insert_task(task).await
        }
        async fn get_task(&self, task_id: &str) -> Result<Option<ReplyTask>, StoreError> {
            self.inner.get_task(task_id).await
        }
        async fn tasks_for_post(&self, post_id: &str) -> Result<Vec<ReplyTask>, StoreError> {
            self.inner.tasks_for_post(post_id).await
        }
        async fn claim_due_task(
            &self,
            now: DateTime<Utc>,
            worker_id: &str,
            lease: Duration,
        ) -> Result<Option<ReplyTask>, StoreError> {
            self.inner.claim_due_task(now, worker_id, lease).await
        }
        async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
            self.inner.reclaim_expired(now).await
        }
        async fn mark_posted(
            &self,
            task_id: &str,
            worker_id: &str,
            posted_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.mark_posted(task_id, worker_id, posted_at).await
        }
        async fn mark_failed(&self, task_id: &str, worker_id: &str, reason: &str) -> Result<(), StoreError> {
            self.inner.mark_failed(task_id, worker_id, reason).await
        }
        async fn append_conversation(&self, _record: &ConversationRecord) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
        async fn recent_conversations(
            &self,
            author: &str,
            limit: usize,
        ) -> Result<Vec<ConversationRecord>, StoreError> {
            self.inner.recent_conversations(author, limit).await
        }
        async fn rate_counter(&self) -> Result<RateCounter, StoreError> {
            self.inner.rate_counter().await
        }
        async fn increment_replies(&self, now: DateTime<Utc>) -> Result<RateCounter, StoreError> {
            self.inner.increment_replies(now).await
        }
    }

    #[tokio::test]
    async fn test_history_write_failure_still_counts_posted_reply() {
        let store = Arc::new(HistoryDownStore {
            inner: InMemoryStore::new(),
        });
        let now = Utc::now();
        let task = ReplyTask::new("55", "alice", "hello", now, now - ChronoDuration::minutes(1));
        store.insert_task(&task).await.unwrap();

        let outcome = PostingWorker::new(
            store.clone(),
            Arc::new(RecordingDriver::new()),
            PostingScript::default().without_delays(),
            WorkerSettings {
                worker_id: "w1".to_string(),
                lease: Duration::from_secs(60),
                daily_reply_cap: None,
            },
        )
        .with_cadence(TypingCadence::instant())
        .run_once(now)
        .await
        .unwrap();

        assert_eq!(outcome, PostOutcome::Posted(task.id.clone()));
        let stored = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Posted);
        assert_eq!(stored.posted_at, Some(now));
        let counter = store.rate_counter().await.unwrap();
        assert_eq!(counter.replies_today, 1);
        assert_eq!(counter.last_reply_time, Some(now));
    }
}
