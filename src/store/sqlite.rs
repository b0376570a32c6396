//! SQLite 存储
//!
//! 单连接 + tokio Mutex 串行化访问；WAL 模式。状态迁移全部写成带条件的
//! 单条 UPDATE（必要时配合 RETURNING），多个进程共享同一数据库文件时也不会重复认领。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use crate::pipeline::Verdict;
use crate::store::{
    ConversationRecord, NewPost, Post, PostType, RateCounter, ReplyTask, StoreError, TaskStatus,
    TaskStore,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    author TEXT NOT NULL,
    text TEXT NOT NULL,
    url TEXT,
    scored INTEGER NOT NULL DEFAULT 0,
    should_reply INTEGER NOT NULL DEFAULT 0,
    score INTEGER NOT NULL DEFAULT 0,
    post_type TEXT NOT NULL DEFAULT 'other',
    inserted_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_posts_scored ON posts(scored, inserted_at);

CREATE TABLE IF NOT EXISTS reply_tasks (
    id TEXT PRIMARY KEY,
    post_id TEXT NOT NULL,
    author TEXT NOT NULL,
    text TEXT NOT NULL,
    status TEXT NOT NULL,
    scheduled_for INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    posted_at INTEGER,
    claimed_by TEXT,
    lease_expires_at INTEGER,
    failure_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_due ON reply_tasks(status, scheduled_for);
CREATE INDEX IF NOT EXISTS idx_tasks_post ON reply_tasks(post_id);

CREATE TABLE IF NOT EXISTS conversations (
    author TEXT NOT NULL,
    post_id TEXT NOT NULL,
    our_reply TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_author ON conversations(author, created_at);

CREATE TABLE IF NOT EXISTS rate_counter (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    replies_today INTEGER NOT NULL DEFAULT 0,
    last_reply_time INTEGER,
    last_reply_day TEXT
);
INSERT OR IGNORE INTO rate_counter (id, replies_today) VALUES (1, 0);
"#;

const TASK_COLUMNS: &str = "id, post_id, author, text, status, scheduled_for, created_at, \
     posted_at, claimed_by, lease_expires_at, failure_reason";

/// SQLite 存储
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Reply store initialized: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// 接受 `sqlite://path`、`sqlite:path` 或裸路径
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, msg.into())
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {ms}")))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {ms}"))),
        None => Ok(None),
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ReplyTask> {
    let status: String = row.get(4)?;
    let status = TaskStatus::parse(&status)
        .ok_or_else(|| conversion_error(4, format!("unknown task status: {status}")))?;
    Ok(ReplyTask {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author: row.get(2)?,
        text: row.get(3)?,
        status,
        scheduled_for: time_at(row, 5)?,
        created_at: time_at(row, 6)?,
        posted_at: opt_time_at(row, 7)?,
        claimed_by: row.get(8)?,
        lease_expires_at: opt_time_at(row, 9)?,
        failure_reason: row.get(10)?,
    })
}

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    let score: i64 = row.get(6)?;
    let post_type: String = row.get(7)?;
    Ok(Post {
        id: row.get(0)?,
        author: row.get(1)?,
        text: row.get(2)?,
        url: row.get(3)?,
        scored: row.get(4)?,
        should_reply: row.get(5)?,
        score: score.clamp(0, 100) as u8,
        post_type: PostType::parse_lenient(&post_type),
    })
}

/// 条件迁移没有命中时，查出当前状态拼出准确的错误
fn rejected(conn: &Connection, task_id: &str, to: TaskStatus) -> StoreError {
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM reply_tasks WHERE id = ?1",
            params![task_id],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten();
    match current.as_deref().and_then(TaskStatus::parse) {
        Some(from) => StoreError::TransitionRejected {
            task_id: task_id.to_string(),
            from,
            to,
        },
        None => StoreError::TaskNotFound(task_id.to_string()),
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert_post(&self, post: NewPost) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO posts (id, author, text, url, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![post.id, post.author, post.text, post.url, to_millis(Utc::now())],
        )?;
        Ok(inserted > 0)
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>, StoreError> {
        let conn = self.conn.lock().await;
        let post = conn
            .query_row(
                "SELECT id, author, text, url, scored, should_reply, score, post_type
                 FROM posts WHERE id = ?1",
                params![post_id],
                row_to_post,
            )
            .optional()?;
        Ok(post)
    }

    async fn fetch_unscored_posts(&self, limit: usize) -> Result<Vec<Post>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, author, text, url, scored, should_reply, score, post_type
             FROM posts WHERE scored = 0
             ORDER BY inserted_at ASC, rowid ASC
             LIMIT ?1",
        )?;
        let posts = stmt
            .query_map(params![limit as i64], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    async fn record_verdict(&self, post_id: &str, verdict: &Verdict) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE posts SET scored = 1, should_reply = ?2, score = ?3, post_type = ?4
             WHERE id = ?1 AND scored = 0",
            params![
                post_id,
                verdict.should_reply,
                verdict.score as i64,
                verdict.post_type.as_str()
            ],
        )?;
        Ok(updated > 0)
    }

    async fn insert_task(&self, task: &ReplyTask) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO reply_tasks ({TASK_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                task.id,
                task.post_id,
                task.author,
                task.text,
                task.status.as_str(),
                to_millis(task.scheduled_for),
                to_millis(task.created_at),
                task.posted_at.map(to_millis),
                task.claimed_by,
                task.lease_expires_at.map(to_millis),
                task.failure_reason,
            ],
        )?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<ReplyTask>, StoreError> {
        let conn = self.conn.lock().await;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM reply_tasks WHERE id = ?1"),
                params![task_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    async fn tasks_for_post(&self, post_id: &str) -> Result<Vec<ReplyTask>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM reply_tasks WHERE post_id = ?1 ORDER BY created_at ASC"
        ))?;
        let tasks = stmt
            .query_map(params![post_id], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    async fn claim_due_task(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<ReplyTask>, StoreError> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX / 2);
        let conn = self.conn.lock().await;
        let task = conn
            .query_row(
                &format!(
                    "UPDATE reply_tasks
                     SET status = 'claimed', claimed_by = ?1, lease_expires_at = ?2
                     WHERE id = (
                         SELECT id FROM reply_tasks
                         WHERE status = 'pending' AND scheduled_for <= ?3
                         ORDER BY scheduled_for ASC, created_at ASC
                         LIMIT 1
                     ) AND status = 'pending'
                     RETURNING {TASK_COLUMNS}"
                ),
                params![worker_id, to_millis(now) + lease_ms, to_millis(now)],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE reply_tasks
             SET status = 'pending', claimed_by = NULL, lease_expires_at = NULL
             WHERE status = 'claimed' AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)",
            params![to_millis(now)],
        )?;
        Ok(n)
    }

    async fn mark_posted(
        &self,
        task_id: &str,
        worker_id: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE reply_tasks
             SET status = 'posted', posted_at = ?3, lease_expires_at = NULL
             WHERE id = ?1 AND status = 'claimed' AND claimed_by = ?2",
            params![task_id, worker_id, to_millis(posted_at)],
        )?;
        if n == 0 {
            return Err(rejected(&conn, task_id, TaskStatus::Posted));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: &str,
        worker_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE reply_tasks
             SET status = 'failed', failure_reason = ?3, lease_expires_at = NULL
             WHERE id = ?1 AND status = 'claimed' AND claimed_by = ?2",
            params![task_id, worker_id, reason],
        )?;
        if n == 0 {
            return Err(rejected(&conn, task_id, TaskStatus::Failed));
        }
        Ok(())
    }

    async fn append_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO conversations (author, post_id, our_reply, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.author,
                record.post_id,
                record.our_reply,
                to_millis(record.created_at)
            ],
        )?;
        Ok(())
    }

    async fn recent_conversations(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT author, post_id, our_reply, created_at FROM conversations
             WHERE author = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![author, limit as i64], |row| {
                Ok(ConversationRecord {
                    author: row.get(0)?,
                    post_id: row.get(1)?,
                    our_reply: row.get(2)?,
                    created_at: time_at(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn rate_counter(&self) -> Result<RateCounter, StoreError> {
        let conn = self.conn.lock().await;
        let counter = conn.query_row(
            "SELECT replies_today, last_reply_time FROM rate_counter WHERE id = 1",
            [],
            |row| {
                Ok(RateCounter {
                    replies_today: row.get::<_, i64>(0)?.max(0) as u32,
                    last_reply_time: opt_time_at(row, 1)?,
                })
            },
        )?;
        Ok(counter)
    }

    async fn increment_replies(&self, now: DateTime<Utc>) -> Result<RateCounter, StoreError> {
        let day = now.date_naive().to_string();
        let conn = self.conn.lock().await;
        let counter = conn.query_row(
            "UPDATE rate_counter
             SET replies_today = CASE WHEN last_reply_day = ?1 THEN replies_today + 1 ELSE 1 END,
                 last_reply_time = ?2,
                 last_reply_day = ?1
             WHERE id = 1
             RETURNING replies_today, last_reply_time",
            params![day, to_millis(now)],
            |row| {
                Ok(RateCounter {
                    replies_today: row.get::<_, i64>(0)?.max(0) as u32,
                    last_reply_time: opt_time_at(row, 1)?,
                })
            },
        )?;
        Ok(counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    const LEASE: Duration = Duration::from_secs(600);

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agent.db")).unwrap();
        (dir, store)
    }

    /// 去掉毫秒以下精度，便于与数据库读回值比较
    fn now_ms() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    #[tokio::test]
    async fn test_from_url_accepts_sqlite_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("nested/agent.db").display());
        let store = SqliteStore::from_url(&url).unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_posts_scored_once() {
        let (_dir, store) = open_temp();
        assert!(store.insert_post(NewPost::new("p1", "alice", "hello")).await.unwrap());
        assert!(!store.insert_post(NewPost::new("p1", "alice", "again")).await.unwrap());
        store.insert_post(NewPost::new("p2", "bob", "world")).await.unwrap();

        let unscored = store.fetch_unscored_posts(10).await.unwrap();
        assert_eq!(unscored.len(), 2);
        assert_eq!(unscored[0].id, "p1");

        let verdict = Verdict {
            should_reply: true,
            score: 85,
            post_type: PostType::Showcase,
        };
        assert!(store.record_verdict("p1", &verdict).await.unwrap());
        assert!(!store.record_verdict("p1", &Verdict::conservative()).await.unwrap());

        let post = store.get_post("p1").await.unwrap().unwrap();
        assert!(post.scored && post.should_reply);
        assert_eq!(post.score, 85);
        assert_eq!(post.post_type, PostType::Showcase);
        assert_eq!(store.fetch_unscored_posts(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_task_lifecycle_roundtrip() {
        let (_dir, store) = open_temp();
        let now = now_ms();
        let task = ReplyTask::new("p1", "alice", "love this", now, now - ChronoDuration::minutes(1));
        store.insert_task(&task).await.unwrap();
        assert_eq!(store.get_task(&task.id).await.unwrap().unwrap(), task);

        let claimed = store.claim_due_task(now, "w1", LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, TaskStatus::Claimed);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));
        assert!(store.claim_due_task(now, "w2", LEASE).await.unwrap().is_none());

        assert!(matches!(
            store.mark_posted(&task.id, "w2", now).await,
            Err(StoreError::TransitionRejected { from: TaskStatus::Claimed, .. })
        ));
        store.mark_posted(&task.id, "w1", now).await.unwrap();
        assert!(matches!(
            store.mark_failed(&task.id, "w1", "x").await,
            Err(StoreError::TransitionRejected { from: TaskStatus::Posted, .. })
        ));

        let stored = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Posted);
        assert_eq!(stored.posted_at, Some(now));
        assert_eq!(store.tasks_for_post("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_reports_not_found() {
        let (_dir, store) = open_temp();
        assert!(matches!(
            store.mark_failed("missing", "w1", "x").await,
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reclaim_expired_lease() {
        let (_dir, store) = open_temp();
        let now = now_ms();
        let task = ReplyTask::new("p1", "alice", "hey", now, now);
        store.insert_task(&task).await.unwrap();
        store.claim_due_task(now, "w1", LEASE).await.unwrap().unwrap();

        assert_eq!(store.reclaim_expired(now).await.unwrap(), 0);
        assert_eq!(
            store.reclaim_expired(now + ChronoDuration::minutes(11)).await.unwrap(),
            1
        );
        let again = store.claim_due_task(now, "w2", LEASE).await.unwrap().unwrap();
        assert_eq!(again.claimed_by.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_conversations_and_counter() {
        let (_dir, store) = open_temp();
        let base = now_ms();
        for i in 0..6 {
            store
                .append_conversation(&ConversationRecord {
                    author: "alice".into(),
                    post_id: format!("p{i}"),
                    our_reply: format!("r{i}"),
                    created_at: base + ChronoDuration::seconds(i),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_conversations("alice", 5).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].our_reply, "r5");
        assert_eq!(recent[4].our_reply, "r1");
        assert!(store.recent_conversations("bob", 5).await.unwrap().is_empty());

        let day1 = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 5, 2, 10, 0, 0).unwrap();
        assert_eq!(store.rate_counter().await.unwrap(), RateCounter::default());
        store.increment_replies(day1).await.unwrap();
        let c = store.increment_replies(day1).await.unwrap();
        assert_eq!(c.replies_today, 2);
        let c = store.increment_replies(day2).await.unwrap();
        assert_eq!(c.replies_today, 1);
        assert_eq!(store.rate_counter().await.unwrap().last_reply_time, Some(day2));
    }
}
