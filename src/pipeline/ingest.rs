//! 采集-打分-排程周期
//!
//! 取最多 batch_size 条未打分帖子，逐条顺序处理：
//! 打分 → 条件写回（别人已打过分则跳过）→ 通过门槛则生成回复并排程。
//! 单条帖子上的存储错误只记日志，不影响后续帖子。

use std::sync::Arc;

use chrono::Utc;

use crate::llm::LlmClient;
use crate::pipeline::{Classifier, ComposeOutcome, ReplyComposer, Scheduler};
use crate::store::{Post, StoreError, TaskStore};

/// 一次周期的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub scored: usize,
    pub accepted: usize,
    pub scheduled: usize,
    pub no_reply: usize,
    /// 本轮消耗的 token（未设置用量来源时为 0）
    pub total_tokens: u64,
}

/// 采集周期参数
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub batch_size: usize,
    pub min_score: u8,
    pub history_limit: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            min_score: 70,
            history_limit: 5,
        }
    }
}

pub struct IngestPipeline {
    store: Arc<dyn TaskStore>,
    classifier: Classifier,
    composer: ReplyComposer,
    scheduler: Scheduler,
    settings: IngestSettings,
    usage_source: Option<Arc<dyn LlmClient>>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        classifier: Classifier,
        composer: ReplyComposer,
        scheduler: Scheduler,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            composer,
            scheduler,
            settings,
            usage_source: None,
        }
    }

    /// 每轮结束时从该客户端读取累计用量，差值记入报告
    pub fn with_usage_from(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.usage_source = Some(llm);
        self
    }

    fn tokens_so_far(&self) -> u64 {
        self.usage_source.as_ref().map_or(0, |llm| llm.token_usage().2)
    }

    pub async fn run_once(&self) -> Result<IngestReport, StoreError> {
        let posts = self.store.fetch_unscored_posts(self.settings.batch_size).await?;
        let mut report = IngestReport {
            fetched: posts.len(),
            ..Default::default()
        };
        if posts.is_empty() {
            tracing::debug!("no new posts to process");
            return Ok(report);
        }

        let tokens_before = self.tokens_so_far();
        for post in &posts {
            if let Err(e) = self.process(post, &mut report).await {
                tracing::error!(post_id = %post.id, error = %e, "failed to process post");
            }
        }
        report.total_tokens = self.tokens_so_far().saturating_sub(tokens_before);

        tracing::info!(
            fetched = report.fetched,
            scored = report.scored,
            accepted = report.accepted,
            scheduled = report.scheduled,
            no_reply = report.no_reply,
            total_tokens = report.total_tokens,
            "ingest cycle finished"
        );
        Ok(report)
    }

    async fn process(&self, post: &Post, report: &mut IngestReport) -> Result<(), StoreError> {
        tracing::info!(post_id = %post.id, author = %post.author, "processing post");

        let verdict = self.classifier.classify(&post.text, &post.author).await;
        if !self.store.record_verdict(&post.id, &verdict).await? {
            tracing::info!(post_id = %post.id, "post already scored elsewhere, skipping");
            return Ok(());
        }
        report.scored += 1;

        if !verdict.is_accepted(self.settings.min_score) {
            tracing::info!(post_id = %post.id, score = verdict.score, "skipped");
            return Ok(());
        }
        report.accepted += 1;
        tracing::info!(post_id = %post.id, score = verdict.score, "high score, generating reply");

        let history = self
            .store
            .recent_conversations(&post.author, self.settings.history_limit)
            .await?;

        let outcome = self.composer.compose(&post.text, &post.author, &history).await;
        let text = match &outcome {
            ComposeOutcome::NoReply { .. } => {
                report.no_reply += 1;
                tracing::warn!(post_id = %post.id, "failed to generate a reply");
                return Ok(());
            }
            ComposeOutcome::Approved { text, .. }
            | ComposeOutcome::AcceptedAfterRejection { text, .. } => text,
        };

        let task = self.scheduler.schedule(text, &post.id, &post.author, Utc::now());
        self.store.insert_task(&task).await?;
        report.scheduled += 1;
        tracing::info!(
            post_id = %post.id,
            task_id = %task.id,
            scheduled_for = %task.scheduled_for,
            "reply scheduled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::pipeline::SafetyReviewer;
    use crate::store::{InMemoryStore, NewPost};

    fn verdict_json(should_reply: bool, score: u32) -> String {
        format!(
            r#"{{"should_reply": {should_reply}, "engagement_score": {score}, "tweet_type": "question"}}"#
        )
    }

    fn pipeline(
        store: Arc<InMemoryStore>,
        classify: ScriptedLlmClient,
        generate: ScriptedLlmClient,
        review: ScriptedLlmClient,
    ) -> IngestPipeline {
        IngestPipeline::new(
            store,
            Classifier::new(Arc::new(classify)),
            ReplyComposer::new(Arc::new(generate), SafetyReviewer::new(Arc::new(review))),
            Scheduler::default(),
            IngestSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_gate_blocks_low_score_and_negative_verdicts() {
        let store = Arc::new(InMemoryStore::new());
        for id in ["p1", "p2", "p3", "p4"] {
            store.insert_post(NewPost::new(id, "alice", "text")).await.unwrap();
        }
        let classify = ScriptedLlmClient::new()
            .reply(verdict_json(true, 69))
            .reply(verdict_json(false, 95))
            .fail(LlmError::Timeout(60))
            .reply(verdict_json(true, 70));
        let generate = ScriptedLlmClient::new().reply("fair point");
        let review = ScriptedLlmClient::new().reply(r#"{"safe": true}"#);

        let report = pipeline(store.clone(), classify, generate, review)
            .run_once()
            .await
            .unwrap();

        assert_eq!(
            report,
            IngestReport {
                fetched: 4,
                scored: 4,
                accepted: 1,
                scheduled: 1,
                no_reply: 0,
                total_tokens: 0,
            }
        );
        let tasks = store.all_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].post_id, "p4");
        assert_eq!(store.get_post("p3").await.unwrap().unwrap().score, 0);
    }

    #[tokio::test]
    async fn test_fractional_score_just_below_gate_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_post(NewPost::new("p1", "alice", "text")).await.unwrap();
        let classify = ScriptedLlmClient::new()
            .reply(r#"{"should_reply": true, "engagement_score": 69.5, "tweet_type": "opinion"}"#);

        let report = pipeline(store.clone(), classify, ScriptedLlmClient::new(), ScriptedLlmClient::new())
            .run_once()
            .await
            .unwrap();
        assert_eq!(report.scored, 1);
        assert_eq!(report.scheduled, 0);
        assert_eq!(store.get_post("p1").await.unwrap().unwrap().score, 69);
        assert!(store.all_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_reply_leaves_post_scored_without_task() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_post(NewPost::new("p1", "alice", "text")).await.unwrap();
        let classify = ScriptedLlmClient::new().reply(verdict_json(true, 90));
        let generate = ScriptedLlmClient::new()
            .fail(LlmError::EmptyResponse)
            .fail(LlmError::EmptyResponse);

        let report = pipeline(store.clone(), classify, generate, ScriptedLlmClient::new())
            .run_once()
            .await
            .unwrap();
        assert_eq!(report.no_reply, 1);
        assert_eq!(report.scheduled, 0);
        assert!(store.get_post("p1").await.unwrap().unwrap().scored);
        assert!(store.all_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_report_counts_tokens_spent_this_cycle() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_post(NewPost::new("p1", "alice", "text")).await.unwrap();
        let shared: Arc<dyn LlmClient> = Arc::new(
            ScriptedLlmClient::new()
                .with_usage_per_call(10, 5)
                .reply(verdict_json(true, 90))
                .reply("fair point")
                .reply(r#"{"safe": true}"#),
        );
        let ingest = IngestPipeline::new(
            store.clone(),
            Classifier::new(Arc::clone(&shared)),
            ReplyComposer::new(Arc::clone(&shared), SafetyReviewer::new(Arc::clone(&shared))),
            Scheduler::default(),
            IngestSettings::default(),
        )
        .with_usage_from(Arc::clone(&shared));

        let report = ingest.run_once().await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.total_tokens, 45);

        // 脚本耗尽：打分失败不计用量，下一轮只计新增部分
        store.insert_post(NewPost::new("p2", "bob", "text")).await.unwrap();
        let second = ingest.run_once().await.unwrap();
        assert_eq!(second.scored, 1);
        assert_eq!(second.total_tokens, 0);
    }

    #[tokio::test]
    async fn test_respects_batch_size() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..12 {
            store
                .insert_post(NewPost::new(format!("p{i}"), "a", "t"))
                .await
                .unwrap();
        }
        let mut classify = ScriptedLlmClient::new();
        for _ in 0..12 {
            classify = classify.reply(verdict_json(false, 10));
        }
        let report = pipeline(store.clone(), classify, ScriptedLlmClient::new(), ScriptedLlmClient::new())
            .run_once()
            .await
            .unwrap();
        assert_eq!(report.fetched, 10);
        assert_eq!(store.fetch_unscored_posts(10).await.unwrap().len(), 2);
    }
}
