//! Agent 构建器：统一的组件装配逻辑
//!
//! 从 AppConfig 构建 LLM、流水线、投递工作者与编排器；存储与浏览器驱动由调用方注入，
//! 二进制与集成测试共用同一套装配。

use std::sync::Arc;
use std::time::Duration;

use crate::browser::BrowserDriver;
use crate::config::{AppConfig, Secrets};
use crate::config::{ConfigError, MODEL_KEY_VARS};
use crate::core::{AgentError, CycleSettings, Orchestrator};
use crate::llm::{create_gemini_client, LlmClient, OpenAiClient};
use crate::pipeline::{
    Classifier, IngestPipeline, IngestSettings, Persona, ReplyComposer, SafetyReviewer, Scheduler,
};
use crate::store::TaskStore;
use crate::worker::{PostingScript, PostingWorker, WorkerSettings};

pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    scheduler_seed: Option<u64>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            scheduler_seed: None,
        }
    }

    /// 注入 LLM（测试或自定义后端）；未注入时由 build_llm 根据配置创建
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 固定排程随机种子
    pub fn with_scheduler_seed(mut self, seed: u64) -> Self {
        self.scheduler_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按配置创建 LLM：未设置 base_url 时走 Gemini 的 OpenAI 兼容端点
    pub fn build_llm(&self, secrets: &Secrets) -> Arc<dyn LlmClient> {
        let timeout = Duration::from_secs(self.config.llm.timeouts.request);
        let model = self.config.llm.model.as_str();
        match self.config.llm.base_url.as_deref() {
            Some(base) => {
                tracing::info!(model = %model, base_url = %base, "Using OpenAI-compatible LLM");
                Arc::new(
                    OpenAiClient::new(Some(base), model, &secrets.model_api_key).with_timeout(timeout),
                )
            }
            None => {
                tracing::info!(model = %model, "Using Gemini LLM");
                Arc::new(create_gemini_client(&secrets.model_api_key, Some(model), timeout))
            }
        }
    }

    fn llm_or(&self, secrets: Option<&Secrets>) -> Option<Arc<dyn LlmClient>> {
        match (&self.llm, secrets) {
            (Some(llm), _) => Some(Arc::clone(llm)),
            (None, Some(secrets)) => Some(self.build_llm(secrets)),
            (None, None) => None,
        }
    }

    pub fn build_ingest(&self, store: Arc<dyn TaskStore>, llm: Arc<dyn LlmClient>) -> IngestPipeline {
        let p = &self.config.pipeline;
        let persona = Persona {
            name: p.persona_name.clone(),
            max_chars: p.max_reply_chars,
        };
        let composer = ReplyComposer::new(Arc::clone(&llm), SafetyReviewer::new(Arc::clone(&llm)))
            .with_persona(persona)
            .with_max_attempts(p.max_attempts);

        let mut scheduler = Scheduler::new(
            self.config.schedule.min_delay_minutes,
            self.config.schedule.max_delay_minutes,
        );
        if let Some(seed) = self.scheduler_seed {
            scheduler = scheduler.with_seed(seed);
        }

        IngestPipeline::new(
            store,
            Classifier::new(Arc::clone(&llm)),
            composer,
            scheduler,
            IngestSettings {
                batch_size: p.batch_size,
                min_score: p.min_score,
                history_limit: p.history_limit,
            },
        )
        .with_usage_from(llm)
    }

    pub fn posting_script(&self) -> PostingScript {
        let b = &self.config.browser;
        PostingScript {
            url_template: b.post_url_template.clone(),
            reply_selector: b.selectors.reply.clone(),
            editor_selector: b.selectors.editor.clone(),
            submit_selector: b.selectors.submit.clone(),
            after_navigate: Duration::from_millis(b.settle_ms.after_navigate),
            after_reply_click: Duration::from_millis(b.settle_ms.after_reply_click),
            after_typing: Duration::from_millis(b.settle_ms.after_typing),
            after_submit: Duration::from_millis(b.settle_ms.after_submit),
        }
    }

    pub fn build_worker(&self, store: Arc<dyn TaskStore>, driver: Arc<dyn BrowserDriver>) -> PostingWorker {
        let mut settings = WorkerSettings {
            lease: self.config.lease(),
            daily_reply_cap: self.config.cycles.daily_reply_cap,
            ..WorkerSettings::default()
        };
        if let Some(id) = &self.config.app.worker_id {
            settings.worker_id = id.clone();
        }
        PostingWorker::new(store, driver, self.posting_script(), settings)
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            ingest_interval: self.config.ingest_interval(),
            post_interval: self.config.post_interval(),
            ingest_on_start: true,
        }
    }

    /// 装配完整编排器；未注入 LLM 时需要 secrets
    pub fn build(
        &self,
        secrets: Option<&Secrets>,
        store: Arc<dyn TaskStore>,
        driver: Arc<dyn BrowserDriver>,
    ) -> Result<Orchestrator, AgentError> {
        let llm = self
            .llm_or(secrets)
            .ok_or_else(|| ConfigError::MissingSecret(MODEL_KEY_VARS.join(" or ")))?;
        let ingest = self.build_ingest(Arc::clone(&store), llm);
        let worker = self.build_worker(store, driver);
        Ok(Orchestrator::new(
            Arc::new(ingest),
            Arc::new(worker),
            self.cycle_settings(),
        ))
    }
}
