//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `REPLY_AGENT__*` 覆盖（双下划线表示嵌套，如 `REPLY_AGENT__CYCLES__POST_INTERVAL_SECS=60`）。
//! 密钥不进配置文件，由 [`Secrets::from_env`] 单独读取，缺失即为致命错误。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// 启动阶段的致命配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required secret: {0}")]
    MissingSecret(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub pipeline: PipelineSection,
    pub schedule: ScheduleSection,
    pub cycles: CyclesSection,
    pub browser: BrowserSection,
    pub health: HealthSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 租约持有者标识；未设置时每次启动随机生成
    pub worker_id: Option<String>,
}

/// [llm] 段：Gemini（OpenAI 兼容端点）或任意 OpenAI 兼容后端
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// 未设置时使用 Gemini 的 OpenAI 兼容端点
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_model() -> String {
    crate::llm::GEMINI_FLASH.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [pipeline] 段：打分门槛、批量与人设
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 含边界：score >= min_score 才会回复
    #[serde(default = "default_min_score")]
    pub min_score: u8,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_persona_name")]
    pub persona_name: String,
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            min_score: default_min_score(),
            history_limit: default_history_limit(),
            max_attempts: default_max_attempts(),
            persona_name: default_persona_name(),
            max_reply_chars: default_max_reply_chars(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_min_score() -> u8 {
    70
}

fn default_history_limit() -> usize {
    5
}

fn default_max_attempts() -> usize {
    crate::pipeline::MAX_ATTEMPTS
}

fn default_persona_name() -> String {
    "Vintor".to_string()
}

fn default_max_reply_chars() -> usize {
    240
}

/// [schedule] 段：回复延迟区间（分钟，闭区间）
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    #[serde(default = "default_min_delay")]
    pub min_delay_minutes: u32,
    #[serde(default = "default_max_delay")]
    pub max_delay_minutes: u32,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            min_delay_minutes: default_min_delay(),
            max_delay_minutes: default_max_delay(),
        }
    }
}

fn default_min_delay() -> u32 {
    6
}

fn default_max_delay() -> u32 {
    90
}

/// [cycles] 段：两个周期的间隔、租约与每日上限
#[derive(Debug, Clone, Deserialize)]
pub struct CyclesSection {
    #[serde(default = "default_ingest_interval")]
    pub ingest_interval_secs: u64,
    #[serde(default = "default_post_interval")]
    pub post_interval_secs: u64,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    pub daily_reply_cap: Option<u32>,
}

impl Default for CyclesSection {
    fn default() -> Self {
        Self {
            ingest_interval_secs: default_ingest_interval(),
            post_interval_secs: default_post_interval(),
            lease_secs: default_lease_secs(),
            daily_reply_cap: None,
        }
    }
}

fn default_ingest_interval() -> u64 {
    180
}

fn default_post_interval() -> u64 {
    120
}

fn default_lease_secs() -> u64 {
    300
}

/// [browser] 段：会话目录、页面脚本
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: PathBuf,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_post_url_template")]
    pub post_url_template: String,
    #[serde(default = "default_element_timeout")]
    pub element_timeout_secs: u64,
    /// 手动登录时打开的页面
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// 覆盖浏览器 UA；设为空字符串则保持 Chrome 自带的 UA
    #[serde(default = "default_user_agent")]
    pub user_agent: Option<String>,
    /// 去掉 --enable-automation 并关闭 AutomationControlled 特征
    #[serde(default = "default_hide_automation")]
    pub hide_automation: bool,
    #[serde(default)]
    pub selectors: SelectorsSection,
    #[serde(default)]
    pub settle_ms: SettleSection,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            user_data_dir: default_user_data_dir(),
            headless: false,
            post_url_template: default_post_url_template(),
            element_timeout_secs: default_element_timeout(),
            login_url: default_login_url(),
            user_agent: default_user_agent(),
            hide_automation: default_hide_automation(),
            selectors: SelectorsSection::default(),
            settle_ms: SettleSection::default(),
        }
    }
}

fn default_user_data_dir() -> PathBuf {
    PathBuf::from("browser-session")
}

fn default_post_url_template() -> String {
    "https://x.com/i/web/status/{post_id}".to_string()
}

fn default_element_timeout() -> u64 {
    15
}

fn default_login_url() -> String {
    "https://x.com/login".to_string()
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

fn default_user_agent() -> Option<String> {
    Some(DEFAULT_USER_AGENT.to_string())
}

fn default_hide_automation() -> bool {
    true
}

impl BrowserSection {
    /// 生效的 UA：空字符串视为不覆盖
    pub fn effective_user_agent(&self) -> Option<&str> {
        self.user_agent
            .as_deref()
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
    }
}

/// [browser.selectors] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorsSection {
    #[serde(default = "default_reply_selector")]
    pub reply: String,
    #[serde(default = "default_editor_selector")]
    pub editor: String,
    #[serde(default = "default_submit_selector")]
    pub submit: String,
}

impl Default for SelectorsSection {
    fn default() -> Self {
        Self {
            reply: default_reply_selector(),
            editor: default_editor_selector(),
            submit: default_submit_selector(),
        }
    }
}

fn default_reply_selector() -> String {
    r#"[data-testid="reply"]"#.to_string()
}

fn default_editor_selector() -> String {
    r#"[data-testid="tweetTextarea_0"]"#.to_string()
}

fn default_submit_selector() -> String {
    r#"[data-testid="tweetButton"]"#.to_string()
}

/// [browser.settle_ms] 段：各步之后的等待（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct SettleSection {
    #[serde(default = "default_after_navigate")]
    pub after_navigate: u64,
    #[serde(default = "default_after_step")]
    pub after_reply_click: u64,
    #[serde(default = "default_after_step")]
    pub after_typing: u64,
    #[serde(default = "default_after_navigate")]
    pub after_submit: u64,
}

impl Default for SettleSection {
    fn default() -> Self {
        Self {
            after_navigate: default_after_navigate(),
            after_reply_click: default_after_step(),
            after_typing: default_after_step(),
            after_submit: default_after_navigate(),
        }
    }
}

fn default_after_navigate() -> u64 {
    5000
}

fn default_after_step() -> u64 {
    2000
}

/// [health] 段（feature "health"）
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_bind")]
    pub bind: String,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            bind: default_health_bind(),
        }
    }
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_bind() -> String {
    "0.0.0.0:3000".to_string()
}

impl AppConfig {
    /// 数值之间的一致性检查；加载后、启动周期前调用
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::Invalid("pipeline.batch_size must be > 0".into()));
        }
        if self.pipeline.min_score > 100 {
            return Err(ConfigError::Invalid(format!(
                "pipeline.min_score {} exceeds 100",
                self.pipeline.min_score
            )));
        }
        if self.schedule.min_delay_minutes > self.schedule.max_delay_minutes {
            return Err(ConfigError::Invalid(format!(
                "schedule.min_delay_minutes {} > max_delay_minutes {}",
                self.schedule.min_delay_minutes, self.schedule.max_delay_minutes
            )));
        }
        if self.cycles.ingest_interval_secs == 0 || self.cycles.post_interval_secs == 0 {
            return Err(ConfigError::Invalid("cycle intervals must be > 0".into()));
        }
        if !self.browser.post_url_template.contains("{post_id}") {
            return Err(ConfigError::Invalid(
                "browser.post_url_template must contain {post_id}".into(),
            ));
        }
        Ok(())
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.cycles.ingest_interval_secs)
    }

    pub fn post_interval(&self) -> Duration {
        Duration::from_secs(self.cycles.post_interval_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.cycles.lease_secs)
    }
}

/// 从 config 目录加载配置，环境变量 REPLY_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 REPLY_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();
    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }
    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }
    builder = builder.add_source(
        config::Environment::with_prefix("REPLY_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

pub(crate) const MODEL_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "OPENAI_API_KEY"];
const STORE_URL_VARS: [&str; 2] = ["STORE_URL", "DATABASE_URL"];

/// 启动必需的密钥
#[derive(Clone)]
pub struct Secrets {
    pub model_api_key: String,
    /// SQLite 路径，可带 sqlite:// 前缀
    pub store_url: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("model_api_key", &"***")
            .field("store_url", &self.store_url)
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 以任意查找函数读取，便于测试
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|n| lookup(*n))
                .find(|v| !v.trim().is_empty())
        };
        let model_api_key = first(&MODEL_KEY_VARS)
            .ok_or_else(|| ConfigError::MissingSecret(MODEL_KEY_VARS.join(" or ")))?;
        let store_url = first(&STORE_URL_VARS)
            .ok_or_else(|| ConfigError::MissingSecret(STORE_URL_VARS.join(" or ")))?;
        Ok(Self {
            model_api_key,
            store_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.model, "gemini-2.0-flash");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.pipeline.batch_size, 10);
        assert_eq!(cfg.pipeline.min_score, 70);
        assert_eq!(cfg.pipeline.max_attempts, 2);
        assert_eq!(cfg.schedule.min_delay_minutes, 6);
        assert_eq!(cfg.schedule.max_delay_minutes, 90);
        assert_eq!(cfg.ingest_interval(), Duration::from_secs(180));
        assert_eq!(cfg.post_interval(), Duration::from_secs(120));
        assert_eq!(cfg.browser.settle_ms.after_navigate, 5000);
        assert_eq!(cfg.browser.settle_ms.after_typing, 2000);
        assert_eq!(cfg.browser.login_url, "https://x.com/login");
        assert_eq!(cfg.browser.effective_user_agent(), Some(DEFAULT_USER_AGENT));
        assert!(cfg.browser.hide_automation);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_blank_user_agent_keeps_browser_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            r#"
[browser]
user_agent = ""
hide_automation = false
login_url = "https://example.test/login"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.browser.effective_user_agent(), None);
        assert!(!cfg.browser.hide_automation);
        assert_eq!(cfg.browser.login_url, "https://example.test/login");
    }

    #[test]
    fn test_toml_overrides_and_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            r#"
[pipeline]
min_score = 80

[cycles]
daily_reply_cap = 25

[browser.selectors]
reply = "button.reply"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.pipeline.min_score, 80);
        assert_eq!(cfg.pipeline.batch_size, 10);
        assert_eq!(cfg.cycles.daily_reply_cap, Some(25));
        assert_eq!(cfg.browser.selectors.reply, "button.reply");
        assert_eq!(cfg.browser.selectors.submit, r#"[data-testid="tweetButton"]"#);
    }

    #[test]
    fn test_validate_rejects_inverted_delay_window() {
        let mut cfg = AppConfig::default();
        cfg.schedule.min_delay_minutes = 100;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = AppConfig::default();
        cfg.browser.post_url_template = "https://x.com/home".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_model_key_is_fatal() {
        let err = Secrets::from_lookup(lookup(&[("STORE_URL", "sqlite://agent.db")])).unwrap_err();
        match err {
            ConfigError::MissingSecret(name) => assert!(name.contains("GEMINI_API_KEY")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_store_url_is_fatal() {
        let err = Secrets::from_lookup(lookup(&[("GEMINI_API_KEY", "k")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(ref n) if n.contains("STORE_URL")));
    }

    #[test]
    fn test_secret_fallbacks_and_blank_values() {
        let secrets = Secrets::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "  "),
            ("OPENAI_API_KEY", "sk-test"),
            ("DATABASE_URL", "agent.db"),
        ]))
        .unwrap();
        assert_eq!(secrets.model_api_key, "sk-test");
        assert_eq!(secrets.store_url, "agent.db");
        assert!(!format!("{secrets:?}").contains("sk-test"));
    }
}
