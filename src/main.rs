//! Reply Agent 入口
//!
//! 初始化日志 → 加载配置与密钥（缺失即退出）→ 打开存储 → 装配编排器 → 运行到收到关闭信号。
//! 用法：`reply-agent [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use reply_agent::browser::{ChromeDriver, ChromeOptions};
use reply_agent::core::{AgentBuilder, ShutdownManager};
use reply_agent::store::SqliteStore;
use reply_agent::{load_config, observability, Secrets};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let secrets = Secrets::from_env().context("Startup aborted")?;

    let store = Arc::new(
        SqliteStore::from_url(&secrets.store_url)
            .with_context(|| format!("Failed to open store at {}", secrets.store_url))?,
    );

    let driver = Arc::new(ChromeDriver::new(ChromeOptions::from_config(&cfg.browser)));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    #[cfg(feature = "health")]
    let health = if cfg.health.enabled {
        let listener = tokio::net::TcpListener::bind(&cfg.health.bind)
            .await
            .with_context(|| format!("Failed to bind health endpoint {}", cfg.health.bind))?;
        Some(tokio::spawn(reply_agent::health::serve(listener, shutdown.token())))
    } else {
        None
    };

    let builder = AgentBuilder::new(cfg);
    let orchestrator = builder
        .build(Some(&secrets), store, driver)
        .context("Failed to assemble agent")?;

    tracing::info!(
        name = builder.config().app.name.as_deref().unwrap_or("reply-agent"),
        "reply agent starting"
    );
    orchestrator.run(shutdown.token()).await;

    #[cfg(feature = "health")]
    if let Some(handle) = health {
        if let Ok(Err(e)) = handle.await {
            tracing::warn!(error = %e, "health endpoint exited with error");
        }
    }

    tracing::info!("reply agent stopped");
    Ok(())
}
