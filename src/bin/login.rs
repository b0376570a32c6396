//! 手动登录助手
//!
//! 以有界面模式打开持久化 profile 并跳到登录页，用户登录完成后关闭窗口即可，
//! 会话留在 user_data_dir 中供 reply-agent 复用。Ctrl+C 也会关闭浏览器并退出。
//! 用法：`reply-agent-login [config.toml]`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use reply_agent::browser::{BrowserDriver, ChromeDriver, ChromeOptions};
use reply_agent::{load_config, observability};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let options = ChromeOptions {
        headless: false,
        ..ChromeOptions::from_config(&cfg.browser)
    };
    tracing::info!(
        profile = %cfg.browser.user_data_dir.display(),
        url = %cfg.browser.login_url,
        "opening browser for manual login; close the window when done"
    );

    let driver = ChromeDriver::new(options);
    driver
        .navigate(&cfg.browser.login_url)
        .await
        .context("Failed to open login page")?;

    tokio::select! {
        closed = driver.wait_until_closed(POLL_INTERVAL) => {
            closed.context("Lost track of the login browser")?;
            tracing::info!("browser closed, session saved");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, closing browser");
            driver.close().await.context("Failed to close browser")?;
        }
    }
    Ok(())
}
