//! 浏览器自动化协作方
//!
//! PostingWorker 只通过 BrowserDriver 发出动作；真实实现为 headless_chrome（feature "browser"），
//! 测试使用 RecordingDriver。

pub mod cadence;
pub mod mock;

#[cfg(feature = "browser")]
pub mod chrome;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use cadence::{Keystroke, TypingCadence};
pub use mock::RecordingDriver;

#[cfg(feature = "browser")]
pub use chrome::{ChromeDriver, ChromeOptions};

/// 浏览器动作失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigate failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Browser action failed: {0}")]
    Action(String),

    #[error("No active page, navigate first")]
    NoActivePage,
}

/// 单个浏览器会话上的动作集合；调用方保证同一时刻只有一个投递在进行
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// 打开新页面并跳转
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// 元素存在则点击并返回 true，不存在返回 false
    async fn click_if_present(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn wait_for_element(&self, selector: &str) -> Result<(), BrowserError>;

    /// 聚焦元素后按节奏逐字输入
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        cadence: &TypingCadence,
    ) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// 显式等待页面稳定
    async fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    /// 关闭当前页面（无页面时为 no-op）
    async fn close(&self) -> Result<(), BrowserError>;
}
