//! 记录型浏览器驱动（测试用）
//!
//! 记录每个动作；可指定缺失的选择器与导航失败，用来覆盖投递失败分支。

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::browser::{BrowserDriver, BrowserError, TypingCadence};

#[derive(Debug, Default)]
pub struct RecordingDriver {
    missing: HashSet<String>,
    fail_navigation: bool,
    actions: Mutex<Vec<String>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该选择器在页面上不存在
    pub fn without(mut self, selector: impl Into<String>) -> Self {
        self.missing.insert(selector.into());
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn record(&self, action: String) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }

    fn require(&self, selector: &str) -> Result<(), BrowserError> {
        if self.missing.contains(selector) {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowserDriver for RecordingDriver {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.record(format!("navigate {url}"));
        if self.fail_navigation {
            return Err(BrowserError::Navigation(format!("{url}: net::ERR_CONNECTION_RESET")));
        }
        Ok(())
    }

    async fn click_if_present(&self, selector: &str) -> Result<bool, BrowserError> {
        if self.missing.contains(selector) {
            self.record(format!("missing {selector}"));
            return Ok(false);
        }
        self.record(format!("click {selector}"));
        Ok(true)
    }

    async fn wait_for_element(&self, selector: &str) -> Result<(), BrowserError> {
        self.require(selector)?;
        self.record(format!("wait {selector}"));
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        _cadence: &TypingCadence,
    ) -> Result<(), BrowserError> {
        self.require(selector)?;
        self.record(format!("type {selector} {text}"));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.require(selector)?;
        self.record(format!("click {selector}"));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.record("close".to_string());
        Ok(())
    }
}
