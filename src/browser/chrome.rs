//! Headless Chrome 驱动
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 使用持久化 user-data 目录保存登录态；每次投递在 navigate 时按需启动浏览器，close 时整体关闭。
//! headless_chrome 是同步 API，所有动作都放进 spawn_blocking。
//! 默认覆盖 UA 并去掉自动化标记，登录与投递使用同一套启动参数。

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::browser::{BrowserDriver, BrowserError, Keystroke, TypingCadence};
use crate::config::BrowserSection;

/// Chrome 默认参数中暴露自动化身份的一项
const ENABLE_AUTOMATION: &str = "--enable-automation";

/// 启动参数
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub window_size: (u32, u32),
    pub element_timeout: Duration,
    pub user_agent: Option<String>,
    /// 去掉 --enable-automation，并关闭 navigator.webdriver
    pub hide_automation: bool,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            user_data_dir: Some(PathBuf::from("browser-session")),
            headless: false,
            window_size: (1280, 720),
            element_timeout: Duration::from_secs(15),
            user_agent: None,
            hide_automation: true,
        }
    }
}

impl ChromeOptions {
    pub fn from_config(browser: &BrowserSection) -> Self {
        Self {
            user_data_dir: Some(browser.user_data_dir.clone()),
            headless: browser.headless,
            element_timeout: Duration::from_secs(browser.element_timeout_secs),
            user_agent: browser.effective_user_agent().map(str::to_string),
            hide_automation: browser.hide_automation,
            ..Self::default()
        }
    }

    /// 追加到 Chrome 命令行的参数
    pub fn extra_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        if self.hide_automation {
            args.push("--disable-blink-features=AutomationControlled".to_string());
        }
        args
    }

    /// 从默认参数中剔除的项
    pub fn ignored_default_args(&self) -> Vec<&'static str> {
        if self.hide_automation {
            vec![ENABLE_AUTOMATION]
        } else {
            Vec::new()
        }
    }
}

pub struct ChromeDriver {
    options: ChromeOptions,
    browser: Arc<Mutex<Option<Browser>>>,
    tab: Arc<Mutex<Option<Arc<Tab>>>>,
}

impl ChromeDriver {
    pub fn new(options: ChromeOptions) -> Self {
        Self {
            options,
            browser: Arc::new(Mutex::new(None)),
            tab: Arc::new(Mutex::new(None)),
        }
    }

    fn launch(options: &ChromeOptions) -> Result<Browser, BrowserError> {
        if let Some(dir) = &options.user_data_dir {
            std::fs::create_dir_all(dir).map_err(|e| BrowserError::Launch(e.to_string()))?;
        }
        let extra: Vec<OsString> = options.extra_args().into_iter().map(OsString::from).collect();
        let launch = LaunchOptions::default_builder()
            .headless(options.headless)
            .window_size(Some(options.window_size))
            .user_data_dir(options.user_data_dir.clone())
            .args(extra.iter().map(OsString::as_os_str).collect())
            .ignore_default_args(
                options
                    .ignored_default_args()
                    .into_iter()
                    .map(OsStr::new)
                    .collect(),
            )
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        Browser::new(launch).map_err(|e| BrowserError::Launch(e.to_string()))
    }

    fn current_tab(&self) -> Result<Arc<Tab>, BrowserError> {
        let guard = self
            .tab
            .lock()
            .map_err(|e| BrowserError::Action(e.to_string()))?;
        guard.clone().ok_or(BrowserError::NoActivePage)
    }

    /// 阻塞到用户关掉浏览器窗口（或 close 被调用），每 poll 检查一次连接
    pub async fn wait_until_closed(&self, poll: Duration) -> Result<(), BrowserError> {
        let browser_arc = Arc::clone(&self.browser);
        run_blocking(move || loop {
            {
                let mut guard = browser_arc
                    .lock()
                    .map_err(|e| BrowserError::Action(e.to_string()))?;
                let alive = match guard.as_ref() {
                    Some(browser) => browser.get_version().is_ok(),
                    None => return Ok(()),
                };
                if !alive {
                    guard.take();
                    return Ok(());
                }
            }
            std::thread::sleep(poll);
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, BrowserError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BrowserError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BrowserError::Action(format!("Task join: {}", e)))?
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let url = url.to_string();
        let options = self.options.clone();
        let browser_arc = Arc::clone(&self.browser);
        let tab_arc = Arc::clone(&self.tab);

        tracing::info!(url = %url, "browser navigate");

        run_blocking(move || {
            let mut browser_guard = browser_arc
                .lock()
                .map_err(|e| BrowserError::Launch(e.to_string()))?;
            if browser_guard.is_none() {
                *browser_guard = Some(Self::launch(&options)?);
            }
            let browser = browser_guard.as_ref().ok_or_else(|| {
                BrowserError::Launch("browser handle missing after launch".to_string())
            })?;

            let tab = browser
                .new_tab()
                .map_err(|e| BrowserError::Navigation(format!("Browser tab failed: {}", e)))?;
            tab.navigate_to(&url)
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;
            tab.wait_until_navigated()
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;

            let mut tab_guard = tab_arc
                .lock()
                .map_err(|e| BrowserError::Action(e.to_string()))?;
            *tab_guard = Some(tab);
            Ok(())
        })
        .await
    }

    async fn click_if_present(&self, selector: &str) -> Result<bool, BrowserError> {
        let tab = self.current_tab()?;
        let selector = selector.to_string();
        run_blocking(move || match tab.find_element(&selector) {
            Ok(el) => {
                el.click()
                    .map_err(|e| BrowserError::Action(format!("Click failed: {}", e)))?;
                Ok(true)
            }
            Err(_) => Ok(false),
        })
        .await
    }

    async fn wait_for_element(&self, selector: &str) -> Result<(), BrowserError> {
        let tab = self.current_tab()?;
        let selector = selector.to_string();
        let timeout = self.options.element_timeout;
        run_blocking(move || {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map(|_| ())
                .map_err(|_| BrowserError::ElementNotFound(selector.clone()))
        })
        .await
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        cadence: &TypingCadence,
    ) -> Result<(), BrowserError> {
        let tab = self.current_tab()?;
        let selector = selector.to_string();
        let plan: Vec<Keystroke> = {
            let mut rng = rand::thread_rng();
            cadence.plan(text, &mut rng)
        };

        run_blocking(move || {
            let editor = tab
                .find_element(&selector)
                .map_err(|_| BrowserError::ElementNotFound(selector.clone()))?;
            editor
                .click()
                .map_err(|e| BrowserError::Action(format!("Focus failed: {}", e)))?;
            for key in plan {
                std::thread::sleep(key.delay);
                tab.type_str(&key.ch.to_string())
                    .map_err(|e| BrowserError::Action(format!("Type failed: {}", e)))?;
            }
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let tab = self.current_tab()?;
        let selector = selector.to_string();
        run_blocking(move || {
            let el = tab
                .find_element(&selector)
                .map_err(|_| BrowserError::ElementNotFound(selector.clone()))?;
            el.click()
                .map_err(|e| BrowserError::Action(format!("Click failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let browser_arc = Arc::clone(&self.browser);
        let tab_arc = Arc::clone(&self.tab);
        run_blocking(move || {
            let tab = tab_arc
                .lock()
                .map_err(|e| BrowserError::Action(e.to_string()))?
                .take();
            if let Some(tab) = tab {
                let _ = tab.close(true);
            }
            let browser = browser_arc
                .lock()
                .map_err(|e| BrowserError::Action(e.to_string()))?
                .take();
            drop(browser);
            Ok(())
        })
        .await
    }
}
