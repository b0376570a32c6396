//! Reply Agent - Rust 社交回复智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与启动密钥
//! - **core**: 错误汇总、组件装配、单飞周期循环、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Gemini / Mock）
//! - **pipeline**: 打分、人设生成 + 安全自纠、随机延迟排程、采集周期
//! - **store**: 帖子、回复任务、互动历史与计数的持久化（SQLite / 内存）
//! - **browser**: 浏览器驱动抽象、拟人化打字节奏、headless_chrome 实现
//! - **worker**: 认领到期任务并投递
//! - **health**: 存活探针（feature "health"）

pub mod browser;
pub mod config;
pub mod core;
#[cfg(feature = "health")]
pub mod health;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod worker;

pub use crate::core::{AgentBuilder, AgentError, Orchestrator, ShutdownManager};
pub use config::{load_config, AppConfig, Secrets};
