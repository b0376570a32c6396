//! 核心编排层：错误汇总、装配、单飞闸门、周期循环与优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod single_flight;

pub use builder::AgentBuilder;
pub use error::AgentError;
pub use orchestrator::{run_periodic, CycleSettings, Orchestrator};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use single_flight::{FlightPermit, SingleFlight};
