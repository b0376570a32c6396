//! 投递工作者：认领到期任务并通过浏览器发出回复

pub mod poster;

pub use poster::{PostOutcome, PostingScript, PostingWorker, WorkerSettings};
