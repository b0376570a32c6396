//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 取消同一个 token；编排层停止发起新周期，并等待进行中的一轮结束。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 传给各周期循环与 health 服务
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::info!(reason = ?reason, "shutdown requested, finishing in-flight cycles");
        self.token.cancel();
    }

    /// 后台等待第一个系统信号
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = manager.token.cancelled() => return,
                r = ctrl_c() => r,
                r = sigterm() => r,
            };
            if let Some(reason) = reason {
                manager.shutdown(reason);
            }
        });
    }
}

async fn ctrl_c() -> Option<ShutdownReason> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some(ShutdownReason::UserInitiated),
        Err(e) => {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn sigterm() -> Option<ShutdownReason> {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => term.recv().await.map(|_| ShutdownReason::Signal),
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending().await
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() -> Option<ShutdownReason> {
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_every_token_clone() {
        let manager = ShutdownManager::new();
        let ingest = manager.token();
        let post = manager.token();
        manager.shutdown(ShutdownReason::Signal);
        assert!(ingest.is_cancelled());
        assert!(post.is_cancelled());
        // 重复触发无副作用
        manager.shutdown(ShutdownReason::UserInitiated);
    }

    #[tokio::test]
    async fn test_signal_task_exits_after_manual_shutdown() {
        let manager = Arc::new(ShutdownManager::new());
        manager.install_signal_handlers();
        manager.shutdown(ShutdownReason::UserInitiated);
        tokio::time::timeout(std::time::Duration::from_secs(1), manager.token().cancelled())
            .await
            .unwrap();
    }
}
