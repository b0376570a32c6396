//! 存活探针（feature "health"）
//!
//! GET /health 返回固定文本，不检查下游依赖。

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const HEALTH_BODY: &str = "Reply agent is running.";

pub fn create_router() -> Router {
    Router::new().route("/health", get(|| async { HEALTH_BODY }))
}

/// 在给定 listener 上提供服务，直到 shutdown 被取消
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "health endpoint listening");
    }
    axum::serve(listener, create_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
