//! 主控循环：两个独立的周期
//!
//! - ingest：每 ingest_interval 拉取未打分帖子并排程回复（启动时立即执行一次）
//! - post：每 post_interval 回收过期租约并投递一个到期回复
//!
//! 每类周期有自己的单飞闸门，上一轮未结束时本次 tick 跳过。每轮在独立 tokio 任务中执行，
//! 错误与 panic 都只记录日志，不会终止循环。收到关闭信号后停止发起新周期，并等待进行中的一轮结束。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, SingleFlight};
use crate::pipeline::IngestPipeline;
use crate::worker::{PostOutcome, PostingWorker};

/// 周期间隔
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub ingest_interval: Duration,
    pub post_interval: Duration,
    /// 启动时是否立即跑一次 ingest
    pub ingest_on_start: bool,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            ingest_interval: Duration::from_secs(180),
            post_interval: Duration::from_secs(120),
            ingest_on_start: true,
        }
    }
}

pub struct Orchestrator {
    ingest: Arc<IngestPipeline>,
    worker: Arc<PostingWorker>,
    settings: CycleSettings,
}

impl Orchestrator {
    pub fn new(ingest: Arc<IngestPipeline>, worker: Arc<PostingWorker>, settings: CycleSettings) -> Self {
        Self {
            ingest,
            worker,
            settings,
        }
    }

    /// 运行直到 shutdown 被取消
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            ingest_interval_secs = self.settings.ingest_interval.as_secs(),
            post_interval_secs = self.settings.post_interval.as_secs(),
            worker_id = %self.worker.worker_id(),
            "orchestrator started"
        );

        let ingest = Arc::clone(&self.ingest);
        let ingest_loop = run_periodic(
            SingleFlight::new("ingest"),
            self.settings.ingest_interval,
            self.settings.ingest_on_start,
            shutdown.clone(),
            move || {
                let ingest = Arc::clone(&ingest);
                async move {
                    ingest.run_once().await?;
                    Ok(())
                }
            },
        );

        let worker = Arc::clone(&self.worker);
        let post_loop = run_periodic(
            SingleFlight::new("post"),
            self.settings.post_interval,
            false,
            shutdown,
            move || {
                let worker = Arc::clone(&worker);
                async move {
                    let outcome = worker.run_once(Utc::now()).await?;
                    if outcome == PostOutcome::CapReached {
                        tracing::debug!("post cycle skipped by daily cap");
                    }
                    Ok(())
                }
            },
        );

        tokio::join!(ingest_loop, post_loop);
        tracing::info!("orchestrator stopped");
    }
}

/// 周期驱动：按 period 触发 cycle，单飞、隔离 panic、响应关闭
pub async fn run_periodic<F, Fut>(
    gate: SingleFlight,
    period: Duration,
    run_immediately: bool,
    shutdown: CancellationToken,
    cycle: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
{
    let name = gate.name();
    let start = if run_immediately {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(permit) = gate.try_enter() else {
                    tracing::warn!(cycle = name, "previous cycle still running, skipping tick");
                    continue;
                };
                let handle = tokio::spawn(cycle());
                tokio::spawn(async move {
                    let result = handle.await;
                    drop(permit);
                    match result {
                        Ok(Ok(())) => tracing::debug!(cycle = name, "cycle finished"),
                        Ok(Err(e)) => tracing::error!(cycle = name, error = %e, "cycle failed"),
                        Err(join) => {
                            let err = AgentError::BackgroundTask(if join.is_panic() {
                                "panicked".to_string()
                            } else {
                                join.to_string()
                            });
                            tracing::error!(cycle = name, error = %err, "cycle aborted");
                        }
                    }
                });
            }
        }
    }

    if gate.is_running() {
        tracing::info!(cycle = name, "waiting for in-flight cycle before shutdown");
    }
    gate.wait_idle().await;
    tracing::info!(cycle = name, "cycle loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_panicking_cycle_does_not_stop_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let driver = tokio::spawn(run_periodic(
            SingleFlight::new("test"),
            Duration::from_millis(10),
            true,
            shutdown.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        panic!("first cycle panics");
                    }
                    if n == 1 {
                        return Err(StoreError::TaskNotFound("x".into()).into());
                    }
                    Ok(())
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.cancel();
        driver.await.unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_overlapping_ticks_are_skipped() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let (r, m, s) = (Arc::clone(&running), Arc::clone(&max_seen), Arc::clone(&starts));
        let driver = tokio::spawn(run_periodic(
            SingleFlight::new("slow"),
            Duration::from_millis(10),
            true,
            shutdown.clone(),
            move || {
                let (r, m, s) = (Arc::clone(&r), Arc::clone(&m), Arc::clone(&s));
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        driver.await.unwrap();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        let started = starts.load(Ordering::SeqCst);
        assert!((1..=4).contains(&started), "started {started} cycles");
        // 关闭时等待进行中的一轮
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delayed_start_waits_one_period() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let driver = tokio::spawn(run_periodic(
            SingleFlight::new("post"),
            Duration::from_secs(3600),
            false,
            shutdown.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        driver.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
