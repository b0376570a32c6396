//! 单飞闸门：同一类周期同一时刻最多只有一个在执行
//!
//! 上一轮未结束时，新的 tick 直接跳过而不是排队。

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug)]
pub struct SingleFlight {
    name: &'static str,
    gate: Arc<Mutex<()>>,
}

/// 持有期间闸门关闭；drop（包括 panic 展开时）即释放
pub struct FlightPermit {
    _guard: OwnedMutexGuard<()>,
}

impl SingleFlight {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 闸门空闲则进入，否则返回 None
    pub fn try_enter(&self) -> Option<FlightPermit> {
        Arc::clone(&self.gate)
            .try_lock_owned()
            .ok()
            .map(|guard| FlightPermit { _guard: guard })
    }

    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// 等待正在执行的一轮结束
    pub async fn wait_idle(&self) {
        let _guard = self.gate.lock().await;
    }
}
