//! Scheduler：把通过的回复变成带拟人化延迟的 Pending 任务
//!
//! scheduled_for = now + U{min..=max} 分钟（默认 6..=90，闭区间）。不做重复检查，
//! 唯一性由采集侧的条件打分保证。

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::store::ReplyTask;

pub const DEFAULT_MIN_DELAY_MINUTES: u32 = 6;
pub const DEFAULT_MAX_DELAY_MINUTES: u32 = 90;

pub struct Scheduler {
    min_delay_minutes: u32,
    max_delay_minutes: u32,
    rng: Mutex<StdRng>,
}

impl Scheduler {
    /// min > max 时两者互换
    pub fn new(min_delay_minutes: u32, max_delay_minutes: u32) -> Self {
        let (min, max) = if min_delay_minutes <= max_delay_minutes {
            (min_delay_minutes, max_delay_minutes)
        } else {
            (max_delay_minutes, min_delay_minutes)
        };
        Self {
            min_delay_minutes: min,
            max_delay_minutes: max,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 固定种子，测试用
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn delay_bounds(&self) -> (u32, u32) {
        (self.min_delay_minutes, self.max_delay_minutes)
    }

    pub fn jitter_minutes(&self) -> u32 {
        let range = self.min_delay_minutes..=self.max_delay_minutes;
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(range),
            Err(_) => rand::thread_rng().gen_range(range),
        }
    }

    pub fn schedule(
        &self,
        text: &str,
        post_id: &str,
        author: &str,
        now: DateTime<Utc>,
    ) -> ReplyTask {
        let delay = self.jitter_minutes();
        ReplyTask::new(
            post_id,
            author,
            text,
            now,
            now + Duration::minutes(i64::from(delay)),
        )
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY_MINUTES, DEFAULT_MAX_DELAY_MINUTES)
    }
}
