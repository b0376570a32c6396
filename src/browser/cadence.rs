//! 拟人化打字节奏
//!
//! 每个字符 40–140ms 间隔，另有 5% 概率额外停顿 200–500ms。

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct TypingCadence {
    pub min_char_delay_ms: u64,
    pub max_char_delay_ms: u64,
    pub pause_probability: f64,
    pub min_pause_ms: u64,
    pub max_pause_ms: u64,
}

impl Default for TypingCadence {
    fn default() -> Self {
        Self {
            min_char_delay_ms: 40,
            max_char_delay_ms: 140,
            pause_probability: 0.05,
            min_pause_ms: 200,
            max_pause_ms: 500,
        }
    }
}

/// 单个按键：字符 + 按下前的等待
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keystroke {
    pub ch: char,
    pub delay: Duration,
}

impl TypingCadence {
    /// 零延迟，测试用
    pub fn instant() -> Self {
        Self {
            min_char_delay_ms: 0,
            max_char_delay_ms: 0,
            pause_probability: 0.0,
            min_pause_ms: 0,
            max_pause_ms: 0,
        }
    }

    pub fn keystroke_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let mut ms = sample(rng, self.min_char_delay_ms, self.max_char_delay_ms);
        if self.pause_probability > 0.0 && rng.gen_bool(self.pause_probability.min(1.0)) {
            ms += sample(rng, self.min_pause_ms, self.max_pause_ms);
        }
        Duration::from_millis(ms)
    }

    /// 为整段文本生成按键计划
    pub fn plan<R: Rng>(&self, text: &str, rng: &mut R) -> Vec<Keystroke> {
        text.chars()
            .map(|ch| Keystroke {
                ch,
                delay: self.keystroke_delay(rng),
            })
            .collect()
    }
}

fn sample<R: Rng>(rng: &mut R, lo: u64, hi: u64) -> u64 {
    if lo >= hi {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}
