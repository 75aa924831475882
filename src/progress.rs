use std::time::Instant;

use tracing::info;

/// Chunk-level progress lines, emitted through `tracing`.
pub struct RunProgress {
    enabled: bool,
    t0: Instant,
}

impl RunProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> String {
        fmt_elapsed(self.t0.elapsed().as_secs_f64())
    }

    pub fn chunk(&self, current: usize, total: usize, pairs: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        info!(
            elapsed = %self.elapsed(),
            pairs,
            "chunk {current}/{total} ({pct:5.1}%)"
        );
    }
}

pub fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
