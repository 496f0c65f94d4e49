//! Coarse progress reporting on stderr.

use std::io::Write;
use std::time::{Duration, Instant};

const RENDER_INTERVAL: Duration = Duration::from_millis(100);

/// Counts finished expressions and repaints a single stderr line at most
/// ten times a second. Stdout stays untouched, so piped JSONL output is
/// unaffected.
pub struct Progress {
    total: u128,
    done: u64,
    enabled: bool,
    last_render: Instant,
}

impl Progress {
    pub fn new(total: u128, enabled: bool) -> Self {
        Self {
            total,
            done: 0,
            enabled,
            last_render: Instant::now() - RENDER_INTERVAL,
        }
    }

    pub fn tick(&mut self) {
        self.done += 1;
        if !self.enabled {
            return;
        }
        if self.last_render.elapsed() >= RENDER_INTERVAL {
            self.render();
        }
    }

    pub fn finish(&mut self) {
        if !self.enabled {
            return;
        }
        self.render();
        let _ = writeln!(std::io::stderr());
    }

    fn render(&mut self) {
        self.last_render = Instant::now();
        let _ = write!(std::io::stderr(), "\r{}/{} expressions", self.done, self.total);
        let _ = std::io::stderr().flush();
    }

    pub fn done(&self) -> u64 {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_progress_still_counts() {
        let mut progress = Progress::new(10, false);
        for _ in 0..4 {
            progress.tick();
        }
        assert_eq!(progress.done(), 4);
    }
}
