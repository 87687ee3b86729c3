//! Phase timing

use std::time::Instant;

use tracing::info;

/// Timer for a named pipeline phase. Logs the elapsed time when finished.
pub struct PhaseTimer {
    name: &'static str,
    start: Instant,
}

impl PhaseTimer {
    pub fn start(name: &'static str) -> Self {
        info!("{} started", name);
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let secs = self.start.elapsed().as_secs_f64();
        info!("{} finished in {:.1}s", self.name, secs);
    }
}
