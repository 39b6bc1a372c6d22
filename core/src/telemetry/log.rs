use log::{debug, info};

pub struct LogManager;

impl LogManager {
    pub fn new() -> Self {
        Self
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
    }

    /// Per-line progress; kept at debug so long invocations stay quiet
    /// under the default filter.
    pub fn record_line(&self, line: usize, bins: usize) {
        debug!("line {} processed ({} output bins)", line, bins);
    }

    pub fn record_degenerate(&self, bin: usize, line: usize, reason: &str) {
        debug!("pixel ({}, {}) degenerate: {}", bin, line, reason);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
