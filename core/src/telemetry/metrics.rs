use std::sync::Mutex;

/// Per-invocation pixel accounting. Degenerate pixels are NaN-filled and
/// otherwise silent; these counters make them observable.
pub struct PixelMetrics {
    inner: Mutex<Counts>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub estimated: usize,
    pub degenerate: usize,
}

impl PixelMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Counts::default()),
        }
    }

    pub fn record_estimated(&self) {
        if let Ok(mut counts) = self.inner.lock() {
            counts.estimated += 1;
        }
    }

    pub fn record_degenerate(&self) {
        if let Ok(mut counts) = self.inner.lock() {
            counts.degenerate += 1;
        }
    }

    pub fn snapshot(&self) -> Counts {
        self.inner.lock().map(|c| *c).unwrap_or_default()
    }
}

impl Default for PixelMetrics {
    fn default() -> Self {
        Self::new()
    }
}
