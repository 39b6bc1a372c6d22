use num_complex::Complex64;

use crate::{ProcError, ProcResult};

/// Scoped buffer pool for snapshot assembly; keeps the pixel loop from
/// allocating an unbounded number of scratch vectors.
pub struct SnapshotPool {
    buffers: Vec<Vec<Complex64>>,
    max_buffers: usize,
    outstanding: usize,
}

impl SnapshotPool {
    pub fn with_capacity(max_buffers: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_buffers),
            max_buffers,
            outstanding: 0,
        }
    }

    /// Hands out a zeroed buffer from the pool, or a fresh one while the
    /// outstanding count stays within the configured limit.
    pub fn checkout(&mut self, length: usize) -> ProcResult<Vec<Complex64>> {
        if let Some(mut buffer) = self.buffers.pop() {
            buffer.clear();
            buffer.resize(length, Complex64::new(0.0, 0.0));
            self.outstanding += 1;
            return Ok(buffer);
        }
        if self.outstanding < self.max_buffers {
            self.outstanding += 1;
            Ok(vec![Complex64::new(0.0, 0.0); length])
        } else {
            Err(ProcError::BufferExhaustion("snapshot pool depleted".into()))
        }
    }

    /// Returns a buffer for reuse.
    pub fn release(&mut self, mut buffer: Vec<Complex64>) {
        buffer.clear();
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.buffers.len() < self.max_buffers {
            self.buffers.push(buffer);
        }
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
        self.outstanding = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_release_recycles_buffers() {
        let mut pool = SnapshotPool::with_capacity(2);
        let a = pool.checkout(8).unwrap();
        assert_eq!(a.len(), 8);
        pool.release(a);
        let b = pool.checkout(4).unwrap();
        assert_eq!(b.len(), 4);
        assert!(b.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn pool_limits_outstanding_buffers() {
        let mut pool = SnapshotPool::with_capacity(1);
        let a = pool.checkout(4).unwrap();
        assert!(matches!(
            pool.checkout(4),
            Err(ProcError::BufferExhaustion(_))
        ));
        pool.release(a);
        assert!(pool.checkout(4).is_ok());
    }
}
