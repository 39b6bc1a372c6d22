use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Helper that wraps the `rustfft` planner for reuse across snapshots.
pub struct FftHelper {
    fft: Arc<dyn Fft<f64>>,
    size: usize,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        Self { fft, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward DFT of a complex sequence, zero-padded or truncated to the
    /// planned length.
    pub fn forward(&self, input: &[Complex64]) -> Vec<Complex64> {
        let mut buffer = vec![Complex64::zero(); self.size];
        for (dst, src) in buffer.iter_mut().zip(input.iter()) {
            *dst = *src;
        }
        self.fft.process(&mut buffer);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_transforms_to_flat_spectrum() {
        let helper = FftHelper::new(4);
        let spectrum = helper.forward(&[Complex64::new(1.0, 0.0)]);
        assert_eq!(spectrum.len(), 4);
        for bin in spectrum {
            assert!((bin.re - 1.0).abs() < 1e-12);
            assert!(bin.im.abs() < 1e-12);
        }
    }

    #[test]
    fn tone_concentrates_in_one_bin() {
        let helper = FftHelper::new(8);
        let tone: Vec<Complex64> = (0..8)
            .map(|n| Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * n as f64 / 8.0))
            .collect();
        let spectrum = helper.forward(&tone);
        assert!((spectrum[1].norm() - 8.0).abs() < 1e-9);
        assert!(spectrum[0].norm() < 1e-9);
    }
}
