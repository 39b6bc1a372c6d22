use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Amplitude taper applied across the channel dimension by the
/// periodogram estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Window {
    Rectangular,
    Hann,
}

impl Window {
    pub fn weights(&self, n: usize) -> Vec<f64> {
        match self {
            Window::Rectangular => vec![1.0; n],
            Window::Hann => {
                if n <= 1 {
                    return vec![1.0; n];
                }
                let nm1 = (n - 1) as f64;
                (0..n)
                    .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / nm1).cos())
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangular_weights_are_all_one() {
        assert_eq!(Window::Rectangular.weights(4), vec![1.0; 4]);
    }

    #[test]
    fn hann_is_symmetric_and_zero_at_edges() {
        let w = Window::Hann.weights(5);
        assert!(w[0].abs() < 1e-12);
        assert!(w[4].abs() < 1e-12);
        assert!((w[1] - w[3]).abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_lengths_do_not_divide_by_zero() {
        assert_eq!(Window::Hann.weights(1), vec![1.0]);
        assert!(Window::Hann.weights(0).is_empty());
    }
}
