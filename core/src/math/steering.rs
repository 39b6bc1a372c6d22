use nalgebra::DMatrix;
use ndarray::ArrayView1;
use num_complex::Complex64;
use std::f64::consts::PI;

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Array-manifold vectors for a set of arrival angles.
///
/// Column `a` is the unit-norm response of the array to a plane wave from
/// `angles[a]` radians off boresight:
/// `exp(i*k*(y*sin(theta) - z*cos(theta))) / sqrt(nchan)` with
/// `k = 4*pi*f/c` (two-way propagation). The same evaluation serves the
/// uniform grid and arbitrary continuous optimizer queries.
pub fn generate(
    angles: &[f64],
    carrier_freq_hz: f64,
    y_positions: ArrayView1<f64>,
    z_positions: ArrayView1<f64>,
) -> DMatrix<Complex64> {
    let nchan = y_positions.len();
    debug_assert_eq!(nchan, z_positions.len());
    let k = 4.0 * PI * carrier_freq_hz / SPEED_OF_LIGHT;
    let scale = 1.0 / (nchan as f64).sqrt();
    DMatrix::from_fn(nchan, angles.len(), |ch, a| {
        let (sin_t, cos_t) = angles[a].sin_cos();
        let phase = k * (y_positions[ch] * sin_t - z_positions[ch] * cos_t);
        Complex64::from_polar(scale, phase)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    fn half_wavelength_array(nchan: usize, fc: f64) -> (Array1<f64>, Array1<f64>) {
        // lambda/2 spacing for the two-way wavenumber, cross-track only.
        let spacing = SPEED_OF_LIGHT / fc / 4.0;
        let y = Array1::from_iter((0..nchan).map(|c| c as f64 * spacing));
        let z = Array1::zeros(nchan);
        (y, z)
    }

    #[test]
    fn steering_vectors_are_unit_norm() {
        let fc = 195e6;
        let (y, z) = half_wavelength_array(8, fc);
        let sv = generate(&[-0.4, 0.0, 0.3], fc, y.view(), z.view());
        for a in 0..3 {
            let norm: f64 = sv.column(a).iter().map(|v| v.norm_sqr()).sum();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn broadside_vector_has_common_phase() {
        let fc = 195e6;
        let (y, z) = half_wavelength_array(4, fc);
        let sv = generate(&[0.0], fc, y.view(), z.view());
        // sin(0) = 0 and z = 0, so every channel carries the same phase.
        let first = sv[(0, 0)];
        for ch in 1..4 {
            assert_relative_eq!(sv[(ch, 0)].re, first.re, epsilon = 1e-12);
            assert_relative_eq!(sv[(ch, 0)].im, first.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn grid_and_continuous_queries_agree() {
        let fc = 195e6;
        let (y, z) = half_wavelength_array(6, fc);
        let theta = 0.271828;
        let grid = generate(&[-0.1, theta, 0.5], fc, y.view(), z.view());
        let single = generate(&[theta], fc, y.view(), z.view());
        for ch in 0..6 {
            assert_relative_eq!(grid[(ch, 1)].re, single[(ch, 0)].re, epsilon = 1e-14);
            assert_relative_eq!(grid[(ch, 1)].im, single[(ch, 0)].im, epsilon = 1e-14);
        }
    }
}
