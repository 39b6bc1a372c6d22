use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::math::linalg;
use crate::{ProcError, ProcResult};

const POWER_ITERATIONS: usize = 30;

fn row_mean_power(y: &DMatrix<Complex64>) -> Vec<f64> {
    let nsnap = y.ncols().max(1);
    (0..y.nrows())
        .map(|r| y.row(r).iter().map(|v| v.norm_sqr()).sum::<f64>() / nsnap as f64)
        .collect()
}

fn average_spectra(spectra: Vec<Vec<f64>>) -> Vec<f64> {
    let count = spectra.len().max(1) as f64;
    let mut out = vec![0.0; spectra.first().map_or(0, Vec::len)];
    for spectrum in &spectra {
        for (dst, src) in out.iter_mut().zip(spectrum) {
            *dst += src / count;
        }
    }
    out
}

fn loaded_inverse(
    snapshots: &DMatrix<Complex64>,
    load: f64,
) -> ProcResult<DMatrix<Complex64>> {
    let mut cov = snapshot_covariance(snapshots)?;
    linalg::diagonal_load(&mut cov, load);
    linalg::invert(cov)
        .ok_or_else(|| ProcError::Degenerate("singular covariance matrix".into()))
}

fn snapshot_covariance(snapshots: &DMatrix<Complex64>) -> ProcResult<DMatrix<Complex64>> {
    super::snapshot::sample_covariance(snapshots)
        .ok_or_else(|| ProcError::Degenerate("empty snapshot support".into()))
}

/// Periodogram: mean over snapshots of |sv^H x|^2. No matrix inverse; the
/// channel taper is applied during snapshot extraction.
pub fn periodogram(
    ml_snapshots: &[DMatrix<Complex64>],
    steering: &[DMatrix<Complex64>],
) -> ProcResult<Vec<f64>> {
    let mut spectra = Vec::with_capacity(ml_snapshots.len());
    for (x, s) in ml_snapshots.iter().zip(steering) {
        if x.ncols() == 0 {
            return Err(ProcError::Degenerate("empty snapshot support".into()));
        }
        spectra.push(row_mean_power(&(s.adjoint() * x)));
    }
    Ok(average_spectra(spectra))
}

/// MVDR. The closed form `1 / Re(sv^H R^-1 sv)` serves the common case;
/// when the covariance neighborhood differs from the multilook one the
/// two-stage variant applies the adaptive weights to the multilook
/// snapshots, normalized by each weight vector's response to its own
/// steering vector.
pub fn mvdr(
    ml_snapshots: &[DMatrix<Complex64>],
    cov_snapshots: &[DMatrix<Complex64>],
    steering: &[DMatrix<Complex64>],
    diagonal_load: f64,
    two_stage: bool,
) -> ProcResult<Vec<f64>> {
    let mut spectra = Vec::with_capacity(cov_snapshots.len());
    for ((x_ml, x_cov), s) in ml_snapshots.iter().zip(cov_snapshots).zip(steering) {
        let rinv = loaded_inverse(x_cov, diagonal_load)?;
        let nsv = s.ncols();
        let mut spectrum = Vec::with_capacity(nsv);
        for a in 0..nsv {
            let sv: DVector<Complex64> = s.column(a).clone_owned();
            let w = &rinv * &sv;
            let denom = sv.dotc(&w).re;
            if !denom.is_finite() || denom <= 0.0 {
                return Err(ProcError::Degenerate(
                    "non-positive MVDR denominator".into(),
                ));
            }
            if two_stage {
                if x_ml.ncols() == 0 {
                    return Err(ProcError::Degenerate("empty snapshot support".into()));
                }
                let wn = w.unscale(denom);
                let y = wn.adjoint() * x_ml;
                spectrum.push(
                    y.iter().map(|v| v.norm_sqr()).sum::<f64>() / x_ml.ncols() as f64,
                );
            } else {
                spectrum.push(1.0 / denom);
            }
        }
        spectra.push(spectrum);
    }
    Ok(average_spectra(spectra))
}

/// Robust MVDR: perturbs the steering-vector outer product into a
/// rank-deficient matrix and takes the dominant eigenvector of
/// `R^-1 * B` as the adaptive weight, mitigating steering mismatch.
pub fn robust_mvdr(
    ml_snapshots: &[DMatrix<Complex64>],
    cov_snapshots: &[DMatrix<Complex64>],
    steering: &[DMatrix<Complex64>],
    diagonal_load: f64,
    mismatch_fraction: f64,
) -> ProcResult<Vec<f64>> {
    let mut spectra = Vec::with_capacity(cov_snapshots.len());
    for ((x_ml, x_cov), s) in ml_snapshots.iter().zip(cov_snapshots).zip(steering) {
        if x_ml.ncols() == 0 {
            return Err(ProcError::Degenerate("empty snapshot support".into()));
        }
        let rinv = loaded_inverse(x_cov, diagonal_load)?;
        let nchan = s.nrows();
        let mut spectrum = Vec::with_capacity(s.ncols());
        for a in 0..s.ncols() {
            let sv: DVector<Complex64> = s.column(a).clone_owned();
            let mut perturbed = &sv * sv.adjoint();
            let frobenius = perturbed.norm();
            for i in 0..nchan {
                perturbed[(i, i)] -= Complex64::new(mismatch_fraction * frobenius, 0.0);
            }
            let w = linalg::dominant_eigenvector(&(&rinv * &perturbed), POWER_ITERATIONS);
            let response = sv.dotc(&w);
            let wn = if response.norm() > 1e-12 {
                w * (Complex64::new(1.0, 0.0) / response)
            } else {
                // Mismatch perturbation annihilated the response; fall
                // back to the plain MVDR weight.
                let w = &rinv * &sv;
                let denom = sv.dotc(&w).re;
                if denom <= 0.0 {
                    return Err(ProcError::Degenerate(
                        "non-positive MVDR denominator".into(),
                    ));
                }
                w.unscale(denom)
            };
            let y = wn.adjoint() * x_ml;
            spectrum.push(y.iter().map(|v| v.norm_sqr()).sum::<f64>() / x_ml.ncols() as f64);
        }
        spectra.push(spectrum);
    }
    Ok(average_spectra(spectra))
}

/// MUSIC pseudospectrum: reciprocal of the mean projection onto the
/// noise subspace, the `nchan - nsrc` eigenvectors with the smallest
/// eigenvalues.
pub fn music(
    cov_snapshots: &[DMatrix<Complex64>],
    steering: &[DMatrix<Complex64>],
    nsrc: usize,
) -> ProcResult<Vec<f64>> {
    let mut spectra = Vec::with_capacity(cov_snapshots.len());
    for (x, s) in cov_snapshots.iter().zip(steering) {
        let cov = snapshot_covariance(x)?;
        let nchan = cov.nrows();
        if nsrc >= nchan {
            return Err(ProcError::Degenerate(
                "noise subspace is empty: nsrc >= nchan".into(),
            ));
        }
        let (_, eigenvectors) = linalg::hermitian_eig(cov);
        let noise_dims = nchan - nsrc;
        let mut spectrum = Vec::with_capacity(s.ncols());
        for a in 0..s.ncols() {
            let sv: DVector<Complex64> = s.column(a).clone_owned();
            let mut leakage = 0.0;
            for c in 0..noise_dims {
                let e: DVector<Complex64> = eigenvectors.column(c).clone_owned();
                leakage += e.dotc(&sv).norm_sqr();
            }
            spectrum.push(noise_dims as f64 / leakage);
        }
        spectra.push(spectrum);
    }
    Ok(average_spectra(spectra))
}

/// RISR: fixed-count iterative re-estimation alternating between a
/// diagonal signal-power-density matrix from the current weight outputs
/// and a re-solved regularized weight matrix.
pub fn risr(
    ml_snapshots: &[DMatrix<Complex64>],
    steering: &[DMatrix<Complex64>],
    iterations: usize,
    diagonal_load: f64,
) -> ProcResult<Vec<f64>> {
    let mut spectra = Vec::with_capacity(ml_snapshots.len());
    for (x, s) in ml_snapshots.iter().zip(steering) {
        if x.ncols() == 0 {
            return Err(ProcError::Degenerate("empty snapshot support".into()));
        }
        let nchan = s.nrows() as f64;
        let nsv = s.ncols();
        let mut weights = s.clone().unscale(nchan);
        for _ in 0..iterations {
            let outputs = weights.adjoint() * x;
            let density = row_mean_power(&outputs);
            let pdiag = DMatrix::from_diagonal(&DVector::from_iterator(
                nsv,
                density.iter().map(|&p| Complex64::new(p, 0.0)),
            ));
            let mut model = s * &pdiag * s.adjoint();
            linalg::diagonal_load(&mut model, diagonal_load.max(1e-9));
            let inverse = linalg::invert(model).ok_or_else(|| {
                ProcError::Degenerate("singular RISR model covariance".into())
            })?;
            weights = inverse * s * &pdiag;
        }
        spectra.push(row_mean_power(&(weights.adjoint() * x)));
    }
    Ok(average_spectra(spectra))
}

/// Image-pixel reduction: max power over the angle-of-interest subset,
/// falling back to the single angle nearest the subset midpoint when the
/// range selects no grid angle.
pub fn reduce_spectrum(spectrum: &[f64], angles: &[f64], theta_rng: Option<(f64, f64)>) -> f64 {
    match theta_rng {
        None => spectrum
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max),
        Some((lo, hi)) => {
            let best = angles
                .iter()
                .zip(spectrum)
                .filter(|(a, _)| **a >= lo && **a <= hi)
                .map(|(_, p)| *p)
                .fold(f64::NEG_INFINITY, f64::max);
            if best > f64::NEG_INFINITY {
                return best;
            }
            let mid = 0.5 * (lo + hi);
            let nearest = angles
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    (*a - mid)
                        .abs()
                        .partial_cmp(&(*b - mid).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);
            nearest.map_or(f64::NAN, |i| spectrum[i])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::steering;
    use ndarray::Array1;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const FC: f64 = 195e6;

    fn ula(nchan: usize) -> (Array1<f64>, Array1<f64>) {
        let spacing = steering::SPEED_OF_LIGHT / FC / 4.0;
        (
            Array1::from_iter((0..nchan).map(|c| c as f64 * spacing)),
            Array1::zeros(nchan),
        )
    }

    fn sine_grid(nsv: usize) -> Vec<f64> {
        (0..nsv)
            .map(|i| (-1.0 + 2.0 * i as f64 / (nsv - 1) as f64).clamp(-1.0, 1.0).asin())
            .collect()
    }

    fn plane_wave(
        theta: f64,
        nchan: usize,
        nsnap: usize,
        noise: f64,
        seed: u64,
    ) -> DMatrix<Complex64> {
        let (y, z) = ula(nchan);
        let sv = steering::generate(&[theta], FC, y.view(), z.view());
        let mut rng = StdRng::seed_from_u64(seed);
        DMatrix::from_fn(nchan, nsnap, |ch, _| sv[(ch, 0)])
            .map_with_location(|ch, s, v| {
                // One random phase per snapshot, shared across channels.
                let _ = ch;
                let phase = (s as f64 * 0.37).sin() * std::f64::consts::PI;
                v * Complex64::from_polar((nchan as f64).sqrt(), phase)
            })
            .map(|v| {
                v + Complex64::new(
                    noise * (rng.gen::<f64>() - 0.5),
                    noise * (rng.gen::<f64>() - 0.5),
                )
            })
    }

    fn grid_steering(grid: &[f64], nchan: usize) -> DMatrix<Complex64> {
        let (y, z) = ula(nchan);
        steering::generate(grid, FC, y.view(), z.view())
    }

    fn peak_angle(spectrum: &[f64], grid: &[f64]) -> f64 {
        let (idx, _) = spectrum
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .unwrap();
        grid[idx]
    }

    #[test]
    fn periodogram_peaks_at_source_angle() {
        let theta = 15f64.to_radians();
        let grid = sine_grid(65);
        let snaps = plane_wave(theta, 8, 32, 0.05, 1);
        let spectrum = periodogram(&[snaps], &[grid_steering(&grid, 8)]).unwrap();
        let grid_step = 2.0 / 64.0 / (1.0 - theta.sin() * theta.sin()).sqrt();
        assert!((peak_angle(&spectrum, &grid) - theta).abs() <= grid_step);
    }

    #[test]
    fn mvdr_peaks_at_source_angle() {
        let theta = 15f64.to_radians();
        let grid = sine_grid(65);
        let snaps = plane_wave(theta, 8, 64, 0.2, 2);
        let spectrum =
            mvdr(&[snaps.clone()], &[snaps], &[grid_steering(&grid, 8)], 1e-3, false).unwrap();
        let grid_step = 2.0 / 64.0 / (1.0 - theta.sin() * theta.sin()).sqrt();
        assert!((peak_angle(&spectrum, &grid) - theta).abs() <= grid_step);
    }

    #[test]
    fn mvdr_spectrum_shape_survives_uniform_channel_gain() {
        let theta = -10f64.to_radians();
        let grid = sine_grid(33);
        let snaps = plane_wave(theta, 6, 48, 0.1, 3);
        let steering = grid_steering(&grid, 6);

        // Unit-modulus gain leaves the normalized output bit-identical.
        let rotated = snaps.map(|v| v * Complex64::from_polar(1.0, 0.7));
        let base = mvdr(&[snaps.clone()], &[snaps.clone()], &[steering.clone()], 1e-3, false).unwrap();
        let spun = mvdr(&[rotated.clone()], &[rotated], &[steering.clone()], 1e-3, false).unwrap();
        for (a, b) in base.iter().zip(&spun) {
            assert!((a - b).abs() <= 1e-9 * a.abs());
        }

        // Amplitude gain rescales every angle identically, preserving the
        // normalized shape.
        let scaled = snaps.map(|v| v * Complex64::new(3.0, 0.0));
        let boosted = mvdr(&[scaled.clone()], &[scaled], &[steering], 1e-3, false).unwrap();
        let ratio = boosted[0] / base[0];
        for (a, b) in base.iter().zip(&boosted) {
            assert!((b / a - ratio).abs() < 1e-6 * ratio.abs());
        }
    }

    #[test]
    fn two_stage_mvdr_matches_closed_form_peak() {
        let theta = 20f64.to_radians();
        let grid = sine_grid(65);
        let snaps = plane_wave(theta, 8, 64, 0.2, 4);
        let closed =
            mvdr(&[snaps.clone()], &[snaps.clone()], &[grid_steering(&grid, 8)], 1e-3, false)
                .unwrap();
        let staged =
            mvdr(&[snaps.clone()], &[snaps], &[grid_steering(&grid, 8)], 1e-3, true).unwrap();
        assert_eq!(peak_angle(&closed, &grid), peak_angle(&staged, &grid));
    }

    #[test]
    fn robust_mvdr_peaks_at_source_angle() {
        let theta = 15f64.to_radians();
        let grid = sine_grid(65);
        let snaps = plane_wave(theta, 8, 64, 0.2, 5);
        let spectrum = robust_mvdr(
            &[snaps.clone()],
            &[snaps],
            &[grid_steering(&grid, 8)],
            1e-3,
            0.1,
        )
        .unwrap();
        let grid_step = 2.0 / 64.0 / (1.0 - theta.sin() * theta.sin()).sqrt();
        assert!((peak_angle(&spectrum, &grid) - theta).abs() <= grid_step);
    }

    #[test]
    fn music_peaks_at_source_angle() {
        let theta = 15f64.to_radians();
        let grid = sine_grid(65);
        let snaps = plane_wave(theta, 8, 64, 0.2, 6);
        let spectrum = music(&[snaps], &[grid_steering(&grid, 8)], 1).unwrap();
        let grid_step = 2.0 / 64.0 / (1.0 - theta.sin() * theta.sin()).sqrt();
        assert!((peak_angle(&spectrum, &grid) - theta).abs() <= grid_step);
    }

    #[test]
    fn music_pseudospectrum_grows_as_noise_subspace_collapses() {
        let theta = 5f64.to_radians();
        let grid = sine_grid(65);
        let snaps = plane_wave(theta, 8, 64, 0.3, 7);
        let steering = grid_steering(&grid, 8);
        let narrow = music(&[snaps.clone()], &[steering.clone()], 1).unwrap();
        let collapsed = music(&[snaps], &[steering], 7).unwrap();
        let peak_narrow = narrow.iter().cloned().fold(f64::MIN, f64::max);
        let peak_collapsed = collapsed.iter().cloned().fold(f64::MIN, f64::max);
        assert!(peak_collapsed > peak_narrow);
    }

    #[test]
    fn risr_peaks_at_source_angle() {
        let theta = 15f64.to_radians();
        let grid = sine_grid(65);
        let snaps = plane_wave(theta, 8, 64, 0.1, 8);
        let spectrum = risr(&[snaps], &[grid_steering(&grid, 8)], 10, 1e-2).unwrap();
        let grid_step = 2.0 / 64.0 / (1.0 - theta.sin() * theta.sin()).sqrt();
        assert!((peak_angle(&spectrum, &grid) - theta).abs() <= grid_step);
    }

    #[test]
    fn reduce_takes_max_inside_angle_range() {
        let angles = vec![-0.4, -0.2, 0.0, 0.2, 0.4];
        let spectrum = vec![9.0, 1.0, 2.0, 5.0, 3.0];
        assert_eq!(reduce_spectrum(&spectrum, &angles, Some((-0.25, 0.45))), 5.0);
        assert_eq!(reduce_spectrum(&spectrum, &angles, None), 9.0);
    }

    #[test]
    fn reduce_falls_back_to_nearest_midpoint_angle() {
        let angles = vec![-0.4, 0.0, 0.4];
        let spectrum = vec![9.0, 2.0, 3.0];
        // Range selects no grid angle; midpoint 0.25 is nearest 0.4.
        assert_eq!(reduce_spectrum(&spectrum, &angles, Some((0.2, 0.3))), 3.0);
    }
}
