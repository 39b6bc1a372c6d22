use nalgebra::DMatrix;
use ndarray::ArrayView1;
use num_complex::Complex64;

use crate::config::{ConstraintMethod, DoaConstraint, Initializer, OptimizerOptions};
use crate::interface::DelayTable;
use crate::math::optim::{self, Bounds, CostFunction, MinimizerOptions};
use crate::math::{linalg, steering};
use crate::{ProcError, ProcResult};

/// Sensor geometry plus carrier frequency: everything a cost function
/// needs to evaluate the array manifold at an arbitrary query angle.
#[derive(Clone)]
pub struct SteeringGeom<'a> {
    pub carrier_freq_hz: f64,
    pub y: ArrayView1<'a, f64>,
    pub z: ArrayView1<'a, f64>,
}

impl<'a> SteeringGeom<'a> {
    pub fn matrix(&self, angles: &[f64]) -> DMatrix<Complex64> {
        steering::generate(angles, self.carrier_freq_hz, self.y.view(), self.z.view())
    }
}

/// Steering used by one covariance term: a plain narrowband manifold, or
/// the space-frequency stacked manifold matching a stacked covariance
/// (one block per subband frequency).
pub enum TermSteering<'a> {
    Narrowband(SteeringGeom<'a>),
    Stacked(Vec<SteeringGeom<'a>>),
}

impl<'a> TermSteering<'a> {
    pub fn matrix(&self, angles: &[f64]) -> DMatrix<Complex64> {
        match self {
            TermSteering::Narrowband(geom) => geom.matrix(angles),
            TermSteering::Stacked(geoms) => {
                let blocks: Vec<DMatrix<Complex64>> =
                    geoms.iter().map(|g| g.matrix(angles)).collect();
                let nchan = blocks[0].nrows();
                let scale = Complex64::new(1.0 / (geoms.len() as f64).sqrt(), 0.0);
                DMatrix::from_fn(nchan * geoms.len(), angles.len(), |r, c| {
                    blocks[r / nchan][(r % nchan, c)] * scale
                })
            }
        }
    }
}

/// One covariance matrix with its matching steering model. Multilook
/// sources contribute terms weighted `1/n_ml` (average); wideband
/// subbands contribute unit-weight terms (power sums across subbands).
pub struct CostTerm<'a> {
    pub covariance: DMatrix<Complex64>,
    pub steering: TermSteering<'a>,
    pub weight: f64,
}

/// Gaussian prior from sequential estimation, pulling the solution toward
/// the previous bin's extrapolated angles.
#[derive(Debug, Clone)]
pub struct GaussianPrior {
    pub mean: Vec<f64>,
    pub sigma_rad: f64,
}

/// Negative-log-likelihood-style projection cost: the signal power the
/// hypothesized manifold fails to capture, summed over terms. Zero for a
/// perfect noiseless fit, so "near-zero cost" reads as a good estimate.
pub struct ProjectionCost<'a> {
    pub terms: Vec<CostTerm<'a>>,
    pub prior: Option<GaussianPrior>,
}

impl CostFunction for ProjectionCost<'_> {
    fn evaluate(&self, angles: &[f64]) -> f64 {
        let mut cost = 0.0;
        for term in &self.terms {
            let a = term.steering.matrix(angles);
            let gram = a.adjoint() * &a;
            let gram_inv = match linalg::invert(gram) {
                Some(inv) => inv,
                // Coincident angles collapse the Gram matrix; report an
                // unusable hypothesis rather than failing the pixel.
                None => return f64::INFINITY,
            };
            let cross = a.adjoint() * &term.covariance * &a;
            let captured = (gram_inv * cross).trace().re;
            let total = term.covariance.trace().re;
            cost += term.weight * (total - captured);
        }
        if let Some(prior) = &self.prior {
            for (&angle, &mean) in angles.iter().zip(&prior.mean) {
                let pull = (angle - mean) / prior.sigma_rad;
                cost += pull * pull;
            }
        }
        cost
    }
}

/// MUSIC objective for the MUSIC-DOA estimator: total leakage of the
/// hypothesized manifold into the noise subspace, summed over sources and
/// terms. Zero when every hypothesized angle lies exactly in the signal
/// subspace.
pub struct MusicCost<'a> {
    /// (noise-subspace eigenvector block, geometry) per multilook source.
    pub terms: Vec<(DMatrix<Complex64>, SteeringGeom<'a>)>,
}

impl CostFunction for MusicCost<'_> {
    fn evaluate(&self, angles: &[f64]) -> f64 {
        let mut cost = 0.0;
        for (noise, geom) in &self.terms {
            let a = geom.matrix(angles);
            let projected = noise.adjoint() * &a;
            let dims = noise.ncols().max(1) as f64;
            cost += projected.iter().map(|v| v.norm_sqr()).sum::<f64>() / dims;
        }
        cost
    }
}

/// Noise subspace of a covariance matrix: the eigenvectors belonging to
/// the `nchan - nsrc` smallest eigenvalues.
pub fn noise_subspace(
    covariance: DMatrix<Complex64>,
    nsrc: usize,
) -> ProcResult<DMatrix<Complex64>> {
    let nchan = covariance.nrows();
    if nsrc >= nchan {
        return Err(ProcError::Degenerate(
            "noise subspace is empty: nsrc >= nchan".into(),
        ));
    }
    let (_, eigenvectors) = linalg::hermitian_eig(covariance);
    Ok(eigenvectors.columns(0, nchan - nsrc).clone_owned())
}

/// Least-squares per-source powers at the recovered angles:
/// `diag((A^H A)^-1 A^H R A (A^H A)^-1)`, combined across terms by their
/// weights.
pub fn source_powers(cost: &ProjectionCost, angles: &[f64]) -> Vec<f64> {
    let mut powers = vec![0.0; angles.len()];
    for term in &cost.terms {
        let a = term.steering.matrix(angles);
        let gram = a.adjoint() * &a;
        let gram_inv = match linalg::invert(gram) {
            Some(inv) => inv,
            None => continue,
        };
        let estimator = &gram_inv * a.adjoint();
        let projected = &estimator * &term.covariance * estimator.adjoint();
        for (s, power) in powers.iter_mut().enumerate() {
            *power += term.weight * projected[(s, s)].re;
        }
    }
    powers
}

/// Per-pixel references the constraint bounds are computed from.
pub struct BoundContext<'a> {
    /// Round-trip time of the current range bin.
    pub twtt_bin: f64,
    /// Surface round-trip time at the current line.
    pub surface_twtt: Option<f64>,
    pub layer_table: Option<&'a DelayTable>,
}

fn constraint_center(method: ConstraintMethod, ctx: &BoundContext) -> ProcResult<f64> {
    match method {
        ConstraintMethod::Fixed => Ok(0.0),
        ConstraintMethod::SurfaceLeft | ConstraintMethod::SurfaceRight => {
            let surface = ctx.surface_twtt.ok_or_else(|| {
                ProcError::InvalidConfig("surface constraint without surface reference".into())
            })?;
            // Flat surface: cos(theta) = t_surface / t_bin.
            let incidence = (surface / ctx.twtt_bin).clamp(0.0, 1.0).acos();
            Ok(if method == ConstraintMethod::SurfaceLeft {
                -incidence
            } else {
                incidence
            })
        }
        ConstraintMethod::LayerLeft | ConstraintMethod::LayerRight => {
            let table = ctx.layer_table.ok_or_else(|| {
                ProcError::InvalidConfig("layer constraint without delay table".into())
            })?;
            let incidence = table.incidence_at(ctx.twtt_bin);
            Ok(if method == ConstraintMethod::LayerLeft {
                -incidence
            } else {
                incidence
            })
        }
    }
}

/// Per-source angle bounds. `init` selects the initialization half-width,
/// otherwise the optimization half-width applies.
pub fn source_bounds(
    constraints: &[DoaConstraint],
    ctx: &BoundContext,
    init: bool,
) -> ProcResult<Vec<(f64, f64)>> {
    constraints
        .iter()
        .map(|constraint| {
            let center = constraint_center(constraint.method, ctx)?;
            let half = if init {
                constraint.init_half_width_rad
            } else {
                constraint.opt_half_width_rad
            };
            Ok((center - half, center + half))
        })
        .collect()
}

/// Flat-earth extrapolation of the previous bin's angles onto the current
/// bin's round-trip time: the depth `t*cos(theta)` is held constant.
pub fn extrapolate_flat_earth(prev: &[f64], twtt_prev: f64, twtt_new: f64) -> Vec<f64> {
    prev.iter()
        .map(|&angle| {
            if !angle.is_finite() || twtt_new <= 0.0 {
                return angle;
            }
            let cos_new = (twtt_prev / twtt_new * angle.cos()).clamp(-1.0, 1.0);
            cos_new.acos().copysign(angle)
        })
        .collect()
}

fn grid_search_recurse(
    cost: &dyn CostFunction,
    grid: &[f64],
    bounds: &[(f64, f64)],
    min_separation: f64,
    chosen: &mut Vec<f64>,
    best: &mut Option<(f64, Vec<f64>)>,
) {
    let depth = chosen.len();
    if depth == bounds.len() {
        let value = cost.evaluate(chosen);
        if best.as_ref().map_or(true, |(b, _)| value < *b) {
            *best = Some((value, chosen.clone()));
        }
        return;
    }
    for &angle in grid {
        if angle < bounds[depth].0 || angle > bounds[depth].1 {
            continue;
        }
        if chosen.iter().any(|&a| (a - angle).abs() < min_separation) {
            continue;
        }
        chosen.push(angle);
        grid_search_recurse(cost, grid, bounds, min_separation, chosen, best);
        chosen.pop();
    }
}

/// Exhaustive search over valid angle-grid combinations honoring the
/// per-source bounds and the separation guard. None when no combination
/// is feasible.
pub fn grid_init(
    cost: &dyn CostFunction,
    grid: &[f64],
    bounds: &[(f64, f64)],
    min_separation: f64,
) -> Option<Vec<f64>> {
    let mut best = None;
    let mut chosen = Vec::with_capacity(bounds.len());
    grid_search_recurse(cost, grid, bounds, min_separation, &mut chosen, &mut best);
    best.map(|(_, angles)| angles)
}

/// Alternating projection: one source at a time, each search excluding a
/// guard band around the sources already found, with a local 3-point
/// quadratic refinement of each grid optimum.
pub fn alternating_projection_init(
    cost: &dyn CostFunction,
    grid: &[f64],
    bounds: &[(f64, f64)],
    min_separation: f64,
) -> Option<Vec<f64>> {
    let mut found: Vec<f64> = Vec::new();
    for &(lo, hi) in bounds {
        let mut best: Option<(f64, usize)> = None;
        for (idx, &angle) in grid.iter().enumerate() {
            if angle < lo || angle > hi {
                continue;
            }
            if found.iter().any(|&a| (a - angle).abs() < min_separation) {
                continue;
            }
            found.push(angle);
            let value = cost.evaluate(&found);
            found.pop();
            if best.map_or(true, |(b, _)| value < b) {
                best = Some((value, idx));
            }
        }
        let (_, idx) = best?;
        let mut refined = grid[idx];
        if idx > 0 && idx + 1 < grid.len() {
            let mut probe = |angle: f64| {
                found.push(angle);
                let value = cost.evaluate(&found);
                found.pop();
                value
            };
            let xs = [grid[idx - 1], grid[idx], grid[idx + 1]];
            let ys = [probe(xs[0]), probe(xs[1]), probe(xs[2])];
            refined = linalg::quadratic_peak(xs, ys).clamp(lo, hi);
        }
        found.push(refined);
    }
    Some(found)
}

/// One pixel's parametric estimate.
#[derive(Debug, Clone)]
pub struct DoaOutcome {
    /// Recovered angles, sorted ascending.
    pub angles: Vec<f64>,
    pub powers: Vec<f64>,
    pub cost: f64,
    pub hessian: Vec<f64>,
}

/// Initialize -> Bound -> Optimize for one pixel. The caller supplies the
/// already-computed init and optimization bounds (sequential tightening
/// included) and maps `Degenerate` errors to a NaN pixel.
pub fn estimate_pixel(
    objective: &dyn CostFunction,
    power_cost: &ProjectionCost,
    grid: &[f64],
    init_bounds: &[(f64, f64)],
    opt_bounds: &[(f64, f64)],
    initializer: Initializer,
    optimizer: &OptimizerOptions,
    min_separation: f64,
) -> ProcResult<DoaOutcome> {
    let start = match initializer {
        Initializer::GridSearch => grid_init(objective, grid, init_bounds, min_separation),
        Initializer::AlternatingProjection => {
            alternating_projection_init(objective, grid, init_bounds, min_separation)
        }
    }
    .ok_or_else(|| ProcError::Degenerate("no feasible initialization angle".into()))?;

    let bounds = Bounds {
        lower: opt_bounds.iter().map(|b| b.0).collect(),
        upper: opt_bounds.iter().map(|b| b.1).collect(),
    };
    let minimum = optim::minimize(
        objective,
        &start,
        &bounds,
        &MinimizerOptions {
            tolerance: optimizer.tolerance_rad,
            max_sweeps: optimizer.max_sweeps,
            min_separation,
        },
    )?;
    let powers = source_powers(power_cost, &minimum.angles);

    let mut order: Vec<usize> = (0..minimum.angles.len()).collect();
    order.sort_by(|&a, &b| {
        minimum.angles[a]
            .partial_cmp(&minimum.angles[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(DoaOutcome {
        angles: order.iter().map(|&i| minimum.angles[i]).collect(),
        powers: order.iter().map(|&i| powers[i]).collect(),
        cost: minimum.cost,
        hessian: order.iter().map(|&i| minimum.hessian_diag[i]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::steering::SPEED_OF_LIGHT;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    const FC: f64 = 195e6;

    fn ula(nchan: usize) -> (Array1<f64>, Array1<f64>) {
        let spacing = SPEED_OF_LIGHT / FC / 4.0;
        (
            Array1::from_iter((0..nchan).map(|c| c as f64 * spacing)),
            Array1::zeros(nchan),
        )
    }

    fn sine_grid(nsv: usize) -> Vec<f64> {
        (0..nsv)
            .map(|i| {
                (-1.0 + 2.0 * i as f64 / (nsv - 1) as f64)
                    .clamp(-1.0, 1.0)
                    .asin()
            })
            .collect()
    }

    /// Ideal covariance of unit-power plane waves plus a small noise floor.
    fn ideal_covariance(
        angles: &[f64],
        y: &Array1<f64>,
        z: &Array1<f64>,
        noise: f64,
    ) -> DMatrix<Complex64> {
        let nchan = y.len();
        let manifold = steering::generate(angles, FC, y.view(), z.view());
        let mut cov = &manifold * manifold.adjoint();
        for i in 0..nchan {
            cov[(i, i)] += Complex64::new(noise, 0.0);
        }
        cov
    }

    fn narrowband_cost<'a>(
        cov: DMatrix<Complex64>,
        y: &'a Array1<f64>,
        z: &'a Array1<f64>,
    ) -> ProjectionCost<'a> {
        ProjectionCost {
            terms: vec![CostTerm {
                covariance: cov,
                steering: TermSteering::Narrowband(SteeringGeom {
                    carrier_freq_hz: FC,
                    y: y.view(),
                    z: z.view(),
                }),
                weight: 1.0,
            }],
            prior: None,
        }
    }

    fn fixed_bounds(count: usize, half: f64) -> Vec<(f64, f64)> {
        vec![(-half, half); count]
    }

    #[test]
    fn single_source_is_recovered_within_tolerance() {
        let truth = 15f64.to_radians();
        let (y, z) = ula(8);
        let cost = narrowband_cost(ideal_covariance(&[truth], &y, &z, 1e-6), &y, &z);
        let outcome = estimate_pixel(
            &cost,
            &cost,
            &sine_grid(33),
            &fixed_bounds(1, 1.2),
            &fixed_bounds(1, 1.2),
            Initializer::GridSearch,
            &OptimizerOptions::default(),
            0.0,
        )
        .unwrap();
        assert!((outcome.angles[0] - truth).abs() < 0.5f64.to_radians());
        assert!(outcome.cost < 1e-3);
        assert_relative_eq!(outcome.powers[0], 1.0, epsilon = 0.05);
    }

    #[test]
    fn two_sources_come_back_sorted_and_separated() {
        let (y, z) = ula(8);
        let truths = [-20f64.to_radians(), 20f64.to_radians()];
        let cost = narrowband_cost(ideal_covariance(&truths, &y, &z, 1e-4), &y, &z);
        let min_sep = 2f64.to_radians();
        let outcome = estimate_pixel(
            &cost,
            &cost,
            &sine_grid(65),
            &fixed_bounds(2, 1.2),
            &fixed_bounds(2, 1.2),
            Initializer::GridSearch,
            &OptimizerOptions::default(),
            min_sep,
        )
        .unwrap();
        assert!(outcome.angles[0] < outcome.angles[1]);
        assert!(outcome.angles[1] - outcome.angles[0] >= min_sep - 1e-9);
        assert!((outcome.angles[0] - truths[0]).abs() < 1f64.to_radians());
        assert!((outcome.angles[1] - truths[1]).abs() < 1f64.to_radians());
    }

    #[test]
    fn alternating_projection_finds_both_sources() {
        let (y, z) = ula(8);
        let truths = [-25f64.to_radians(), 10f64.to_radians()];
        let cost = narrowband_cost(ideal_covariance(&truths, &y, &z, 1e-4), &y, &z);
        let init = alternating_projection_init(
            &cost,
            &sine_grid(65),
            &fixed_bounds(2, 1.2),
            2f64.to_radians(),
        )
        .unwrap();
        let mut sorted = init.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((sorted[0] - truths[0]).abs() < 2f64.to_radians());
        assert!((sorted[1] - truths[1]).abs() < 2f64.to_radians());
    }

    #[test]
    fn surface_constraint_centers_on_incidence_angle() {
        let ctx = BoundContext {
            twtt_bin: 2e-6,
            surface_twtt: Some(1e-6),
            layer_table: None,
        };
        let constraints = [DoaConstraint {
            method: ConstraintMethod::SurfaceLeft,
            init_half_width_rad: 0.1,
            opt_half_width_rad: 0.2,
        }];
        let bounds = source_bounds(&constraints, &ctx, false).unwrap();
        let incidence = 0.5f64.acos();
        assert_relative_eq!(bounds[0].0, -incidence - 0.2, epsilon = 1e-12);
        assert_relative_eq!(bounds[0].1, -incidence + 0.2, epsilon = 1e-12);
    }

    #[test]
    fn layer_constraint_uses_delay_table() {
        let table = DelayTable {
            twtt: vec![1e-6, 3e-6],
            incidence_rad: vec![0.2, 0.4],
        };
        let ctx = BoundContext {
            twtt_bin: 2e-6,
            surface_twtt: None,
            layer_table: Some(&table),
        };
        let constraints = [DoaConstraint {
            method: ConstraintMethod::LayerRight,
            init_half_width_rad: 0.05,
            opt_half_width_rad: 0.05,
        }];
        let bounds = source_bounds(&constraints, &ctx, true).unwrap();
        assert_relative_eq!(bounds[0].0, 0.3 - 0.05, epsilon = 1e-12);
    }

    #[test]
    fn flat_earth_extrapolation_grows_magnitude_with_range() {
        let prev = [-30f64.to_radians(), 30f64.to_radians()];
        let next = extrapolate_flat_earth(&prev, 1.0e-6, 1.2e-6);
        assert!(next[1] > prev[1]);
        assert!(next[0] < prev[0]);
        assert_relative_eq!(next[0], -next[1], epsilon = 1e-12);
    }

    #[test]
    fn stacked_steering_columns_are_unit_norm() {
        let (y, z) = ula(4);
        let stacked = TermSteering::Stacked(vec![
            SteeringGeom {
                carrier_freq_hz: FC - 5e6,
                y: y.view(),
                z: z.view(),
            },
            SteeringGeom {
                carrier_freq_hz: FC + 5e6,
                y: y.view(),
                z: z.view(),
            },
        ]);
        let a = stacked.matrix(&[0.1, -0.2]);
        assert_eq!(a.nrows(), 8);
        for c in 0..2 {
            let norm: f64 = a.column(c).iter().map(|v| v.norm_sqr()).sum();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn sequential_prior_pulls_solution_toward_previous_angle() {
        let truth = 12f64.to_radians();
        let anchor = 20f64.to_radians();
        let (y, z) = ula(8);
        let mut cost = narrowband_cost(ideal_covariance(&[truth], &y, &z, 1e-4), &y, &z);
        cost.prior = Some(GaussianPrior {
            mean: vec![anchor],
            sigma_rad: 0.02,
        });
        let outcome = estimate_pixel(
            &cost,
            &cost,
            &sine_grid(65),
            &fixed_bounds(1, 1.2),
            &fixed_bounds(1, 1.2),
            Initializer::GridSearch,
            &OptimizerOptions::default(),
            0.0,
        )
        .unwrap();
        // A tight prior drags the optimum off the data peak toward the anchor.
        assert!(outcome.angles[0] > truth);
    }

    #[test]
    fn collapsed_bounds_degrade_instead_of_panicking() {
        let truth = 0.1;
        let (y, z) = ula(4);
        let cost = narrowband_cost(ideal_covariance(&[truth], &y, &z, 1e-4), &y, &z);
        let result = estimate_pixel(
            &cost,
            &cost,
            &sine_grid(17),
            &fixed_bounds(1, 1.2),
            &[(0.5, -0.5)],
            Initializer::GridSearch,
            &OptimizerOptions::default(),
            0.0,
        );
        assert!(matches!(result, Err(ProcError::Degenerate(_))));
    }
}
