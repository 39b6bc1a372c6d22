use crate::{ProcError, ProcResult};

/// Objective evaluated by the constrained minimizer. Implementations are
/// pure: the same angle vector always yields the same cost.
pub trait CostFunction {
    fn evaluate(&self, angles: &[f64]) -> f64;
}

/// Per-coordinate box bounds.
#[derive(Debug, Clone)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Result of one constrained minimization: the optimum, the cost there and
/// the Hessian diagonal (curvature diagnostic) by central differences.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub angles: Vec<f64>,
    pub cost: f64,
    pub hessian_diag: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct MinimizerOptions {
    pub tolerance: f64,
    pub max_sweeps: usize,
    /// Pairwise inequality constraint: any two coordinates must differ by
    /// at least this much.
    pub min_separation: f64,
}

const COARSE_SAMPLES: usize = 9;
const GOLDEN_ITERATIONS: usize = 40;

/// Feasible interval for coordinate `i`: the box bounds intersected with
/// the separation-constraint slab containing the current value.
fn feasible_interval(i: usize, angles: &[f64], bounds: &Bounds, separation: f64) -> (f64, f64) {
    let mut lo = bounds.lower[i];
    let mut hi = bounds.upper[i];
    for (j, &other) in angles.iter().enumerate() {
        if j == i {
            continue;
        }
        if other <= angles[i] {
            lo = lo.max(other + separation);
        } else {
            hi = hi.min(other - separation);
        }
    }
    (lo, hi)
}

/// Golden-section search preceded by a coarse bracketing scan, so mildly
/// multimodal slices still land in the basin nearest the global coarse
/// minimum.
fn line_search<F: Fn(f64) -> f64>(eval: F, lo: f64, hi: f64, tolerance: f64) -> f64 {
    if hi - lo <= tolerance {
        return 0.5 * (lo + hi);
    }
    let step = (hi - lo) / (COARSE_SAMPLES - 1) as f64;
    let mut best_idx = 0;
    let mut best_cost = f64::INFINITY;
    for idx in 0..COARSE_SAMPLES {
        let cost = eval(lo + step * idx as f64);
        if cost < best_cost {
            best_cost = cost;
            best_idx = idx;
        }
    }
    let mut a = lo + step * best_idx.saturating_sub(1) as f64;
    let mut b = (lo + step * (best_idx + 1) as f64).min(hi);

    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let mut x1 = b - ratio * (b - a);
    let mut x2 = a + ratio * (b - a);
    let mut f1 = eval(x1);
    let mut f2 = eval(x2);
    for _ in 0..GOLDEN_ITERATIONS {
        if b - a <= tolerance {
            break;
        }
        if f1 <= f2 {
            b = x2;
            x2 = x1;
            f2 = f1;
            x1 = b - ratio * (b - a);
            f1 = eval(x1);
        } else {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = a + ratio * (b - a);
            f2 = eval(x2);
        }
    }
    0.5 * (a + b)
}

/// Bounded, separation-constrained minimization by cyclic coordinate
/// descent. Deterministic: fixed start, fixed sweep budget, fixed
/// tolerance, no randomness anywhere.
pub fn minimize(
    cost: &dyn CostFunction,
    start: &[f64],
    bounds: &Bounds,
    options: &MinimizerOptions,
) -> ProcResult<Minimum> {
    let k = start.len();
    if bounds.lower.len() != k || bounds.upper.len() != k {
        return Err(ProcError::DimensionMismatch(format!(
            "bounds carry {} coordinates for {} angles",
            bounds.lower.len(),
            k
        )));
    }
    for i in 0..k {
        if bounds.lower[i] > bounds.upper[i] {
            return Err(ProcError::Degenerate(format!(
                "bound collision on coordinate {}: {} > {}",
                i, bounds.lower[i], bounds.upper[i]
            )));
        }
    }

    let mut angles: Vec<f64> = start
        .iter()
        .enumerate()
        .map(|(i, &v)| v.clamp(bounds.lower[i], bounds.upper[i]))
        .collect();

    for _ in 0..options.max_sweeps {
        let mut max_move = 0.0f64;
        for i in 0..k {
            let (lo, hi) = feasible_interval(i, &angles, bounds, options.min_separation);
            if lo > hi {
                continue;
            }
            let current = angles.clone();
            let updated = line_search(
                |value| {
                    let mut probe = current.clone();
                    probe[i] = value;
                    cost.evaluate(&probe)
                },
                lo,
                hi,
                options.tolerance,
            );
            max_move = max_move.max((updated - angles[i]).abs());
            angles[i] = updated;
        }
        if max_move < options.tolerance {
            break;
        }
    }

    let final_cost = cost.evaluate(&angles);
    let h = options.tolerance.max(1e-5);
    let hessian_diag = (0..k)
        .map(|i| {
            let mut plus = angles.clone();
            let mut minus = angles.clone();
            plus[i] += h;
            minus[i] -= h;
            (cost.evaluate(&plus) - 2.0 * final_cost + cost.evaluate(&minus)) / (h * h)
        })
        .collect();

    Ok(Minimum {
        angles,
        cost: final_cost,
        hessian_diag,
    })
}
