use crate::config::{ModelOrderParams, OrderCriterion};

pub const CRITERIA: [&str; 4] = ["threshold", "aic", "mdl", "hq"];

/// Model-order answer: the order the configured criterion chose, plus
/// every criterion's answer in [`CRITERIA`] order for offline comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderEstimate {
    pub order: usize,
    pub by_criterion: [usize; 4],
}

/// Log-likelihood term shared by the penalized criteria: the ratio of the
/// geometric to the arithmetic mean of the presumed-noise eigenvalues.
fn sphericity_log_likelihood(eigenvalues_desc: &[f64], k: usize, nsnap: usize) -> f64 {
    let tail = &eigenvalues_desc[k..];
    let m = tail.len() as f64;
    let floor = 1e-300;
    let log_geometric = tail.iter().map(|&v| v.max(floor).ln()).sum::<f64>() / m;
    let arithmetic = tail.iter().sum::<f64>() / m;
    nsnap as f64 * m * (log_geometric - arithmetic.max(floor).ln())
}

fn penalized_argmin(
    eigenvalues_desc: &[f64],
    nsnap: usize,
    max_order: usize,
    penalty: impl Fn(f64, f64) -> f64,
) -> usize {
    let n = eigenvalues_desc.len() as f64;
    let mut best = (0usize, f64::INFINITY);
    for k in 0..=max_order.min(eigenvalues_desc.len() - 1) {
        let kf = k as f64;
        let free_params = kf * (2.0 * n - kf);
        let score =
            -2.0 * sphericity_log_likelihood(eigenvalues_desc, k, nsnap) + penalty(free_params, kf);
        if score < best.1 {
            best = (k, score);
        }
    }
    best.0
}

/// Chooses the number of active sources from the sorted (descending)
/// eigenvalues of the covariance matrix. Every criterion's answer is
/// computed; the configured one decides, capped at `max_order`.
pub fn estimate_order(
    eigenvalues_desc: &[f64],
    nsnap: usize,
    max_order: usize,
    params: &ModelOrderParams,
) -> OrderEstimate {
    debug_assert!(!eigenvalues_desc.is_empty());
    let nsnap = nsnap.max(1);

    // Simple test: eigenvalues that clear the noise floor by the
    // configured margin.
    let noise_floor = eigenvalues_desc
        .last()
        .copied()
        .unwrap_or(0.0)
        .max(1e-300);
    let threshold = noise_floor * 10f64.powf(params.threshold_db / 10.0);
    let by_threshold = eigenvalues_desc
        .iter()
        .filter(|&&v| v > threshold)
        .count()
        .min(max_order);

    let log_nsnap = (nsnap as f64).ln();
    let aic = penalized_argmin(eigenvalues_desc, nsnap, max_order, |p, _| 2.0 * p);
    let mdl = penalized_argmin(eigenvalues_desc, nsnap, max_order, |p, _| p * log_nsnap);
    let hq = penalized_argmin(eigenvalues_desc, nsnap, max_order, |p, _| {
        2.0 * p * log_nsnap.max(std::f64::consts::E).ln()
    });

    let by_criterion = [by_threshold, aic, mdl, hq];
    let order = match params.criterion {
        OrderCriterion::Threshold => by_threshold,
        OrderCriterion::Aic => aic,
        OrderCriterion::Mdl => mdl,
        OrderCriterion::Hq => hq,
    };
    OrderEstimate {
        order,
        by_criterion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(criterion: OrderCriterion) -> ModelOrderParams {
        ModelOrderParams {
            criterion,
            threshold_db: 10.0,
            log_all: true,
        }
    }

    #[test]
    fn strong_sources_are_counted_by_every_criterion() {
        let eigenvalues = [400.0, 250.0, 1.1, 1.0, 1.0, 0.9];
        let estimate = estimate_order(&eigenvalues, 200, 4, &params(OrderCriterion::Mdl));
        assert_eq!(estimate.order, 2);
        for order in estimate.by_criterion {
            assert_eq!(order, 2);
        }
    }

    #[test]
    fn pure_noise_yields_order_zero() {
        let eigenvalues = [1.02, 1.01, 1.0, 0.99, 0.98];
        let estimate = estimate_order(&eigenvalues, 500, 3, &params(OrderCriterion::Mdl));
        assert_eq!(estimate.order, 0);
    }

    #[test]
    fn order_is_capped_at_the_configured_maximum() {
        let eigenvalues = [90.0, 80.0, 70.0, 1.0, 1.0, 1.0];
        let estimate = estimate_order(&eigenvalues, 100, 1, &params(OrderCriterion::Threshold));
        assert_eq!(estimate.order, 1);
    }
}
