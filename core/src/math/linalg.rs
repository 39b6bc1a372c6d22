use nalgebra::{DMatrix, DVector, SymmetricEigen};
use num_complex::Complex64;

/// Forces exact Hermitian symmetry, discarding accumulation round-off.
pub fn hermitize(m: DMatrix<Complex64>) -> DMatrix<Complex64> {
    let adjoint = m.adjoint();
    (m + adjoint) * Complex64::new(0.5, 0.0)
}

pub fn mean_square_magnitude(m: &DMatrix<Complex64>) -> f64 {
    if m.is_empty() {
        return 0.0;
    }
    m.iter().map(|v| v.norm_sqr()).sum::<f64>() / m.len() as f64
}

/// Adds `factor * sqrt(mean(|R|^2))` to the diagonal before inversion.
pub fn diagonal_load(m: &mut DMatrix<Complex64>, factor: f64) {
    if factor == 0.0 {
        return;
    }
    let level = factor * mean_square_magnitude(m).sqrt();
    for i in 0..m.nrows().min(m.ncols()) {
        m[(i, i)] += Complex64::new(level, 0.0);
    }
}

pub fn invert(m: DMatrix<Complex64>) -> Option<DMatrix<Complex64>> {
    m.try_inverse()
}

/// Eigendecomposition of a Hermitian matrix, eigenvalues ascending with
/// matching eigenvector columns.
pub fn hermitian_eig(m: DMatrix<Complex64>) -> (Vec<f64>, DMatrix<Complex64>) {
    let n = m.nrows();
    let decomp = SymmetricEigen::new(m);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        decomp.eigenvalues[a]
            .partial_cmp(&decomp.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let eigenvalues: Vec<f64> = order.iter().map(|&i| decomp.eigenvalues[i]).collect();
    let eigenvectors = DMatrix::from_fn(n, n, |r, c| decomp.eigenvectors[(r, order[c])]);
    (eigenvalues, eigenvectors)
}

/// Dominant eigenvector by power iteration from a fixed deterministic start.
pub fn dominant_eigenvector(m: &DMatrix<Complex64>, iterations: usize) -> DVector<Complex64> {
    let n = m.nrows();
    let mut v = DVector::from_element(n, Complex64::new(1.0 / (n as f64).sqrt(), 0.0));
    for _ in 0..iterations {
        let w = m * &v;
        let norm = w.norm();
        if norm == 0.0 {
            break;
        }
        v = w.unscale(norm);
    }
    v
}

/// Vertex of the parabola through three samples; falls back to the middle
/// abscissa when the points are collinear.
pub fn quadratic_peak(x: [f64; 3], y: [f64; 3]) -> f64 {
    let d10 = x[1] - x[0];
    let d12 = x[1] - x[2];
    let numer = d10 * d10 * (y[1] - y[2]) - d12 * d12 * (y[1] - y[0]);
    let denom = d10 * (y[1] - y[2]) - d12 * (y[1] - y[0]);
    if denom.abs() < 1e-300 {
        return x[1];
    }
    x[1] - 0.5 * numer / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hermitize_symmetrizes_round_off() {
        let m = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex64::new(1.0, 0.0),
                Complex64::new(0.5, 0.2),
                Complex64::new(0.5, -0.1),
                Complex64::new(2.0, 0.0),
            ],
        );
        let h = hermitize(m);
        assert_relative_eq!(h[(0, 1)].re, h[(1, 0)].re, epsilon = 1e-15);
        assert_relative_eq!(h[(0, 1)].im, -h[(1, 0)].im, epsilon = 1e-15);
    }

    #[test]
    fn diagonal_load_scales_with_matrix_level() {
        let mut m = DMatrix::from_diagonal_element(3, 3, Complex64::new(4.0, 0.0));
        diagonal_load(&mut m, 0.5);
        // mean |R|^2 = 3*16/9, sqrt = 4/sqrt(3)
        let expected = 4.0 + 0.5 * 4.0 / 3f64.sqrt();
        assert_relative_eq!(m[(0, 0)].re, expected, epsilon = 1e-12);
    }

    #[test]
    fn hermitian_eig_sorts_ascending() {
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![
            Complex64::new(3.0, 0.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(2.0, 0.0),
        ]));
        let (vals, vecs) = hermitian_eig(m);
        assert_relative_eq!(vals[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(vals[2], 3.0, epsilon = 1e-10);
        // Smallest eigenvalue belongs to basis vector e1.
        assert_relative_eq!(vecs[(1, 0)].norm(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn power_iteration_finds_dominant_direction() {
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![
            Complex64::new(1.0, 0.0),
            Complex64::new(5.0, 0.0),
        ]));
        let v = dominant_eigenvector(&m, 50);
        assert_relative_eq!(v[1].norm(), 1.0, epsilon = 1e-9);
        assert!(v[0].norm() < 1e-9);
    }

    #[test]
    fn quadratic_peak_recovers_vertex() {
        // y = (x - 0.7)^2
        let f = |x: f64| (x - 0.7) * (x - 0.7);
        let xs = [0.0, 0.5, 1.0];
        let peak = quadratic_peak(xs, [f(0.0), f(0.5), f(1.0)]);
        assert_relative_eq!(peak, 0.7, epsilon = 1e-12);
    }
}
