use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use num_traits::Zero;

use crate::Result;
use crate::SpinWaveError;
use crate::consts::MAX_EIG_ITERATIONS;
use crate::error::Warning;
use crate::hamiltonian::hermitize;

/// Eigenpairs of one para-unitary diagonalization.
///
/// Energies are sorted descending; with the para-unitary metric
/// `G = diag(1, …, 1, −1, …, −1)` the first L columns of `vectors` are the
/// physical modes and the rest their bosonic conjugates.
#[derive(Debug, Clone)]
pub(crate) struct Modes {
    pub(crate) energies: Vec<f64>,
    pub(crate) vectors: DMatrix<Complex64>,
}

/// Choice of diagonalization path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    /// Cholesky-based (Colpa). Requires a positive-definite Hamiltonian,
    /// with a single shifted retry on failure.
    Colpa,
    /// Direct diagonalization of `G·h` (White). Tolerates indefinite
    /// Hamiltonians and complex energies.
    White,
}

pub(crate) fn diagonalize(
    h: &DMatrix<Complex64>,
    l: usize,
    method: Method,
    fast_mode: bool,
    omega_tol: f64,
    q_index: usize,
    warnings: &mut Vec<Warning>,
) -> Result<Modes> {
    let mut modes = match method {
        Method::Colpa => colpa(h, l, omega_tol, q_index, warnings)?,
        Method::White => white(h, l, omega_tol, q_index, warnings)?,
    };
    if fast_mode {
        modes.energies.truncate(l);
        modes.vectors = modes.vectors.columns(0, l).into_owned();
    }
    Ok(modes)
}

/// Colpa's method: factor `h = K†·K`, diagonalize `K·G·K†` and map the
/// eigenpairs back through `K⁻¹`.
fn colpa(
    h: &DMatrix<Complex64>,
    l: usize,
    omega_tol: f64,
    q_index: usize,
    warnings: &mut Vec<Warning>,
) -> Result<Modes> {
    let two_l = 2 * l;

    let chol = match h.clone().cholesky() {
        Some(chol) => chol,
        None => {
            // Retry with a tolerance-scale regularization. This absorbs the
            // roundoff-level indefiniteness of Goldstone points; a genuinely
            // negative curvature still fails and is reported with the
            // measured eigenvalue.
            let shift = omega_tol * (two_l as f64).sqrt() * 4.0;
            let mut shifted = h.clone();
            for i in 0..two_l {
                shifted[(i, i)] += Complex64::from(shift);
            }
            match shifted.cholesky() {
                Some(chol) => {
                    warnings.push(Warning::CholeskyShifted { q_index, shift });
                    chol
                }
                None => {
                    return Err(SpinWaveError::NonPosDefHamiltonian {
                        q_index,
                        min_eigenvalue: smallest_eigenvalue(h, q_index)?,
                    });
                }
            }
        }
    };

    // K is upper triangular with K†·K = h.
    let k = chol.unpack().adjoint();

    let mut g_k_adjoint = k.adjoint();
    negate_lower_rows(&mut g_k_adjoint, l);
    let mut w = &k * g_k_adjoint;
    hermitize(&mut w);

    let eigen = w
        .try_symmetric_eigen(f64::EPSILON, MAX_EIG_ITERATIONS)
        .ok_or(SpinWaveError::EigensolverFailure { q_index })?;

    let order = descending_order(eigen.eigenvalues.as_slice());
    let energies: Vec<f64> = order.iter().map(|&m| eigen.eigenvalues[m]).collect();
    let mut u = DMatrix::<Complex64>::zeros(two_l, two_l);
    for (col, &m) in order.iter().enumerate() {
        u.set_column(col, &eigen.eigenvectors.column(m));
    }

    orthogonalize_degenerate(&mut u, &energies, omega_tol, q_index, warnings);

    // V = K⁻¹·U·diag(√(Gᵢᵢ·Dᵢ)).
    let mut vectors = k
        .solve_upper_triangular(&u)
        .ok_or(SpinWaveError::EigensolverFailure { q_index })?;
    for (col, &energy) in energies.iter().enumerate() {
        let metric = if col < l { 1.0 } else { -1.0 };
        let scale = Complex64::from(metric * energy).sqrt();
        for value in vectors.column_mut(col).iter_mut() {
            *value *= scale;
        }
    }

    Ok(Modes { energies, vectors })
}

/// White's method: eigendecomposition of the non-Hermitian `G·h` through
/// its complex Schur form, with eigenvectors normalized to the para-unitary
/// metric.
fn white(
    h: &DMatrix<Complex64>,
    l: usize,
    omega_tol: f64,
    q_index: usize,
    warnings: &mut Vec<Warning>,
) -> Result<Modes> {
    let two_l = 2 * l;

    let mut gh = h.clone();
    negate_lower_rows(&mut gh, l);
    let schur = gh
        .try_schur(f64::EPSILON, MAX_EIG_ITERATIONS)
        .ok_or(SpinWaveError::EigensolverFailure { q_index })?;
    let (q, t) = schur.unpack();

    let eigenvalues: Vec<Complex64> = (0..two_l).map(|i| t[(i, i)]).collect();
    let max_imag = eigenvalues.iter().map(|e| e.im.abs()).fold(0.0, f64::max);
    if max_imag > omega_tol {
        warnings.push(Warning::ImaginaryModes { q_index, max_imag });
    }

    let mut order: Vec<usize> = (0..two_l).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .re
            .total_cmp(&eigenvalues[a].re)
            .then(eigenvalues[a].im.total_cmp(&eigenvalues[b].im))
    });

    let mut energies = Vec::with_capacity(two_l);
    let mut vectors = DMatrix::<Complex64>::zeros(two_l, two_l);
    for (col, &m) in order.iter().enumerate() {
        let mut v = &q * triangular_eigenvector(&t, m);

        // |V†·G·V| = 1 on the diagonal.
        let norm: f64 = v
            .iter()
            .enumerate()
            .map(|(i, c)| if i < l { c.norm_sqr() } else { -c.norm_sqr() })
            .sum();
        if norm.abs() < 1e-12 {
            warnings.push(Warning::DefectiveEigenvectors { q_index });
            let plain = v.norm();
            if plain > 0.0 {
                v /= Complex64::from(plain);
            }
        } else {
            v /= Complex64::from(norm.abs().sqrt());
        }

        energies.push(eigenvalues[m].re);
        vectors.set_column(col, &v);
    }

    Ok(Modes { energies, vectors })
}

/// Eigenvector of an upper-triangular matrix for its `m`-th diagonal entry,
/// by back-substitution.
fn triangular_eigenvector(t: &DMatrix<Complex64>, m: usize) -> DVector<Complex64> {
    let n = t.nrows();
    let lambda = t[(m, m)];
    let mut y = DVector::<Complex64>::zeros(n);
    y[m] = Complex64::from(1.0);
    for i in (0..m).rev() {
        let mut acc = Complex64::zero();
        for j in i + 1..=m {
            acc += t[(i, j)] * y[j];
        }
        let mut denom = lambda - t[(i, i)];
        if denom.norm() < 1e-12 {
            denom = Complex64::from(1e-12);
        }
        y[i] = acc / denom;
    }
    y
}

/// Explicit Gram–Schmidt pass over groups of eigenvalues closer than
/// `omega_tol`.
fn orthogonalize_degenerate(
    u: &mut DMatrix<Complex64>,
    energies: &[f64],
    omega_tol: f64,
    q_index: usize,
    warnings: &mut Vec<Warning>,
) {
    let n = energies.len();
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && (energies[end - 1] - energies[end]).abs() <= omega_tol {
            end += 1;
        }
        if end - start > 1 {
            for a in start..end {
                let mut col = u.column(a).clone_owned();
                for b in start..a {
                    let prev = u.column(b).clone_owned();
                    let overlap = prev.dotc(&col);
                    col -= prev * overlap;
                }
                let norm = col.norm();
                if norm < 1e-12 {
                    warnings.push(Warning::DefectiveEigenvectors { q_index });
                } else {
                    col /= Complex64::from(norm);
                    u.set_column(a, &col);
                }
            }
        }
        start = end;
    }
}

/// Stable permutation sorting `values` in descending order.
fn descending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

fn smallest_eigenvalue(h: &DMatrix<Complex64>, q_index: usize) -> Result<f64> {
    let eigen = h
        .clone()
        .try_symmetric_eigen(f64::EPSILON, MAX_EIG_ITERATIONS)
        .ok_or(SpinWaveError::EigensolverFailure { q_index })?;
    Ok(eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Negates the last `l` rows in place, i.e. applies `G` from the left.
fn negate_lower_rows(m: &mut DMatrix<Complex64>, l: usize) {
    for r in l..2 * l {
        for c in 0..m.ncols() {
            m[(r, c)] = -m[(r, c)];
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// `h = [[a, b], [b, a]]`, the textbook single-mode Bogoliubov problem
    /// with ω = √(a² − b²).
    fn two_level(a: f64, b: f64) -> DMatrix<Complex64> {
        DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex64::from(a),
                Complex64::from(b),
                Complex64::from(b),
                Complex64::from(a),
            ],
        )
    }

    fn check_para_unitarity(modes: &Modes, l: usize, tol: f64) {
        let v = &modes.vectors;
        let mut g_v = v.clone();
        negate_lower_rows(&mut g_v, l);
        let product = v.adjoint() * g_v;
        for r in 0..2 * l {
            for c in 0..2 * l {
                let expected = match (r == c, r < l) {
                    (true, true) => 1.0,
                    (true, false) => -1.0,
                    _ => 0.0,
                };
                assert_abs_diff_eq!(product[(r, c)].re, expected, epsilon = tol);
                assert_abs_diff_eq!(product[(r, c)].im, 0.0, epsilon = tol);
            }
        }
    }

    #[test]
    fn test_colpa_two_level() {
        let h = two_level(2.0, 1.0);
        let mut warnings = Vec::new();
        let modes = diagonalize(&h, 1, Method::Colpa, false, 1e-8, 0, &mut warnings).unwrap();
        let omega = 3.0_f64.sqrt();
        assert_abs_diff_eq!(modes.energies[0], omega, epsilon = 1e-10);
        assert_abs_diff_eq!(modes.energies[1], -omega, epsilon = 1e-10);
        assert!(warnings.is_empty());
        check_para_unitarity(&modes, 1, 1e-9);
    }

    #[test]
    fn test_white_matches_colpa() {
        let h = two_level(2.0, 1.0);
        let mut warnings = Vec::new();
        let colpa = diagonalize(&h, 1, Method::Colpa, false, 1e-8, 0, &mut warnings).unwrap();
        let white = diagonalize(&h, 1, Method::White, false, 1e-8, 0, &mut warnings).unwrap();
        for (a, b) in colpa.energies.iter().zip(&white.energies) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
        check_para_unitarity(&white, 1, 1e-8);
    }

    #[test]
    fn test_shifted_retry_on_singular_hamiltonian() {
        // The zero-energy Goldstone point: h is positive semi-definite.
        let h = two_level(1.0, 1.0);
        let mut warnings = Vec::new();
        let modes = diagonalize(&h, 1, Method::Colpa, false, 1e-8, 3, &mut warnings).unwrap();
        assert!(matches!(warnings[0], Warning::CholeskyShifted { q_index: 3, .. }));
        // The regularization opens a gap of order √(2·a·shift).
        assert!(modes.energies[0].abs() < 1e-3);
    }

    #[test]
    fn test_non_pos_def_error() {
        let h = two_level(-2.0, 0.5);
        let mut warnings = Vec::new();
        let err = diagonalize(&h, 1, Method::Colpa, false, 1e-8, 7, &mut warnings).unwrap_err();
        assert!(matches!(
            err,
            SpinWaveError::NonPosDefHamiltonian { q_index: 7, .. }
        ));
    }

    #[test]
    fn test_fast_mode_truncation() {
        let h = two_level(2.0, 1.0);
        let mut warnings = Vec::new();
        let modes = diagonalize(&h, 1, Method::Colpa, true, 1e-8, 0, &mut warnings).unwrap();
        assert_eq!(modes.energies.len(), 1);
        assert_eq!(modes.vectors.ncols(), 1);
        assert_abs_diff_eq!(modes.energies[0], 3.0_f64.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn test_degenerate_modes_stay_orthogonal() {
        // Two uncoupled identical modes: doubly degenerate spectrum.
        let mut h = DMatrix::<Complex64>::zeros(4, 4);
        for i in 0..4 {
            h[(i, i)] = Complex64::from(2.0);
        }
        let mut warnings = Vec::new();
        let modes = diagonalize(&h, 2, Method::Colpa, false, 1e-8, 0, &mut warnings).unwrap();
        assert_abs_diff_eq!(modes.energies[0], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(modes.energies[1], 2.0, epsilon = 1e-10);
        check_para_unitarity(&modes, 2, 1e-9);
    }
}
