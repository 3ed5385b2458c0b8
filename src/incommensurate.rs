use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use num_complex::Complex64;

/// Which of the three unfolded momenta a diagonalization belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Third {
    /// Q − k
    Minus,
    /// Q
    Center,
    /// Q + k
    Plus,
}

pub(crate) const THIRDS: [Third; 3] = [Third::Minus, Third::Center, Third::Plus];

impl Third {
    /// Propagation-vector multiplier of this third.
    pub(crate) fn sign(self) -> f64 {
        match self {
            Third::Minus => -1.0,
            Third::Center => 0.0,
            Third::Plus => 1.0,
        }
    }
}

/// Triples the Q list in place order: `[Q−k, Q, Q+k]` per original point.
pub(crate) fn triple_hkl(hkl: &Array2<f64>, k_rlu: &Vector3<f64>) -> Array2<f64> {
    let n_q = hkl.ncols();
    let mut out = Array2::<f64>::zeros((3, 3 * n_q));
    for q in 0..n_q {
        for (t, third) in THIRDS.iter().enumerate() {
            for row in 0..3 {
                out[[row, 3 * q + t]] = hkl[[row, q]] + third.sign() * k_rlu[row];
            }
        }
    }
    out
}

/// The rotating-frame projectors of the modulation axis `n`:
/// `K₁ = ½(1 − n̂n̂ᵀ − i·[n]ₓ)` and `K₂ = n̂n̂ᵀ`.
pub(crate) struct LabRotation {
    k1: Matrix3<Complex64>,
    k2: Matrix3<Complex64>,
}

impl LabRotation {
    pub(crate) fn new(axis: &Vector3<f64>) -> Self {
        let nnt = axis * axis.transpose();
        let skew = skew_matrix(axis);
        let mut k1 = Matrix3::<Complex64>::zeros();
        let mut k2 = Matrix3::<Complex64>::zeros();
        for a in 0..3 {
            for b in 0..3 {
                let delta = if a == b { 1.0 } else { 0.0 };
                k1[(a, b)] = Complex64::new(0.5 * (delta - nnt[(a, b)]), -0.5 * skew[(a, b)]);
                k2[(a, b)] = Complex64::from(nnt[(a, b)]);
            }
        }
        Self { k1, k2 }
    }

    /// Projects the rotating-frame correlation tensor of one third back to
    /// the lab frame.
    pub(crate) fn apply(&self, sab: &mut Matrix3<Complex64>, third: Third) {
        *sab = match third {
            Third::Plus => *sab * self.k1,
            Third::Center => *sab * self.k2,
            Third::Minus => *sab * self.k1.map(|c| c.conj()),
        };
    }
}

/// Integrates out the arbitrary initial phase of a helix.
pub(crate) fn integrate_helical_phase(sab: &mut Matrix3<Complex64>, axis: &Vector3<f64>) {
    let nnt = (axis * axis.transpose()).map(Complex64::from);
    let skew = skew_matrix(axis).map(Complex64::from);
    let identity = Matrix3::<Complex64>::identity();

    let half = Complex64::from(0.5);
    *sab = *sab * half - skew * *sab * skew * half
        + (nnt - identity) * *sab * nnt * half
        + nnt * *sab * (nnt * Complex64::from(2.0) - identity) * half;
}

fn skew_matrix(axis: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -axis.z, axis.y, //
        axis.z, 0.0, -axis.x, //
        -axis.y, axis.x, 0.0,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_thirds_sum_to_identity() {
        // K₁ + conj(K₁) + K₂ = 1, so the three thirds together carry the
        // whole tensor.
        let rotation = LabRotation::new(&Vector3::z());
        let total = rotation.k1 + rotation.k1.map(|c| c.conj()) + rotation.k2;
        assert_abs_diff_eq!((total - Matrix3::identity()).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_triple_ordering() {
        let hkl = Array2::from_shape_vec((3, 2), vec![0.1, 0.2, 0.0, 0.0, 0.0, 0.5]).unwrap();
        let k = Vector3::new(0.25, 0.0, 0.0);
        let tripled = triple_hkl(&hkl, &k);
        assert_eq!(tripled.ncols(), 6);
        // First point: Q−k, Q, Q+k in place.
        assert_abs_diff_eq!(tripled[[0, 0]], -0.15, epsilon = 1e-12);
        assert_abs_diff_eq!(tripled[[0, 1]], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(tripled[[0, 2]], 0.35, epsilon = 1e-12);
    }

    #[test]
    fn test_helical_integration_preserves_hermiticity() {
        let mut sab = Matrix3::<Complex64>::zeros();
        sab[(0, 0)] = Complex64::from(1.0);
        sab[(0, 1)] = Complex64::new(0.0, -0.5);
        sab[(1, 0)] = Complex64::new(0.0, 0.5);
        sab[(1, 1)] = Complex64::from(1.0);
        integrate_helical_phase(&mut sab, &Vector3::z());
        assert_abs_diff_eq!((sab - sab.adjoint()).norm(), 0.0, epsilon = 1e-12);
    }
}
