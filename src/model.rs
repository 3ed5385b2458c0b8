use std::f64::consts::TAU;

use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;

use crate::consts::MU_B;

/// A magnetic site of the (extended) unit cell.
#[derive(Debug, Clone)]
pub struct Site {
    /// Position in fractional coordinates of the magnetic supercell.
    pub position: Vector3<f64>,
    /// The ordered moment vector `M`. Its length is the spin `S`.
    pub moment: Vector3<f64>,
    /// Optional complex magnetisation Fourier amplitude. When set, the local
    /// frame follows the complex-magnetisation convention instead of `M`.
    pub fourier: Option<Vector3<Complex64>>,
    /// The site g-tensor.
    pub g: Matrix3<f64>,
    /// Optional magnetic form factor of the ion.
    pub form_factor: Option<FormFactor>,
}

impl Site {
    pub fn new(position: Vector3<f64>, moment: Vector3<f64>) -> Self {
        Self {
            position,
            moment,
            fourier: None,
            g: Matrix3::identity(),
            form_factor: None,
        }
    }
}

/// A directed bilinear coupling `Sᵢ·J·Sⱼ` between site `source` in the home
/// cell and site `target` in the cell displaced by `cell_shift`.
///
/// Single-ion anisotropy is the special case `source == target` with
/// `cell_shift == 0` and a symmetric `exchange` matrix.
#[derive(Debug, Clone)]
pub struct Coupling {
    pub source: usize,
    pub target: usize,
    /// Lattice displacement in units of the magnetic supercell.
    pub cell_shift: Vector3<f64>,
    /// The 3×3 exchange tensor. Positive isotropic values are
    /// antiferromagnetic.
    pub exchange: Matrix3<f64>,
}

impl Coupling {
    pub fn new(source: usize, target: usize, cell_shift: Vector3<f64>, exchange: Matrix3<f64>) -> Self {
        Self {
            source,
            target,
            cell_shift,
            exchange,
        }
    }

    /// An isotropic Heisenberg coupling of strength `j`.
    pub fn heisenberg(source: usize, target: usize, cell_shift: Vector3<f64>, j: f64) -> Self {
        Self::new(source, target, cell_shift, Matrix3::identity() * j)
    }

    /// Single-ion anisotropy on `site`.
    pub fn anisotropy(site: usize, matrix: Matrix3<f64>) -> Self {
        Self::new(site, site, Vector3::zeros(), matrix)
    }
}

/// A biquadratic coupling `J·(Sᵢ·Sⱼ)²`, valid for commensurate structures
/// only.
#[derive(Debug, Clone)]
pub struct BiquadraticCoupling {
    pub source: usize,
    pub target: usize,
    pub cell_shift: Vector3<f64>,
    pub exchange: f64,
}

impl BiquadraticCoupling {
    pub fn new(source: usize, target: usize, cell_shift: Vector3<f64>, exchange: f64) -> Self {
        Self {
            source,
            target,
            cell_shift,
            exchange,
        }
    }
}

/// External magnetic field in the crystal Cartesian frame.
#[derive(Debug, Clone)]
pub struct MagneticField {
    /// Field vector in Tesla.
    pub field: Vector3<f64>,
    /// The Bohr magneton in the energy unit of the exchange values.
    pub mu_b: f64,
}

impl Default for MagneticField {
    fn default() -> Self {
        Self {
            field: Vector3::zeros(),
            mu_b: MU_B,
        }
    }
}

/// A crystal twin: a rotated domain with a relative volume fraction.
#[derive(Debug, Clone)]
pub struct Twin {
    pub rotation: Matrix3<f64>,
    pub volume: f64,
}

impl Twin {
    pub fn new(rotation: Matrix3<f64>, volume: f64) -> Self {
        Self { rotation, volume }
    }

    /// The untwinned crystal.
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), 1.0)
    }
}

/// The magnetic propagation vector and rotation axis.
#[derive(Debug, Clone)]
pub struct MagneticStructure {
    /// Propagation vector `k` in extended-cell units.
    pub k: Vector3<f64>,
    /// Global rotation axis `n` of the moment modulation (unit vector).
    pub axis: Vector3<f64>,
}

impl MagneticStructure {
    pub fn commensurate() -> Self {
        Self {
            k: Vector3::zeros(),
            axis: Vector3::z(),
        }
    }

    pub fn new(k: Vector3<f64>, axis: Vector3<f64>) -> Self {
        Self { k, axis }
    }

    /// Whether any component of `k` deviates from an integer by more than
    /// `tol`.
    pub fn is_incommensurate(&self, tol: f64) -> bool {
        deviates_from_integer(&self.k, tol)
    }

    /// Whether `2k` is also away from any integer, i.e. the modulation is a
    /// proper helix rather than a collinear ±k pair.
    pub fn is_helical(&self, tol: f64) -> bool {
        deviates_from_integer(&(self.k * 2.0), tol)
    }
}

fn deviates_from_integer(v: &Vector3<f64>, tol: f64) -> bool {
    v.iter().any(|x| (x - x.round()).abs() > tol)
}

/// Analytic ⟨j₀⟩ magnetic form factor as a sum of Gaussians in
/// `s = |Q|/4π`:
///
/// `F(|Q|) = A·exp(−a·s²) + B·exp(−b·s²) + C·exp(−c·s²) + D`
#[derive(Debug, Clone, Copy)]
pub struct FormFactor {
    /// Coefficients `[A, a, B, b, C, c, D]` from the standard tables.
    pub coefficients: [f64; 7],
}

impl FormFactor {
    pub fn new(coefficients: [f64; 7]) -> Self {
        Self { coefficients }
    }

    /// Evaluates the form factor at momentum transfer `q_abs` in Å⁻¹.
    pub fn evaluate(&self, q_abs: f64) -> f64 {
        let [a0, a1, b0, b1, c0, c1, d] = self.coefficients;
        let s2 = (q_abs / (2.0 * TAU)).powi(2);
        a0 * (-a1 * s2).exp() + b0 * (-b1 * s2).exp() + c0 * (-c1 * s2).exp() + d
    }
}

/// The full input of a spin-wave computation. All fields are immutable for
/// the duration of one run.
#[derive(Debug, Clone)]
pub struct SpinWaveModel {
    pub sites: Vec<Site>,
    pub couplings: Vec<Coupling>,
    pub biquadratic: Vec<BiquadraticCoupling>,
    pub structure: MagneticStructure,
    pub field: MagneticField,
    pub twins: Vec<Twin>,
    /// Extended (magnetic supercell) size in units of the crystal cell.
    pub n_ext: [usize; 3],
    /// Maps a vector in reciprocal-lattice units to Cartesian Å⁻¹.
    pub reciprocal_basis: Matrix3<f64>,
}

impl SpinWaveModel {
    pub fn new(sites: Vec<Site>, couplings: Vec<Coupling>) -> Self {
        Self {
            sites,
            couplings,
            biquadratic: Vec::new(),
            structure: MagneticStructure::commensurate(),
            field: MagneticField::default(),
            twins: vec![Twin::identity()],
            n_ext: [1, 1, 1],
            reciprocal_basis: Matrix3::identity() * TAU,
        }
    }

    /// The supercell extent as a float vector.
    pub(crate) fn n_ext_vector(&self) -> Vector3<f64> {
        Vector3::new(self.n_ext[0] as f64, self.n_ext[1] as f64, self.n_ext[2] as f64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_commensurability_flags() {
        let tol = 1e-5;
        let c = MagneticStructure::commensurate();
        assert!(!c.is_incommensurate(tol));

        let afm = MagneticStructure::new(Vector3::new(0.5, 0.0, 1.0), Vector3::z());
        assert!(afm.is_incommensurate(tol));
        // 2k is integer, so a ±k pair rather than a helix.
        assert!(!afm.is_helical(tol));

        let helix = MagneticStructure::new(Vector3::new(0.2, 0.0, 0.0), Vector3::z());
        assert!(helix.is_incommensurate(tol));
        assert!(helix.is_helical(tol));
    }

    #[test]
    fn test_form_factor_limits() {
        // Mn2+ ⟨j₀⟩ coefficients.
        let ff = FormFactor::new([0.4220, 17.684, 0.5948, 6.005, 0.0043, -0.609, -0.0219]);
        // Normalized to one at Q = 0 and decaying at finite Q.
        assert_abs_diff_eq!(ff.evaluate(0.0), 1.0, epsilon = 1e-3);
        assert!(ff.evaluate(5.0) < ff.evaluate(0.0));
    }
}
