use std::f64::consts::TAU;

use nalgebra::{DVector, Matrix3, Rotation3, Unit, Vector3};
use num_complex::Complex64;
use num_traits::Zero;

use crate::frame::LocalFrame;
use crate::model::{BiquadraticCoupling, Coupling, MagneticStructure};

/// One directed coupling reduced to its Q-independent scalar pair.
///
/// `a0` lands in the boson-conserving (A) blocks and `b0` in the anomalous
/// (B) block of the Hamiltonian, both multiplied by the Fourier phase of
/// `cell_shift` at every Q.
#[derive(Debug, Clone)]
pub(crate) struct PhasedEntry {
    pub(crate) source: usize,
    pub(crate) target: usize,
    pub(crate) cell_shift: Vector3<f64>,
    pub(crate) a0: Complex64,
    pub(crate) b0: Complex64,
}

/// The Q-independent contribution table of the bilinear couplings.
#[derive(Debug, Clone)]
pub(crate) struct BilinearTable {
    pub(crate) entries: Vec<PhasedEntry>,
    /// Dense 2L real diagonal, applied unchanged at every Q.
    pub(crate) diagonal: DVector<f64>,
}

/// The Q-independent contribution table of the biquadratic couplings.
#[derive(Debug, Clone)]
pub(crate) struct BiquadraticTable {
    pub(crate) entries: Vec<PhasedEntry>,
    pub(crate) diagonal: DVector<f64>,
    /// Per-site anomalous diagonal, added at `(i, i+L)` like a B entry.
    pub(crate) pair_diagonal: Vec<Complex64>,
}

/// Doubles a directed coupling list with the reversed bonds.
///
/// Each bond `(i, j, dR, J)` becomes `(i, j, dR, J/2)` and `(j, i, -dR,
/// Jᵀ/2)`, so the Hermitized per-Q assembly sums over both directions and a
/// bond listed by the caller in both directions yields the same Hamiltonian.
fn symmetrize_bilinear(couplings: &[Coupling]) -> Vec<Coupling> {
    let mut out = Vec::with_capacity(2 * couplings.len());
    for c in couplings {
        out.push(Coupling::new(c.source, c.target, c.cell_shift, c.exchange * 0.5));
        out.push(Coupling::new(
            c.target,
            c.source,
            -c.cell_shift,
            c.exchange.transpose() * 0.5,
        ));
    }
    out
}

fn symmetrize_biquadratic(couplings: &[BiquadraticCoupling]) -> Vec<BiquadraticCoupling> {
    let mut out = Vec::with_capacity(2 * couplings.len());
    for c in couplings {
        out.push(BiquadraticCoupling::new(c.source, c.target, c.cell_shift, c.exchange * 0.5));
        out.push(BiquadraticCoupling::new(c.target, c.source, -c.cell_shift, c.exchange * 0.5));
    }
    out
}

/// The rotating-frame exchange symmetrization for incommensurate
/// structures: `J → (J·K + K·J)/2` with `K` the rotation around `n` by the
/// modulation angle accumulated over `cell_shift`.
fn rotating_frame_exchange(
    exchange: &Matrix3<f64>,
    structure: &MagneticStructure,
    cell_shift: &Vector3<f64>,
) -> Matrix3<f64> {
    let angle = TAU * structure.k.dot(cell_shift);
    let axis = Unit::new_normalize(structure.axis);
    let k = Rotation3::from_axis_angle(&axis, angle).into_inner();
    (exchange * k + k * exchange) * 0.5
}

/// Builds the bilinear table (diagonal and phased off-diagonal scalars).
pub(crate) fn build_bilinear(
    couplings: &[Coupling],
    frames: &[LocalFrame],
    structure: &MagneticStructure,
    incommensurate: bool,
) -> BilinearTable {
    let l = frames.len();
    let mut entries = Vec::new();
    let mut diagonal = DVector::<f64>::zeros(2 * l);

    for c in symmetrize_bilinear(couplings) {
        let exchange = if incommensurate {
            rotating_frame_exchange(&c.exchange, structure, &c.cell_shift)
        } else {
            c.exchange
        };

        let fi = &frames[c.source];
        let fj = &frames[c.target];
        let jc = exchange.map(Complex64::from);

        let ad = fi.eta.dot(&(exchange * fj.eta));
        let root_s = (fi.spin * fj.spin).sqrt();
        let zbar_j = fj.z.map(|z| z.conj());
        let a0 = fi.z.dot(&(jc * zbar_j)) * root_s;
        let b0 = fi.z.dot(&(jc * fj.z)) * root_s;

        diagonal[c.source] += -2.0 * fj.spin * ad;
        diagonal[c.source + l] += -2.0 * fi.spin * ad;

        entries.push(PhasedEntry {
            source: c.source,
            target: c.target,
            cell_shift: c.cell_shift,
            a0,
            b0,
        });
    }

    BilinearTable { entries, diagonal }
}

/// Builds the biquadratic table. Only valid for commensurate structures;
/// the caller rejects the incommensurate combination beforehand.
pub(crate) fn build_biquadratic(
    couplings: &[BiquadraticCoupling],
    frames: &[LocalFrame],
) -> BiquadraticTable {
    let l = frames.len();
    let mut entries = Vec::new();
    let mut diagonal = DVector::<f64>::zeros(2 * l);
    let mut pair_diagonal = vec![Complex64::zero(); l];

    for c in symmetrize_biquadratic(couplings) {
        let fi = &frames[c.source];
        let fj = &frames[c.target];

        let eta_i = fi.eta.map(Complex64::from);
        let eta_j = fj.eta.map(Complex64::from);
        let zbar_i = fi.z.map(|z| z.conj());
        let zbar_j = fj.z.map(|z| z.conj());

        let m = Complex64::from(fi.eta.dot(&fj.eta));
        let n = eta_i.dot(&zbar_j);
        let o = fi.z.dot(&zbar_j);
        let p = zbar_i.dot(&fj.z);
        let q = fi.z.dot(&eta_j);

        let s32 = (fi.spin * fj.spin).powf(1.5);
        let si_sj2 = fi.spin * fj.spin * fj.spin;

        let a0 = (m * p.conj() + q * n.conj()) * s32 * c.exchange;
        let b0 = (m * o + q * n) * s32 * c.exchange;
        let diag = (q.conj() * q - m * m * 2.0).re * si_sj2 * c.exchange;
        let pair = q * q * si_sj2 * c.exchange;

        diagonal[c.source] += 2.0 * diag;
        diagonal[c.source + l] += 2.0 * diag;
        pair_diagonal[c.source] += pair;

        entries.push(PhasedEntry {
            source: c.source,
            target: c.target,
            cell_shift: c.cell_shift,
            a0,
            b0,
        });
    }

    BiquadraticTable {
        entries,
        diagonal,
        pair_diagonal,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::build_frames;
    use crate::model::Site;
    use approx::assert_abs_diff_eq;

    fn chain_frames(spin: f64) -> Vec<LocalFrame> {
        let site = Site::new(Vector3::zeros(), Vector3::new(0.0, 0.0, spin));
        build_frames(&[site]).unwrap()
    }

    #[test]
    fn test_ferromagnetic_chain_table() {
        // One FM bond along x on a single-site chain, S = 1/2.
        let frames = chain_frames(0.5);
        let couplings = vec![Coupling::heisenberg(0, 0, Vector3::x(), -1.0)];
        let table = build_bilinear(&couplings, &frames, &MagneticStructure::commensurate(), false);

        assert_eq!(table.entries.len(), 2);
        // AD0 = √(SᵢSⱼ)·z·(J/2)·z̄ = S·J with z·z̄ = 2.
        for e in &table.entries {
            assert_abs_diff_eq!(e.a0.re, -0.5, epsilon = 1e-12);
            assert_abs_diff_eq!(e.a0.im, 0.0, epsilon = 1e-12);
            // z·J·z = 0 for isotropic exchange in a collinear FM.
            assert_abs_diff_eq!(e.b0.norm(), 0.0, epsilon = 1e-12);
        }
        // Diagonal carries −2·S·(η·J·η) summed over both directions, giving
        // the 2|J|S coordination term of the chain.
        assert_abs_diff_eq!(table.diagonal[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.diagonal[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_easy_axis_anisotropy_table() {
        // A = diag(0, 0, −D) with the moment along z only feeds the
        // diagonal: AD0 and BC0 involve the transverse components alone.
        let frames = chain_frames(1.0);
        let aniso = Matrix3::from_diagonal(&Vector3::new(0.0, 0.0, -1.0));
        let couplings = vec![Coupling::anisotropy(0, aniso)];
        let table = build_bilinear(&couplings, &frames, &MagneticStructure::commensurate(), false);

        for e in &table.entries {
            assert_abs_diff_eq!(e.a0.norm(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(e.b0.norm(), 0.0, epsilon = 1e-12);
        }
        // 2·D·S per boson sector.
        assert_abs_diff_eq!(table.diagonal[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.diagonal[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotating_frame_preserves_on_site_terms() {
        // cell_shift = 0 keeps K = 1, so the rotating-frame transform is a
        // no-op for on-site terms even for incommensurate k.
        let frames = chain_frames(1.0);
        let aniso = Matrix3::from_diagonal(&Vector3::new(0.0, 0.0, -1.0));
        let couplings = vec![Coupling::anisotropy(0, aniso)];
        let helix = MagneticStructure::new(Vector3::new(0.2, 0.0, 0.0), Vector3::z());

        let plain = build_bilinear(&couplings, &frames, &MagneticStructure::commensurate(), false);
        let rotated = build_bilinear(&couplings, &frames, &helix, true);
        assert_abs_diff_eq!(plain.diagonal[0], rotated.diagonal[0], epsilon = 1e-12);
    }

    #[test]
    fn test_biquadratic_ferromagnetic_pair() {
        // Two parallel S = 1 moments: M = 1, O = P = 2, N = Q = 0.
        let site = |x: f64| Site::new(Vector3::new(x, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0));
        let frames = build_frames(&[site(0.0), site(0.5)]).unwrap();
        let couplings = vec![BiquadraticCoupling::new(0, 1, Vector3::zeros(), 0.5)];
        let table = build_biquadratic(&couplings, &frames);

        for e in &table.entries {
            // a0 = b0 = M·O·(J/2) = 2·(J/2).
            assert_abs_diff_eq!(e.a0.re, 0.5, epsilon = 1e-12);
            assert_abs_diff_eq!(e.b0.re, 0.5, epsilon = 1e-12);
        }
        // diag = −2M²·(J/2) doubled into the table.
        assert_abs_diff_eq!(table.diagonal[0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.diagonal[2], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.pair_diagonal[0].norm(), 0.0, epsilon = 1e-12);
    }
}
