use std::f64::consts::TAU;

use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;

use crate::bogoliubov::Modes;
use crate::frame::LocalFrame;
use crate::model::Site;

/// Per-mode 3×3 spin–spin correlation tensors at one Q point.
///
/// Each tensor is the rank-one product `Lᵃ·conj(Lᵇ)/NCell` of the
/// eigenvector contraction with the rotated transverse bases, so it is
/// Hermitian and positive semi-definite by construction.
pub(crate) fn sab_modes(
    modes: &Modes,
    sites: &[Site],
    frames: &[LocalFrame],
    q_ext: &Vector3<f64>,
    q_abs: f64,
    use_form_factor: bool,
    use_g_tensor: bool,
    n_cell: f64,
) -> Vec<Matrix3<Complex64>> {
    let l = frames.len();
    let n_modes = modes.vectors.ncols();

    // Site phases exp(−i·2π·Q·rᵢ)·√(Sᵢ/2), with the form factor folded in
    // symmetrically.
    let mut weights = Vec::with_capacity(l);
    let mut bases = Vec::with_capacity(l);
    for (site, frame) in sites.iter().zip(frames) {
        let phase = Complex64::new(0.0, -TAU * q_ext.dot(&site.position)).exp();
        let mut weight = phase * (frame.spin / 2.0).sqrt();
        if use_form_factor {
            if let Some(ff) = &site.form_factor {
                weight *= ff.evaluate(q_abs);
            }
        }
        weights.push(weight);
        let z = if use_g_tensor {
            frame.z_tilde(&site.g)
        } else {
            frame.z
        };
        bases.push(z);
    }

    let mut tensors = Vec::with_capacity(n_modes);
    for mu in 0..n_modes {
        let mut contraction = Vector3::<Complex64>::zeros();
        for i in 0..l {
            let v_lower = modes.vectors[(i, mu)];
            let v_upper = modes.vectors[(i + l, mu)];
            let zbar = bases[i].map(|c| c.conj());
            contraction += (bases[i] * v_lower + zbar * v_upper) * weights[i];
        }

        let mut sab = Matrix3::<Complex64>::zeros();
        for a in 0..3 {
            for b in 0..3 {
                sab[(a, b)] = contraction[a] * contraction[b].conj() / n_cell;
            }
        }
        tensors.push(sab);
    }
    tensors
}

/// The neutron-observable projection `S⊥ = (δ − q̂q̂ᵀ) : (Sab + Sba)/2` per
/// mode.
pub(crate) fn neutron_projection(tensors: &[Matrix3<Complex64>], q_hat: &Vector3<f64>) -> Vec<f64> {
    tensors
        .iter()
        .map(|sab| {
            let mut total = 0.0;
            for a in 0..3 {
                for b in 0..3 {
                    let delta = if a == b { 1.0 } else { 0.0 };
                    let projector = delta - q_hat[a] * q_hat[b];
                    let symmetric = (sab[(a, b)] + sab[(b, a)]) * 0.5;
                    total += projector * symmetric.re;
                }
            }
            total
        })
        .collect()
}
