use std::f64::consts::TAU;

use itertools::izip;
use nalgebra::{DMatrix, DVector, Vector3};
use num_complex::Complex64;

use crate::exchange::{BilinearTable, BiquadraticTable};
use crate::frame::LocalFrame;
use crate::model::{MagneticField, Site, Twin};

/// The Zeeman contribution of one twin: `μ_B·Hᵀ·Rᵗ·gᵢ·ηᵢ` per site, a real
/// diagonal repeated in both boson sectors.
pub(crate) fn zeeman_diagonal(
    field: &MagneticField,
    twin: &Twin,
    sites: &[Site],
    frames: &[LocalFrame],
) -> DVector<f64> {
    let mut diag = DVector::<f64>::zeros(frames.len());
    for (value, site, frame) in izip!(diag.iter_mut(), sites, frames) {
        *value = field.mu_b * field.field.dot(&(twin.rotation * site.g * frame.eta));
    }
    diag
}

/// Assembles the dense 2L×2L Hamiltonian at one Q point.
///
/// `q_ext` is the momentum in extended-cell reciprocal units. The anomalous
/// entries are scattered with a factor 2 into the upper-right block only;
/// the final Hermitization supplies the lower-left partner exactly.
pub(crate) fn assemble(
    bilinear: &BilinearTable,
    biquadratic: Option<&BiquadraticTable>,
    zeeman: &DVector<f64>,
    q_ext: &Vector3<f64>,
    l: usize,
) -> DMatrix<Complex64> {
    let mut h = DMatrix::<Complex64>::zeros(2 * l, 2 * l);

    for e in &bilinear.entries {
        let phase = phase_factor(q_ext, &e.cell_shift);
        h[(e.source, e.target)] += e.a0 * phase;
        h[(e.source, e.target + l)] += e.b0 * phase * 2.0;
        h[(e.source + l, e.target + l)] += e.a0.conj() * phase;
    }
    for i in 0..2 * l {
        h[(i, i)] += Complex64::from(bilinear.diagonal[i]);
    }

    if let Some(bq) = biquadratic {
        for e in &bq.entries {
            let phase = phase_factor(q_ext, &e.cell_shift);
            h[(e.source, e.target)] += e.a0 * phase;
            h[(e.source, e.target + l)] += e.b0 * phase * 2.0;
            h[(e.source + l, e.target + l)] += e.a0.conj() * phase;
        }
        for i in 0..2 * l {
            h[(i, i)] += Complex64::from(bq.diagonal[i]);
        }
        for i in 0..l {
            h[(i, i + l)] += bq.pair_diagonal[i] * 2.0;
        }
    }

    for i in 0..l {
        h[(i, i)] += Complex64::from(zeeman[i]);
        h[(i + l, i + l)] += Complex64::from(zeeman[i]);
    }

    hermitize(&mut h);
    h
}

fn phase_factor(q_ext: &Vector3<f64>, cell_shift: &Vector3<f64>) -> Complex64 {
    Complex64::new(0.0, TAU * q_ext.dot(cell_shift)).exp()
}

/// Replaces `h` with `(h + h†)/2`.
pub(crate) fn hermitize(h: &mut DMatrix<Complex64>) {
    let adjoint = h.adjoint();
    *h += adjoint;
    *h *= Complex64::from(0.5);
}
