use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;

use crate::Result;
use crate::SpinWaveError;
use crate::model::Site;

/// Local reference frame of one ordered moment.
///
/// `eta` is the moment direction and `z = e₁ + i·e₂` the complex transverse
/// basis, with `(e₁, e₂, eta)` a right-handed orthonormal triad.
#[derive(Debug, Clone)]
pub(crate) struct LocalFrame {
    /// The spin length `S = ‖M‖`.
    pub(crate) spin: f64,
    /// The moment unit vector `η`.
    pub(crate) eta: Vector3<f64>,
    /// The complex transverse basis `z`.
    pub(crate) z: Vector3<Complex64>,
}

impl LocalFrame {
    /// Builds the moment-aligned frame from an ordered moment vector.
    pub(crate) fn from_moment(moment: &Vector3<f64>) -> Result<Self> {
        let spin = moment.norm();
        if spin < f64::EPSILON {
            return Err(SpinWaveError::EmptyMagneticStructure);
        }
        let e3 = moment / spin;

        // Any vector perpendicular to η works; this choice keeps e₂ in the
        // yz-plane so collinear structures share their transverse axes.
        let mut e2 = Vector3::new(0.0, e3.z, -e3.y);
        if e2.norm() > 1e-10 {
            e2.normalize_mut();
        } else {
            e2 = Vector3::new(0.0, 0.0, 1.0);
        }
        let e1 = e2.cross(&e3);

        Ok(Self {
            spin,
            eta: e3,
            z: complex_basis(&e1, &e2),
        })
    }

    /// Builds the frame aligned with a complex magnetisation Fourier
    /// amplitude, used for rotating-frame structures.
    pub(crate) fn from_fourier(fourier: &Vector3<Complex64>) -> Result<Self> {
        let re = fourier.map(|c| c.re);
        let im = fourier.map(|c| c.im);

        let spin = re.norm();
        if spin < f64::EPSILON {
            return Err(SpinWaveError::EmptyMagneticStructure);
        }
        let e3 = re / spin;

        let mut e1 = im - e3 * im.dot(&e3);
        if e1.norm() <= 1e-10 {
            // Degenerate amplitude (collinear real and imaginary parts);
            // the moment-aligned construction still applies.
            return Self::from_moment(&re);
        }
        e1.normalize_mut();
        let e2 = e3.cross(&e1);

        Ok(Self {
            spin,
            eta: e3,
            z: complex_basis(&e1, &e2),
        })
    }

    /// The transverse basis with the site g-tensor applied, `z̃ = g·z`.
    pub(crate) fn z_tilde(&self, g: &Matrix3<f64>) -> Vector3<Complex64> {
        g.map(Complex64::from) * self.z
    }
}

fn complex_basis(e1: &Vector3<f64>, e2: &Vector3<f64>) -> Vector3<Complex64> {
    Vector3::new(
        Complex64::new(e1.x, e2.x),
        Complex64::new(e1.y, e2.y),
        Complex64::new(e1.z, e2.z),
    )
}

/// Builds the frame of every site, preferring the Fourier convention where a
/// complex amplitude is supplied.
pub(crate) fn build_frames(sites: &[Site]) -> Result<Vec<LocalFrame>> {
    if sites.is_empty() {
        return Err(SpinWaveError::EmptyMagneticStructure);
    }
    sites
        .iter()
        .map(|site| match &site.fourier {
            Some(f) => LocalFrame::from_fourier(f),
            None => LocalFrame::from_moment(&site.moment),
        })
        .collect()
}
