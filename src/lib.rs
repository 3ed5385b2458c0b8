//! Linear spin-wave theory for magnetic crystals.
//!
//! Given a magnetic unit cell (sites with ordered moments, bilinear and
//! biquadratic couplings, single-ion anisotropies, an external field and a
//! propagation vector), computes the magnon energies ω(Q) and the dynamical
//! spin–spin correlation tensor Sᵃᵇ(Q, ω) — or its neutron-observable
//! projection S⊥ — over a list of reciprocal-space points.

mod bogoliubov;
mod consts;
mod correlation;
mod error;
mod exchange;
mod frame;
mod hamiltonian;
mod incommensurate;
mod model;
mod spectrum;

pub use model::BiquadraticCoupling;
pub use model::Coupling;
pub use model::FormFactor;
pub use model::MagneticField;
pub use model::MagneticStructure;
pub use model::Site;
pub use model::SpinWaveModel;
pub use model::Twin;

pub use error::SpinWaveError;
pub use error::Warning;
pub use spectrum::CancelToken;
pub use spectrum::SortMode;
pub use spectrum::Spectrum;
pub use spectrum::SpectrumOptions;

pub use consts::*;

pub type Result<T> = std::result::Result<T, SpinWaveError>;
