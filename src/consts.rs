/// The Bohr magneton in meV/T, matching exchange energies given in meV.
pub const MU_B: f64 = 5.788_381_806_0e-2;

/// Default tolerance for deciding whether a propagation vector component is
/// an integer, i.e. whether the structure is commensurate.
pub const K_TOL: f64 = 1e-5;

/// Default energy tolerance. Modes closer than this are treated as
/// degenerate, and the same scale seeds the Cholesky shift retry.
pub const OMEGA_TOL: f64 = 1e-5;

/// Measured bytes-per-Q-element multiplier covering the Hamiltonian,
/// eigenvector, phase-factor and Sab intermediates of a single Q point.
pub const BYTES_PER_Q_ELEMENT: usize = 6912;

/// Fallback memory budget for chunk sizing when no free-memory estimate is
/// available. The value is conservative for workstation use.
pub const DEFAULT_MEMORY_BUDGET: usize = 2 * 1024 * 1024 * 1024;

// The maximum amount of QR iterations granted to the eigensolvers before
// reporting a convergence failure.
pub const MAX_EIG_ITERATIONS: usize = 10_000;
