#[derive(thiserror::Error, Debug)]
pub enum SpinWaveError {
    /// The model holds no site with a non-zero ordered moment.
    #[error("magnetic structure contains no site with a non-zero ordered moment")]
    EmptyMagneticStructure,

    /// The Cholesky decomposition failed even after the shift retry.
    #[error(
        "Hamiltonian is not positive definite at Q index {q_index} \
         (smallest eigenvalue ≈ {min_eigenvalue:.6e})"
    )]
    NonPosDefHamiltonian { q_index: usize, min_eigenvalue: f64 },

    /// The eigensolver did not converge.
    #[error("eigendecomposition did not converge at Q index {q_index}")]
    EigensolverFailure { q_index: usize },

    /// Biquadratic exchange combined with an incommensurate structure.
    #[error("biquadratic exchange is only defined for commensurate structures")]
    BiquadraticIncommensurate,

    /// Input array shape disagreement.
    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Non-fatal findings collected during a run. These never abort the
/// computation; they are handed back next to the results.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A near-singular Hamiltonian was regularized before the Cholesky
    /// decomposition succeeded.
    CholeskyShifted { q_index: usize, shift: f64 },
    /// Degenerate eigenvectors could not be re-orthogonalized.
    DefectiveEigenvectors { q_index: usize },
    /// Mode energies carried an imaginary part above the energy tolerance.
    ImaginaryModes { q_index: usize, max_imag: f64 },
    /// Incommensurate modulation inside an explicit supercell is not
    /// scientifically validated.
    IncommensurateSupercell,
    /// No free-memory estimate is available; chunk sizing uses the built-in
    /// budget.
    FreeMemoryUnknown,
    /// A twin carries a (near) zero rotation matrix.
    ZeroRotationTwin { twin_index: usize },
    /// g-tensor output was requested but every site carries the identity.
    GTensorNotSet,
}
