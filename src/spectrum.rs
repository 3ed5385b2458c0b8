use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use ndarray::{Array2, Array4};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::Result;
use crate::SpinWaveError;
use crate::bogoliubov::{self, Method};
use crate::consts::{BYTES_PER_Q_ELEMENT, DEFAULT_MEMORY_BUDGET, K_TOL, OMEGA_TOL};
use crate::correlation;
use crate::error::Warning;
use crate::exchange::{self, BilinearTable, BiquadraticTable};
use crate::frame::{self, LocalFrame};
use crate::hamiltonian;
use crate::incommensurate::{LabRotation, THIRDS, Third, integrate_helical_phase, triple_hkl};
use crate::model::{SpinWaveModel, Twin};

/// Ordering of the modes within one diagonalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Descending energy; ties broken by ascending imaginary part, then by
    /// the eigensolver's original index (stable).
    #[default]
    Descending,
    /// The reverse of [`SortMode::Descending`].
    Ascending,
}

/// Cooperative cancellation token, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the computation to stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Knobs of one spin-wave computation.
#[derive(Debug, Clone)]
pub struct SpectrumOptions {
    /// Use the Cholesky (Colpa) diagonalization. With `false`, `G·h` is
    /// diagonalized directly (White), which tolerates unstable structures.
    pub hermit: bool,
    /// Only materialize the positive-energy half of the modes.
    pub fast_mode: bool,
    /// Return the neutron projection `S⊥` instead of the full `Sab` tensor.
    pub neutron_output: bool,
    /// Apply the per-site magnetic form factors.
    pub form_factor: bool,
    /// Apply the per-site g-tensors to the correlation tensor.
    pub g_tensor: bool,
    /// Energy tolerance for degeneracies and the Cholesky shift scale.
    pub omega_tol: f64,
    /// Tolerance for deciding the commensurability of `k`.
    pub tol: f64,
    pub sort_mode: SortMode,
    /// Worker threads for the per-Q loop. `None` uses the global pool.
    pub threads: Option<usize>,
    /// Explicit Q points per chunk, bypassing the memory heuristic.
    pub chunk_override: Option<usize>,
    /// Free-memory estimate in bytes for the chunk heuristic.
    pub memory_budget: Option<usize>,
    /// Normalize intensities by this many formula units when set.
    pub n_formula: Option<usize>,
    /// Keep the Bogoliubov eigenvectors of the first twin.
    pub keep_vectors: bool,
    /// Keep the assembled Hamiltonians of the first twin.
    pub keep_hamiltonians: bool,
    /// Keep the rotating-frame correlation tensor of the center third.
    pub keep_rotating_frame: bool,
    pub cancel: Option<CancelToken>,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        Self {
            hermit: true,
            fast_mode: false,
            neutron_output: false,
            form_factor: false,
            g_tensor: false,
            omega_tol: OMEGA_TOL,
            tol: K_TOL,
            sort_mode: SortMode::default(),
            threads: None,
            chunk_override: None,
            memory_budget: None,
            n_formula: None,
            keep_vectors: false,
            keep_hamiltonians: false,
            keep_rotating_frame: false,
            cancel: None,
        }
    }
}

/// Results of one spin-wave computation. All arrays are caller-owned.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// The (untripled) input Q list, 3×nQ in r.l.u.
    pub hkl: Array2<f64>,
    /// Mode energies per twin, nModes×nQ. For incommensurate structures the
    /// rows hold the (Q−k, Q, Q+k) thirds concatenated in that order.
    pub omega: Vec<Array2<f64>>,
    /// Twin-volume-weighted correlation tensor, 3×3×nModes×nQ. Absent when
    /// the neutron projection was requested instead.
    pub sab: Option<Array4<Complex64>>,
    /// Neutron-observable projection, nModes×nQ.
    pub sperp: Option<Array2<f64>>,
    /// Rotating-frame tensor of the center third (first twin), on request.
    pub sabp: Option<Array4<Complex64>>,
    /// Bogoliubov eigenvectors per diagonalized Q (first twin), on request.
    pub vectors: Option<Vec<DMatrix<Complex64>>>,
    /// Assembled Hamiltonians per diagonalized Q (first twin), on request.
    pub hamiltonians: Option<Vec<DMatrix<Complex64>>>,
    pub warnings: Vec<Warning>,
    /// Whether the run was cancelled; untouched output entries stay zero.
    pub cancelled: bool,
}

impl SpinWaveModel {
    /// Computes mode energies and correlation tensors for every Q point.
    ///
    /// `hkl` is 3×nQ in reciprocal-lattice units of the crystal cell.
    pub fn spectrum(&self, hkl: &Array2<f64>, options: &SpectrumOptions) -> Result<Spectrum> {
        if hkl.nrows() != 3 {
            return Err(SpinWaveError::DimensionMismatch {
                what: "hkl rows",
                expected: 3,
                found: hkl.nrows(),
            });
        }

        let engine = Engine::new(self, options)?;
        match options.threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(|| engine.run(hkl)),
                Err(_) => engine.run(hkl),
            },
            None => engine.run(hkl),
        }
    }
}

/// One Q point solved: energies, per-mode tensors and optional diagnostics.
struct QSolution {
    energies: Vec<f64>,
    tensors: Vec<Matrix3<Complex64>>,
    vectors: Option<DMatrix<Complex64>>,
    hamiltonian: Option<DMatrix<Complex64>>,
    warnings: Vec<Warning>,
}

/// Immutable per-run state shared by every worker thread.
struct Engine<'a> {
    model: &'a SpinWaveModel,
    options: &'a SpectrumOptions,
    frames: Vec<LocalFrame>,
    bilinear: BilinearTable,
    biquadratic: Option<BiquadraticTable>,
    incommensurate: bool,
    helical: bool,
    /// Propagation vector expressed in crystal r.l.u.
    k_rlu: Vector3<f64>,
    basis_inverse: Matrix3<f64>,
    method: Method,
    setup_warnings: Vec<Warning>,
}

impl<'a> Engine<'a> {
    fn new(model: &'a SpinWaveModel, options: &'a SpectrumOptions) -> Result<Self> {
        let l = model.sites.len();
        if l == 0 {
            return Err(SpinWaveError::EmptyMagneticStructure);
        }
        for c in &model.couplings {
            let index = c.source.max(c.target);
            if index >= l {
                return Err(SpinWaveError::DimensionMismatch {
                    what: "coupling site index",
                    expected: l,
                    found: index,
                });
            }
        }
        for c in &model.biquadratic {
            let index = c.source.max(c.target);
            if index >= l {
                return Err(SpinWaveError::DimensionMismatch {
                    what: "biquadratic site index",
                    expected: l,
                    found: index,
                });
            }
        }
        if model.n_ext.contains(&0) {
            return Err(SpinWaveError::DimensionMismatch {
                what: "n_ext entry",
                expected: 1,
                found: 0,
            });
        }

        let incommensurate = model.structure.is_incommensurate(options.tol);
        let helical = model.structure.is_helical(options.tol);
        if incommensurate && !model.biquadratic.is_empty() {
            return Err(SpinWaveError::BiquadraticIncommensurate);
        }

        let mut setup_warnings = Vec::new();
        if incommensurate && model.n_ext != [1, 1, 1] {
            setup_warnings.push(Warning::IncommensurateSupercell);
        }
        if options.g_tensor && model.sites.iter().all(|s| s.g == Matrix3::identity()) {
            setup_warnings.push(Warning::GTensorNotSet);
        }
        for (twin_index, twin) in model.twins.iter().enumerate() {
            if twin.rotation.norm() < 1e-10 {
                setup_warnings.push(Warning::ZeroRotationTwin { twin_index });
            }
        }

        let frames = frame::build_frames(&model.sites)?;
        let bilinear =
            exchange::build_bilinear(&model.couplings, &frames, &model.structure, incommensurate);
        let biquadratic = if model.biquadratic.is_empty() {
            None
        } else {
            Some(exchange::build_biquadratic(&model.biquadratic, &frames))
        };

        let basis_inverse =
            model
                .reciprocal_basis
                .try_inverse()
                .ok_or(SpinWaveError::DimensionMismatch {
                    what: "reciprocal basis rank",
                    expected: 3,
                    found: 0,
                })?;

        Ok(Self {
            model,
            options,
            frames,
            bilinear,
            biquadratic,
            incommensurate,
            helical,
            k_rlu: model.structure.k.component_div(&model.n_ext_vector()),
            basis_inverse,
            method: if options.hermit { Method::Colpa } else { Method::White },
            setup_warnings,
        })
    }

    fn run(mut self, hkl: &Array2<f64>) -> Result<Spectrum> {
        let l = self.frames.len();
        let n_q = hkl.ncols();
        let per_diag = if self.options.fast_mode { l } else { 2 * l };
        let unfold = if self.incommensurate { 3 } else { 1 };
        let n_modes = per_diag * unfold;
        let n_q_d = n_q * unfold;

        let chunk_size = self.chunk_size(l, n_q_d);
        let twins = if self.model.twins.is_empty() {
            vec![Twin::identity()]
        } else {
            self.model.twins.clone()
        };
        let total_volume: f64 = twins.iter().map(|t| t.volume).sum();
        let rotation = LabRotation::new(&self.model.structure.axis);

        let mut omega = Vec::with_capacity(twins.len());
        let mut sab_acc = vec![vec![Matrix3::<Complex64>::zeros(); n_modes]; n_q];
        let mut sabp_acc = (self.options.keep_rotating_frame && self.incommensurate)
            .then(|| vec![vec![Matrix3::<Complex64>::zeros(); per_diag]; n_q]);
        let mut vectors_out = self
            .options
            .keep_vectors
            .then(|| vec![DMatrix::<Complex64>::zeros(0, 0); n_q_d]);
        let mut hamiltonians_out = self
            .options
            .keep_hamiltonians
            .then(|| vec![DMatrix::<Complex64>::zeros(0, 0); n_q_d]);
        let mut warnings = std::mem::take(&mut self.setup_warnings);
        let mut cancelled = false;

        let indices: Vec<usize> = (0..n_q_d).collect();

        for (twin_index, twin) in twins.iter().enumerate() {
            let hkl_twin = self.twin_frame_hkl(hkl, twin);
            let hkl_d = if self.incommensurate {
                triple_hkl(&hkl_twin, &self.k_rlu)
            } else {
                hkl_twin
            };
            let zeeman =
                hamiltonian::zeeman_diagonal(&self.model.field, twin, &self.model.sites, &self.frames);

            // Chunks run sequentially to bound peak memory; Q points within
            // a chunk fan out on the thread pool.
            let mut solutions: Vec<Option<QSolution>> = (0..n_q_d).map(|_| None).collect();
            for chunk in indices.chunks(chunk_size) {
                if self.options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                    cancelled = true;
                    break;
                }
                let results: Vec<(usize, Result<QSolution>)> = chunk
                    .par_iter()
                    .map(|&qi| (qi, self.solve_q(&hkl_d, qi, &zeeman)))
                    .collect();
                for (qi, result) in results {
                    solutions[qi] = Some(result?);
                }
            }

            let weight = twin.volume / total_volume;
            let twin_rotation = twin.rotation.map(Complex64::from);
            let mut omega_twin = Array2::<f64>::zeros((n_modes, n_q));

            let thirds: &[Third] = if self.incommensurate {
                &THIRDS
            } else {
                &[Third::Center]
            };
            for q in 0..n_q {
                for (block, &third) in thirds.iter().enumerate() {
                    let qi = q * unfold + block;
                    let Some(solution) = solutions[qi].take() else {
                        continue;
                    };
                    warnings.extend(solution.warnings);

                    for (m, &energy) in solution.energies.iter().enumerate() {
                        omega_twin[[block * per_diag + m, q]] = energy;
                    }
                    for (m, tensor) in solution.tensors.into_iter().enumerate() {
                        let mut tensor = tensor;
                        if self.incommensurate {
                            if twin_index == 0 && third == Third::Center {
                                if let Some(acc) = sabp_acc.as_mut() {
                                    acc[q][m] = tensor;
                                }
                            }
                            rotation.apply(&mut tensor, third);
                            if self.helical {
                                integrate_helical_phase(&mut tensor, &self.model.structure.axis);
                            }
                        }
                        tensor = twin_rotation * tensor * twin_rotation.transpose();
                        sab_acc[q][block * per_diag + m] += tensor * Complex64::from(weight);
                    }
                    if twin_index == 0 {
                        if let (Some(out), Some(v)) = (vectors_out.as_mut(), solution.vectors) {
                            out[qi] = v;
                        }
                        if let (Some(out), Some(h)) = (hamiltonians_out.as_mut(), solution.hamiltonian)
                        {
                            out[qi] = h;
                        }
                    }
                }
            }
            omega.push(omega_twin);
            if cancelled {
                break;
            }
        }

        if self.options.sort_mode == SortMode::Ascending {
            for omega_twin in &mut omega {
                reverse_mode_blocks(omega_twin, per_diag, unfold);
            }
            for modes in &mut sab_acc {
                for block in 0..unfold {
                    modes[block * per_diag..(block + 1) * per_diag].reverse();
                }
            }
        }

        if let Some(n_formula) = self.options.n_formula.filter(|&n| n > 0) {
            let scale = Complex64::from(1.0 / n_formula as f64);
            for modes in &mut sab_acc {
                for tensor in modes.iter_mut() {
                    *tensor *= scale;
                }
            }
        }

        let sperp = self
            .options
            .neutron_output
            .then(|| self.neutron_output(hkl, &sab_acc, n_modes, n_q));
        let sab = if self.options.neutron_output {
            None
        } else {
            Some(tensors_to_array(&sab_acc, n_modes, n_q))
        };
        let sabp = sabp_acc.map(|acc| tensors_to_array(&acc, per_diag, n_q));

        Ok(Spectrum {
            hkl: hkl.clone(),
            omega,
            sab,
            sperp,
            sabp,
            vectors: vectors_out,
            hamiltonians: hamiltonians_out,
            warnings,
            cancelled,
        })
    }

    /// Solves one column of the (possibly tripled) Q list.
    fn solve_q(
        &self,
        hkl_d: &Array2<f64>,
        q_index: usize,
        zeeman: &DVector<f64>,
    ) -> Result<QSolution> {
        let l = self.frames.len();
        let column = Vector3::new(
            hkl_d[[0, q_index]],
            hkl_d[[1, q_index]],
            hkl_d[[2, q_index]],
        );
        let q_ext = column.component_mul(&self.model.n_ext_vector());

        let h = hamiltonian::assemble(&self.bilinear, self.biquadratic.as_ref(), zeeman, &q_ext, l);

        let mut warnings = Vec::new();
        let modes = bogoliubov::diagonalize(
            &h,
            l,
            self.method,
            self.options.fast_mode,
            self.options.omega_tol,
            q_index,
            &mut warnings,
        )?;

        let q_abs = (self.model.reciprocal_basis * column).norm();
        let [na, nb, nc] = self.model.n_ext;
        let n_cell = (na * nb * nc) as f64;
        let tensors = correlation::sab_modes(
            &modes,
            &self.model.sites,
            &self.frames,
            &q_ext,
            q_abs,
            self.options.form_factor,
            self.options.g_tensor,
            n_cell,
        );

        let vectors = self.options.keep_vectors.then(|| modes.vectors.clone());
        let hamiltonian = self.options.keep_hamiltonians.then_some(h);

        Ok(QSolution {
            energies: modes.energies,
            tensors,
            vectors,
            hamiltonian,
            warnings,
        })
    }

    /// Maps the lab-frame Q list into the frame of one twin.
    fn twin_frame_hkl(&self, hkl: &Array2<f64>, twin: &Twin) -> Array2<f64> {
        let map = self.basis_inverse * twin.rotation.transpose() * self.model.reciprocal_basis;
        let mut out = hkl.clone();
        for mut column in out.columns_mut() {
            let q = map * Vector3::new(column[0], column[1], column[2]);
            column[0] = q.x;
            column[1] = q.y;
            column[2] = q.z;
        }
        out
    }

    /// Contiguous chunk length from the per-Q memory heuristic.
    fn chunk_size(&mut self, l: usize, n_q_d: usize) -> usize {
        if let Some(n) = self.options.chunk_override.filter(|&n| n > 0) {
            return n;
        }
        let budget = match self.options.memory_budget {
            Some(bytes) => bytes,
            None => {
                self.setup_warnings.push(Warning::FreeMemoryUnknown);
                DEFAULT_MEMORY_BUDGET
            }
        };
        let cost = (l * l) as f64 * n_q_d as f64 * BYTES_PER_Q_ELEMENT as f64 * 2.0;
        let n_slice = (cost / budget as f64).ceil().max(1.0) as usize;
        n_q_d.div_ceil(n_slice.min(n_q_d.max(1))).max(1)
    }

    /// The per-mode neutron projection, with the Q = 0 direction taken from
    /// the next Q point (or x̂ for a trailing zero).
    fn neutron_output(
        &self,
        hkl: &Array2<f64>,
        sab_acc: &[Vec<Matrix3<Complex64>>],
        n_modes: usize,
        n_q: usize,
    ) -> Array2<f64> {
        let q_cart: Vec<Vector3<f64>> = (0..n_q)
            .map(|q| {
                self.model.reciprocal_basis
                    * Vector3::new(hkl[[0, q]], hkl[[1, q]], hkl[[2, q]])
            })
            .collect();

        let mut out = Array2::<f64>::zeros((n_modes, n_q));
        for q in 0..n_q {
            let direction = q_cart[q..]
                .iter()
                .find(|v| v.norm() > 1e-10)
                .map(|v| v.normalize())
                .unwrap_or_else(Vector3::x);
            let sperp = correlation::neutron_projection(&sab_acc[q], &direction);
            for (m, value) in sperp.into_iter().enumerate() {
                out[[m, q]] = value;
            }
        }
        out
    }
}

/// Reverses the mode order inside each diagonalization block.
fn reverse_mode_blocks(omega: &mut Array2<f64>, per_diag: usize, unfold: usize) {
    let n_q = omega.ncols();
    for block in 0..unfold {
        let start = block * per_diag;
        for q in 0..n_q {
            for m in 0..per_diag / 2 {
                let (a, b) = (start + m, start + per_diag - 1 - m);
                omega.swap([a, q], [b, q]);
            }
        }
    }
}

fn tensors_to_array(
    acc: &[Vec<Matrix3<Complex64>>],
    n_modes: usize,
    n_q: usize,
) -> Array4<Complex64> {
    let mut out = Array4::<Complex64>::zeros((3, 3, n_modes, n_q));
    for (q, modes) in acc.iter().enumerate().take(n_q) {
        for (m, tensor) in modes.iter().enumerate().take(n_modes) {
            for a in 0..3 {
                for b in 0..3 {
                    out[[a, b, m, q]] = tensor[(a, b)];
                }
            }
        }
    }
    out
}
