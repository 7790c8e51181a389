use std::f64::consts::PI;

use faer::{Col, ColRef, Mat, MatRef, Side};
use indicatif::ParallelProgressIterator;
use log::info;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::Error;
use crate::forceconstants::SecondOrder;
use crate::grid::{wrap_coordinates, SamplingGrid};
use crate::structure::{AtomicConfiguration, ReplicatedConfiguration};
use crate::C64;

/// Harmonic observables on a sampling grid.
///
/// Fields:
/// - `frequency`: `(Nk, M)` mode frequencies in THz; negative entries flag
///   imaginary modes (`sign(λ)·√|λ|/(2π)`).
/// - `eigenvalues`: `(Nk, M)` dynamical-matrix eigenvalues in (2π·THz)²,
///   ascending.
/// - `eigenvectors`: per wavevector, modes as columns, orthonormal.
/// - `velocity`: per wavevector, `M×3` real group velocities.
pub struct HarmonicResult {
    pub frequency: Mat<f64>,
    pub eigenvalues: Mat<f64>,
    pub eigenvectors: Vec<Mat<C64>>,
    pub velocity: Vec<Mat<f64>>,
}

/// Phase vector `χ_l(q) = exp(i·R_l·(2π·cell_inv·q))` over the replica
/// images; identically one at Γ.
pub fn chi(q: [f64; 3], replicas: MatRef<f64>, cell_inv: MatRef<f64>) -> Col<C64> {
    let mut kpoint = [0.0f64; 3];
    for (c, k) in kpoint.iter_mut().enumerate() {
        *k = 2.0 * PI * (0..3).map(|j| cell_inv[(c, j)] * q[j]).sum::<f64>();
    }
    Col::from_iter((0..replicas.nrows()).map(|l| {
        let phase = replicas[(l, 0)] * kpoint[0]
            + replicas[(l, 1)] * kpoint[1]
            + replicas[(l, 2)] * kpoint[2];
        C64::new(0.0, phase).exp()
    }))
}

/// Pairs of atoms whose minimum-image distance stays within the threshold,
/// per replica. Used by the short-range (folded) dynamical matrix.
fn folded_mask(
    configuration: &AtomicConfiguration,
    replicated: &ReplicatedConfiguration,
    threshold: f64,
) -> Vec<Vec<bool>> {
    let n_atoms = configuration.n_atoms();
    let cell = replicated.cell.as_ref();
    let cell_inv = replicated.cell_inv();
    (0..replicated.n_replicas)
        .map(|l| {
            let mut keep = vec![false; n_atoms * n_atoms];
            for i in 0..n_atoms {
                for j in 0..n_atoms {
                    let delta = [
                        configuration.positions[(i, 0)]
                            - replicated.positions[(l * n_atoms + j, 0)],
                        configuration.positions[(i, 1)]
                            - replicated.positions[(l * n_atoms + j, 1)],
                        configuration.positions[(i, 2)]
                            - replicated.positions[(l * n_atoms + j, 2)],
                    ];
                    let w = wrap_coordinates(delta, cell, cell_inv.as_ref());
                    let dist = (w[0] * w[0] + w[1] * w[1] + w[2] * w[2]).sqrt();
                    keep[i * n_atoms + j] = dist < threshold;
                }
            }
            keep
        })
        .collect()
}

struct KPoint {
    frequency: Vec<f64>,
    eigenvalues: Vec<f64>,
    eigenvectors: Mat<C64>,
    velocity: Mat<f64>,
}

/// The q-independent part of the sweep: mass-weighted blocks, replica
/// minimum images and the optional short-range mask, shared read-only by the
/// workers.
pub struct Diagonalizer<'a> {
    configuration: &'a AtomicConfiguration,
    replicated: &'a ReplicatedConfiguration,
    dyn_blocks: Vec<Mat<f64>>,
    mask: Option<Vec<Vec<bool>>>,
    cell_inv: Mat<f64>,
}

impl<'a> Diagonalizer<'a> {
    pub fn new(
        second: &SecondOrder,
        configuration: &'a AtomicConfiguration,
        replicated: &'a ReplicatedConfiguration,
        distance_threshold: Option<f64>,
    ) -> Self {
        if distance_threshold.is_some() {
            info!("using folded short-range dynamical matrix");
        }
        Diagonalizer {
            configuration,
            replicated,
            dyn_blocks: second.dynmat(&configuration.masses),
            mask: distance_threshold.map(|t| folded_mask(configuration, replicated, t)),
            cell_inv: configuration.cell_inv(),
        }
    }

    fn n_modes(&self) -> usize {
        self.dyn_blocks[0].nrows()
    }

    fn is_amorphous(&self) -> bool {
        self.replicated.n_replicas == 1
    }

    fn pair_kept(&self, l: usize, row: usize, col: usize) -> bool {
        match &self.mask {
            Some(mask) => mask[l][(row / 3) * (self.n_modes() / 3) + col / 3],
            None => true,
        }
    }

    /// Sweep the full grid; results land at their flat grid index.
    pub fn diagonalize_grid(&self, grid: &SamplingGrid) -> Result<HarmonicResult, Error> {
        let nk = grid.n_points();
        let m = self.n_modes();
        let kpoints: Vec<KPoint> = (0..nk)
            .into_par_iter()
            .progress_count(nk as u64)
            .map(|ik| {
                self.diagonalize_single_k(grid.q_vector(ik))
                    .ok_or(Error::Diagonalization { ik })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut frequency = Mat::<f64>::zeros(nk, m);
        let mut eigenvalues = Mat::<f64>::zeros(nk, m);
        let mut eigenvectors = Vec::with_capacity(nk);
        let mut velocity = Vec::with_capacity(nk);
        for (ik, kpoint) in kpoints.into_iter().enumerate() {
            for n in 0..m {
                frequency[(ik, n)] = kpoint.frequency[n];
                eigenvalues[(ik, n)] = kpoint.eigenvalues[n];
            }
            eigenvectors.push(kpoint.eigenvectors);
            velocity.push(kpoint.velocity);
        }
        Ok(HarmonicResult {
            frequency,
            eigenvalues,
            eigenvectors,
            velocity,
        })
    }

    /// `D(q) = Σ_l Φ_l·χ_l(q)`, mass weighted; Hermitian by construction.
    fn assemble(&self, chi_k: ColRef<C64>) -> Mat<C64> {
        let m = self.n_modes();
        let mut dyn_s = Mat::<C64>::zeros(m, m);
        for (l, block) in self.dyn_blocks.iter().enumerate() {
            let x = chi_k[l];
            for row in 0..m {
                for col in 0..m {
                    if self.pair_kept(l, row, col) {
                        dyn_s[(row, col)] += x * block[(row, col)];
                    }
                }
            }
        }
        dyn_s
    }

    fn assemble_real(&self) -> Mat<f64> {
        let m = self.n_modes();
        let mut dyn_s = Mat::<f64>::zeros(m, m);
        for (l, block) in self.dyn_blocks.iter().enumerate() {
            for row in 0..m {
                for col in 0..m {
                    if self.pair_kept(l, row, col) {
                        dyn_s[(row, col)] += block[(row, col)];
                    }
                }
            }
        }
        dyn_s
    }

    /// `∂D/∂q` per Cartesian direction: each replica term picks up a factor
    /// `i·R_l` (crystal) or `i·(r_i − r_j)` wrapped into the replicated cell
    /// for single-replica systems, where the phase sum is empty.
    pub fn derivative(&self, chi_k: ColRef<C64>) -> [Mat<C64>; 3] {
        let m = self.n_modes();
        let mut ddyn = [
            Mat::<C64>::zeros(m, m),
            Mat::<C64>::zeros(m, m),
            Mat::<C64>::zeros(m, m),
        ];
        if self.is_amorphous() {
            let n_atoms = m / 3;
            let block = &self.dyn_blocks[0];
            let cell = self.replicated.cell.as_ref();
            let cell_inv = self.replicated.cell_inv();
            for i in 0..n_atoms {
                for j in 0..n_atoms {
                    let delta = [
                        self.configuration.positions[(i, 0)] - self.configuration.positions[(j, 0)],
                        self.configuration.positions[(i, 1)] - self.configuration.positions[(j, 1)],
                        self.configuration.positions[(i, 2)] - self.configuration.positions[(j, 2)],
                    ];
                    if !self.pair_kept(0, 3 * i, 3 * j) {
                        continue;
                    }
                    let w = wrap_coordinates(delta, cell, cell_inv.as_ref());
                    for a in 0..3 {
                        let factor = C64::new(0.0, w[a]);
                        for alpha in 0..3 {
                            for beta in 0..3 {
                                ddyn[a][(3 * i + alpha, 3 * j + beta)] +=
                                    factor * block[(3 * i + alpha, 3 * j + beta)];
                            }
                        }
                    }
                }
            }
            return ddyn;
        }
        for (l, block) in self.dyn_blocks.iter().enumerate() {
            let x = chi_k[l];
            for a in 0..3 {
                let factor = C64::new(0.0, self.replicated.wrapped_replica_vectors[(l, a)]) * x;
                for row in 0..m {
                    for col in 0..m {
                        if self.pair_kept(l, row, col) {
                            ddyn[a][(row, col)] += factor * block[(row, col)];
                        }
                    }
                }
            }
        }
        ddyn
    }

    pub fn chi(&self, q: [f64; 3]) -> Col<C64> {
        chi(
            q,
            self.replicated.wrapped_replica_vectors.as_ref(),
            self.cell_inv.as_ref(),
        )
    }

    fn diagonalize_single_k(&self, q: [f64; 3]) -> Option<KPoint> {
        let m = self.n_modes();
        let is_gamma = q == [0.0, 0.0, 0.0];
        let chi_k = self.chi(q);

        // at Γ (and for single-replica systems) the matrix is real symmetric
        let (eigenvalues, eigenvectors) = if is_gamma || self.is_amorphous() {
            let dyn_s = self.assemble_real();
            let eigen = dyn_s.self_adjoint_eigen(Side::Lower).ok()?;
            let values: Vec<f64> = eigen.S().column_vector().iter().copied().collect();
            let real_vectors = eigen.U().to_owned();
            let vectors = Mat::<C64>::from_fn(m, m, |i, j| C64::new(real_vectors[(i, j)], 0.0));
            (values, vectors)
        } else {
            let dyn_s = self.assemble(chi_k.as_ref());
            let eigen = dyn_s.self_adjoint_eigen(Side::Lower).ok()?;
            let values: Vec<f64> = eigen.S().column_vector().iter().map(|x| x.re).collect();
            (values, eigen.U().to_owned())
        };
        let (eigenvalues, eigenvectors) = sort_ascending(eigenvalues, eigenvectors);

        let frequency: Vec<f64> = eigenvalues
            .iter()
            .map(|&lambda| lambda.abs().sqrt() * lambda.signum() / (2.0 * PI))
            .collect();

        let ddyn = self.derivative(chi_k.as_ref());
        let mut velocity = Mat::<f64>::zeros(m, 3);
        for n in 0..m {
            if frequency[n] == 0.0 {
                continue;
            }
            let mode = eigenvectors.col(n);
            for (a, ddyn_a) in ddyn.iter().enumerate() {
                let value: C64 = mode.adjoint() * ddyn_a.as_ref() * mode;
                // the imaginary residue is numerical noise once the replica
                // images are minimum-image wrapped
                velocity[(n, a)] = value.re / (2.0 * (2.0 * PI) * frequency[n]);
            }
        }

        Some(KPoint {
            frequency,
            eigenvalues,
            eigenvectors,
            velocity,
        })
    }

    /// Mode-pair flux operators `S[m,n,α] = ⟨e_m|∂D_α|e_n⟩` for every grid
    /// point; only needed by the quasi-harmonic Green–Kubo solver.
    pub fn flux_operators(
        &self,
        grid: &SamplingGrid,
        harmonic: &HarmonicResult,
    ) -> Vec<[Mat<C64>; 3]> {
        let nk = grid.n_points();
        (0..nk)
            .into_par_iter()
            .map(|ik| {
                let chi_k = self.chi(grid.q_vector(ik));
                let ddyn = self.derivative(chi_k.as_ref());
                let vectors = &harmonic.eigenvectors[ik];
                ddyn.map(|d| vectors.adjoint() * d.as_ref() * vectors.as_ref())
            })
            .collect()
    }
}

/// Lorentzian-smeared vibrational density of states over the grid.
///
/// Returns the energy axis (THz, from zero to just past the highest mode)
/// and the normalized density: each mode carries weight `1/Nk`, so the full
/// integral approaches `M`.
pub fn density_of_states(
    frequency: &Mat<f64>,
    n_energies: usize,
    delta: f64,
) -> (Vec<f64>, Vec<f64>) {
    let nk = frequency.nrows();
    let m = frequency.ncols();
    let mut top = 0.0f64;
    for ik in 0..nk {
        for mu in 0..m {
            top = top.max(frequency[(ik, mu)]);
        }
    }
    top += 5e-3;
    let energies: Vec<f64> = (0..n_energies)
        .map(|i| top * i as f64 / (n_energies - 1) as f64)
        .collect();
    let half = 0.5 * delta;
    let mut dos = vec![0.0; n_energies];
    for (e, d) in energies.iter().zip(dos.iter_mut()) {
        for ik in 0..nk {
            for mu in 0..m {
                let diff = e - frequency[(ik, mu)];
                *d += 1.0 / (diff * diff + half * half);
            }
        }
        *d *= half / (nk as f64 * PI);
    }
    (energies, dos)
}

/// Ascending eigenvalue order is part of the contract; the backend order is
/// not relied upon.
fn sort_ascending(values: Vec<f64>, vectors: Mat<C64>) -> (Vec<f64>, Mat<C64>) {
    let m = values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    if order.iter().enumerate().all(|(i, &o)| i == o) {
        return (values, vectors);
    }
    let sorted_values = order.iter().map(|&o| values[o]).collect();
    let sorted_vectors = Mat::from_fn(m, m, |i, j| vectors[(i, order[j])]);
    (sorted_values, sorted_vectors)
}
