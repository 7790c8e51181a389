use std::f64::consts::PI;

use faer::linalg::solvers::Solve;
use faer::{Mat, Side};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::DELTA_THRESHOLD;
use crate::error::Error;
use crate::C64;

/// Iteration cap of the self-consistent closure.
pub const MAX_ITERATIONS_SC: usize = 200;

/// Closure used to turn bandwidths into a conductivity tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Rta,
    Inverse,
    SelfConsistent,
    Qhgk,
}

/// Boundary-scattering model composed onto the RTA and self-consistent
/// closures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiniteSizeMethod {
    #[serde(alias = "matthiesen")]
    Matthiessen,
    Caltech,
}

impl Default for FiniteSizeMethod {
    fn default() -> Self {
        FiniteSizeMethod::Matthiessen
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FiniteSize {
    pub method: FiniteSizeMethod,
    pub length: f64,
    pub axis: usize,
}

/// How the self-consistent loop terminated. Both outcomes carry a usable
/// tensor; `HitCap` additionally logs a warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScOutcome {
    Converged { iterations: usize },
    HitCap,
}

enum SolverState {
    Init,
    Iterating,
    Converged,
    HitCap,
}

/// Common input contract of the four closures. Mode data is indexed
/// `(ik, μ)`; flattened mode indices are `ν = ik·M + μ`.
pub struct SolverInput<'a> {
    pub frequency: &'a Mat<f64>,
    pub velocity: &'a [Mat<f64>],
    pub heat_capacity: &'a Mat<f64>,
    /// Summed-channel bandwidths in rad/ps.
    pub bandwidth: &'a Mat<f64>,
    pub scattering_matrix: Option<&'a Mat<f64>>,
    pub flux_operators: Option<&'a [[Mat<C64>; 3]]>,
    /// Unit-cell volume in Å³.
    pub volume: f64,
    pub finite_size: Option<FiniteSize>,
    pub tolerance: Option<f64>,
    pub n_iterations: Option<usize>,
    /// Uniform half-bandwidth override in THz; switches QHGK to its sparse
    /// pair enumeration.
    pub third_bandwidth: Option<f64>,
}

/// Mode-resolved conductivity tensor in W/m·K; sum `per_mode` for the bulk
/// value.
pub struct ModeConductivity {
    pub per_mode: Vec<[[f64; 3]; 3]>,
    pub sc_outcome: Option<ScOutcome>,
}

impl ModeConductivity {
    pub fn total(&self) -> [[f64; 3]; 3] {
        let mut out = [[0.0; 3]; 3];
        for tensor in &self.per_mode {
            for a in 0..3 {
                for b in 0..3 {
                    out[a][b] += tensor[a][b];
                }
            }
        }
        out
    }

    pub fn mean_diagonal(&self) -> f64 {
        let total = self.total();
        (total[0][0] + total[1][1] + total[2][2]) / 3.0
    }
}

pub fn calculate(input: &SolverInput, method: Method) -> Result<ModeConductivity, Error> {
    match method {
        Method::Rta => Ok(rta(input)),
        Method::Inverse => inverse(input),
        Method::SelfConsistent => self_consistent(input),
        Method::Qhgk => qhgk(input),
    }
}

struct FlatModes {
    n_phonons: usize,
    velocity: Vec<[f64; 3]>,
    heat_capacity: Vec<f64>,
    bandwidth: Vec<f64>,
    physical: Vec<bool>,
}

fn flatten(input: &SolverInput) -> FlatModes {
    let nk = input.frequency.nrows();
    let m = input.frequency.ncols();
    let n_phonons = nk * m;
    let mut velocity = vec![[0.0; 3]; n_phonons];
    let mut heat_capacity = vec![0.0; n_phonons];
    let mut bandwidth = vec![0.0; n_phonons];
    let mut physical = vec![false; n_phonons];
    for ik in 0..nk {
        for mu in 0..m {
            let nu = ik * m + mu;
            for a in 0..3 {
                velocity[nu][a] = input.velocity[ik][(mu, a)];
            }
            heat_capacity[nu] = input.heat_capacity[(ik, mu)];
            bandwidth[nu] = input.bandwidth[(ik, mu)];
            physical[nu] = input.frequency[(ik, mu)] > 0.0;
        }
    }
    FlatModes {
        n_phonons,
        velocity,
        heat_capacity,
        bandwidth,
        physical,
    }
}

fn prefactor(input: &SolverInput) -> f64 {
    1e22 / (input.volume * input.frequency.nrows() as f64)
}

/// Channel combination with boundary scattering along the correction axis:
/// Matthiessen adds `2|v|/L`; Caltech rescales through the transmission of a
/// slab of Knudsen number `|v|/(L·Γ)`.
fn effective_gamma(
    gamma: f64,
    velocity_alpha: f64,
    alpha: usize,
    finite_size: &Option<FiniteSize>,
) -> f64 {
    match finite_size {
        Some(fs) if fs.axis == alpha && velocity_alpha != 0.0 => match fs.method {
            FiniteSizeMethod::Matthiessen => gamma + 2.0 * velocity_alpha.abs() / fs.length,
            FiniteSizeMethod::Caltech => {
                let kn = velocity_alpha.abs() / (fs.length * gamma);
                let transmission = (1.0 - kn * (1.0 - (-1.0 / kn).exp())) * kn;
                velocity_alpha.abs() / (fs.length * transmission)
            }
        },
        _ => gamma,
    }
}

fn rta(input: &SolverInput) -> ModeConductivity {
    let modes = flatten(input);
    let scale = prefactor(input);
    let mut per_mode = vec![[[0.0; 3]; 3]; modes.n_phonons];
    for nu in 0..modes.n_phonons {
        if !modes.physical[nu] {
            continue;
        }
        let v = modes.velocity[nu];
        let mut lambda = [0.0; 3];
        for (b, l) in lambda.iter_mut().enumerate() {
            let gamma = effective_gamma(modes.bandwidth[nu], v[b], b, &input.finite_size);
            if gamma > 0.0 {
                *l = v[b] / gamma;
            }
        }
        for a in 0..3 {
            for b in 0..3 {
                per_mode[nu][a][b] = modes.heat_capacity[nu] * v[a] * lambda[b] * scale;
            }
        }
    }
    ModeConductivity {
        per_mode,
        sc_outcome: None,
    }
}

/// Gather the rows and columns of the physical modes out of Ξ.
fn gather_physical(matrix: &Mat<f64>, physical_modes: &[usize]) -> Mat<f64> {
    let p = physical_modes.len();
    Mat::from_fn(p, p, |r, c| matrix[(physical_modes[r], physical_modes[c])])
}

fn inverse(input: &SolverInput) -> Result<ModeConductivity, Error> {
    let matrix = input
        .scattering_matrix
        .ok_or(Error::MissingBandwidths("the inverse solver needs the scattering matrix"))?;
    let modes = flatten(input);
    let scale = prefactor(input);
    let physical_modes: Vec<usize> = (0..modes.n_phonons).filter(|&nu| modes.physical[nu]).collect();
    let p = physical_modes.len();

    // Σ = diag(Γ) − Ξ over the physical modes
    let mut sigma = gather_physical(matrix, &physical_modes);
    for r in 0..p {
        for c in 0..p {
            sigma[(r, c)] = -sigma[(r, c)];
        }
    }
    for (r, &nu) in physical_modes.iter().enumerate() {
        sigma[(r, r)] += modes.bandwidth[nu];
    }

    let negative_diagonal = (0..p).filter(|&r| sigma[(r, r)] < 0.0).count();
    info!("negative on diagonal : {}", negative_diagonal);
    if let Ok(eigenvalues) = sigma.self_adjoint_eigenvalues(Side::Lower) {
        let negative = eigenvalues.iter().filter(|&&e| e < 0.0).count();
        info!("negative eigenvals : {}", negative);
    }

    let mut rhs = Mat::<f64>::zeros(p, 3);
    for (r, &nu) in physical_modes.iter().enumerate() {
        for b in 0..3 {
            rhs[(r, b)] = modes.velocity[nu][b];
        }
    }
    let lambda = sigma.partial_piv_lu().solve(rhs);

    let mut per_mode = vec![[[0.0; 3]; 3]; modes.n_phonons];
    for (r, &nu) in physical_modes.iter().enumerate() {
        for a in 0..3 {
            for b in 0..3 {
                per_mode[nu][a][b] =
                    modes.heat_capacity[nu] * modes.velocity[nu][a] * lambda[(r, b)] * scale;
            }
        }
    }
    Ok(ModeConductivity {
        per_mode,
        sc_outcome: None,
    })
}

/// One Boltzmann update: `Λ ← Λ⁰ + τ⁰·(Ξ·Λ)`, per direction.
pub(crate) fn sc_step(
    xi: &Mat<f64>,
    tau_zero: &[[f64; 3]],
    lambda_zero: &Mat<f64>,
    lambda: &Mat<f64>,
) -> Mat<f64> {
    let delta = xi.as_ref() * lambda.as_ref();
    Mat::from_fn(lambda.nrows(), 3, |r, b| {
        lambda_zero[(r, b)] + tau_zero[r][b] * delta[(r, b)]
    })
}

fn self_consistent(input: &SolverInput) -> Result<ModeConductivity, Error> {
    let matrix = input
        .scattering_matrix
        .ok_or(Error::MissingBandwidths("the self-consistent solver needs the scattering matrix"))?;
    let modes = flatten(input);
    let scale = prefactor(input);
    let physical_modes: Vec<usize> = (0..modes.n_phonons).filter(|&nu| modes.physical[nu]).collect();
    let p = physical_modes.len();
    let xi = gather_physical(matrix, &physical_modes);

    let mut tau_zero = vec![[0.0; 3]; p];
    let mut lambda_zero = Mat::<f64>::zeros(p, 3);
    for (r, &nu) in physical_modes.iter().enumerate() {
        for b in 0..3 {
            let gamma = effective_gamma(
                modes.bandwidth[nu],
                modes.velocity[nu][b],
                b,
                &input.finite_size,
            );
            if gamma > 0.0 {
                tau_zero[r][b] = 1.0 / gamma;
                lambda_zero[(r, b)] = modes.velocity[nu][b] / gamma;
            }
        }
    }

    let mode_tensor = |lambda: &Mat<f64>| {
        let mut per_mode = vec![[[0.0; 3]; 3]; modes.n_phonons];
        for (r, &nu) in physical_modes.iter().enumerate() {
            for a in 0..3 {
                for b in 0..3 {
                    per_mode[nu][a][b] =
                        modes.heat_capacity[nu] * modes.velocity[nu][a] * lambda[(r, b)] * scale;
                }
            }
        }
        per_mode
    };
    let mean_diagonal = |per_mode: &Vec<[[f64; 3]; 3]>| {
        let mut diag = 0.0;
        for tensor in per_mode {
            diag += tensor[0][0] + tensor[1][1] + tensor[2][2];
        }
        diag / 3.0
    };

    let cap = input.n_iterations.unwrap_or(MAX_ITERATIONS_SC);
    let mut lambda_n = lambda_zero.clone();
    let mut avg_conductivity: Option<f64> = None;
    let mut iterations = 0;
    let mut state = SolverState::Init;
    let outcome = loop {
        match state {
            SolverState::Init => state = SolverState::Iterating,
            SolverState::Iterating => {
                let new_avg = mean_diagonal(&mode_tensor(&lambda_n));
                let converged = match (avg_conductivity, input.tolerance) {
                    (Some(prev), Some(tolerance)) => (prev - new_avg).abs() < tolerance,
                    _ => false,
                };
                if converged {
                    state = SolverState::Converged;
                } else if iterations >= cap {
                    state = SolverState::HitCap;
                } else {
                    avg_conductivity = Some(new_avg);
                    lambda_n = sc_step(&xi, &tau_zero, &lambda_zero, &lambda_n);
                    iterations += 1;
                }
            }
            SolverState::Converged => break ScOutcome::Converged { iterations },
            SolverState::HitCap => break ScOutcome::HitCap,
        }
    };
    if outcome == ScOutcome::HitCap {
        warn!("self-consistent conductivity: convergence not reached");
    }

    Ok(ModeConductivity {
        per_mode: mode_tensor(&lambda_n),
        sc_outcome: Some(outcome),
    })
}

fn qhgk(input: &SolverInput) -> Result<ModeConductivity, Error> {
    let flux = input
        .flux_operators
        .ok_or(Error::MissingBandwidths("the QHGK solver needs the flux operators"))?;
    let nk = input.frequency.nrows();
    let m = input.frequency.ncols();
    let scale = prefactor(input);
    let mut per_mode = vec![[[0.0; 3]; 3]; nk * m];

    for ik in 0..nk {
        let s = &flux[ik];
        for mode_m in 0..m {
            if input.frequency[(ik, mode_m)] <= 0.0 {
                continue;
            }
            let omega_m = 2.0 * PI * input.frequency[(ik, mode_m)];
            let gamma_m = full_bandwidth(input, ik, mode_m);
            let mut diffusivity = [[0.0; 3]; 3];
            for mode_n in 0..m {
                if input.frequency[(ik, mode_n)] <= 0.0 {
                    continue;
                }
                let omega_n = 2.0 * PI * input.frequency[(ik, mode_n)];
                let gamma_sum = gamma_m + full_bandwidth(input, ik, mode_n);
                let delta_omega = omega_m - omega_n;
                if input.third_bandwidth.is_some()
                    && delta_omega.abs() >= DELTA_THRESHOLD * gamma_sum
                {
                    continue;
                }
                // normalized Lorentzian of width Γ_m + Γ_n; the diagonal
                // limit is 1/(2Γ)
                let lorentz =
                    gamma_sum / (delta_omega * delta_omega + gamma_sum * gamma_sum);
                if !lorentz.is_finite() {
                    continue;
                }
                let weight = lorentz / (4.0 * omega_m * omega_n);
                for a in 0..3 {
                    for b in 0..3 {
                        let overlap =
                            (s[a][(mode_m, mode_n)] * s[b][(mode_m, mode_n)].conj()).re;
                        diffusivity[a][b] += overlap * weight;
                    }
                }
            }
            let nu = ik * m + mode_m;
            for a in 0..3 {
                for b in 0..3 {
                    per_mode[nu][a][b] =
                        input.heat_capacity[(ik, mode_m)] * diffusivity[a][b] * scale;
                }
            }
        }
    }
    Ok(ModeConductivity {
        per_mode,
        sc_outcome: None,
    })
}

/// Full mode bandwidth Γ in rad/ps; the uniform override is a
/// half-bandwidth in THz and enters doubled.
fn full_bandwidth(input: &SolverInput, ik: usize, mu: usize) -> f64 {
    match input.third_bandwidth {
        Some(bandwidth) => 2.0 * (2.0 * PI * bandwidth),
        None => input.bandwidth[(ik, mu)],
    }
}
