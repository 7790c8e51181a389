use std::f64::consts::PI;

use faer::{ColRef, Mat};
use indicatif::ParallelProgressIterator;
use log::info;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::constants::{DELTA_THRESHOLD, GAMMA_TO_RADPS};
use crate::forceconstants::ThirdOrder;
use crate::grid::SamplingGrid;
use crate::harmonic::HarmonicResult;
use crate::thermal::{base_sigma, BroadeningShape};
use crate::C64;

/// Index of the annihilation channel (`ω + ω' − ω''`, `k'' = k + k'`).
pub const PLUS: usize = 0;
/// Index of the creation channel (`ω − ω' − ω''`, `k'' = k − k'`).
pub const MINUS: usize = 1;

/// Per-channel three-phonon output on the full grid.
///
/// Bandwidths are angular (rad/ps); the solvers consume the channel sum.
/// `matrix` is the off-diagonal scattering operator Ξ over flattened mode
/// indices `ν = ik·M + μ`, materialized only for the inverse and
/// self-consistent closures.
pub struct ScatteringResult {
    pub bandwidth: [Mat<f64>; 2],
    pub phase_space: [Mat<f64>; 2],
    pub matrix: Option<Mat<f64>>,
}

impl ScatteringResult {
    pub fn total_bandwidth(&self) -> Mat<f64> {
        self.bandwidth[PLUS].as_ref() + self.bandwidth[MINUS].as_ref()
    }

    pub fn total_phase_space(&self) -> Mat<f64> {
        self.phase_space[PLUS].as_ref() + self.phase_space[MINUS].as_ref()
    }
}

/// Read-only inputs shared by the scattering workers.
pub struct ScatteringContext<'a> {
    pub grid: &'a SamplingGrid,
    pub harmonic: &'a HarmonicResult,
    pub occupations: &'a Mat<f64>,
    /// Phase table `(Nk, Nrep)`; conjugations are applied per channel.
    pub chi: &'a Mat<C64>,
    /// Wavevector -> irreducible representative.
    pub mapping: &'a [usize],
    pub sigma_in: Option<f64>,
    pub broadening_shape: BroadeningShape,
    /// `b_α/K_α` columns for the adaptive broadening.
    pub gvecs_over_k: [[f64; 3]; 3],
}

/// Momentum-conserving partner of `(k, k')`: `k + k'` in the annihilation
/// channel, `k − k'` in the creation channel, wrapped onto the grid.
pub fn third_partner(grid: &SamplingGrid, ik: usize, ikp: usize, is_plus: bool) -> usize {
    let a = grid.unravel(ik);
    let b = grid.unravel(ikp);
    let sign: i64 = if is_plus { 1 } else { -1 };
    grid.ravel([
        a[0] as i64 + sign * b[0] as i64,
        a[1] as i64 + sign * b[1] as i64,
        a[2] as i64 + sign * b[2] as i64,
    ])
}

struct KContribution {
    ik: usize,
    gamma: [Vec<f64>; 2],
    phase_space: [Vec<f64>; 2],
    rows: Option<Mat<f64>>,
}

/// Enumerate momentum-conserving triplets, project the mass-scaled third
/// order through them and accumulate bandwidths, phase space and (optionally)
/// the scattering matrix.
///
/// The sweep runs over the irreducible wedge and unfolds through `mapping`;
/// when the matrix is requested the whole grid is enumerated instead and the
/// mapping is ignored.
pub fn project_bandwidths(
    third: &ThirdOrder,
    masses: &[f64],
    ctx: &ScatteringContext,
    store_matrix: bool,
) -> ScatteringResult {
    let nk = ctx.grid.n_points();
    let m = third.n_modes();
    let nrep = third.n_replicas();
    let scaled = third.mass_scaled(masses);

    let klist: Vec<usize> = if store_matrix {
        (0..nk).collect()
    } else {
        let mut list = ctx.mapping.to_vec();
        list.sort_unstable();
        list.dedup();
        list
    };
    info!("lifetime calculation, n_irreducible_q_points = {}", klist.len());

    let n_sweep = klist.len() as u64;
    let contributions: Vec<KContribution> = klist
        .into_par_iter()
        .progress_count(n_sweep)
        .map(|ik| bandwidths_at_k(ik, &scaled, nrep, m, ctx, store_matrix))
        .collect();

    let mut bandwidth = [Mat::<f64>::zeros(nk, m), Mat::<f64>::zeros(nk, m)];
    let mut phase_space = [Mat::<f64>::zeros(nk, m), Mat::<f64>::zeros(nk, m)];
    let mut matrix = if store_matrix {
        Some(Mat::<f64>::zeros(nk * m, nk * m))
    } else {
        None
    };

    let gamma_scale = GAMMA_TO_RADPS / nk as f64;
    let ps_scale = 1.0 / (nk as f64 * (2.0 * PI).powi(3));
    for contribution in contributions {
        let ik = contribution.ik;
        for channel in [PLUS, MINUS] {
            for mu in 0..m {
                bandwidth[channel][(ik, mu)] = contribution.gamma[channel][mu] * gamma_scale;
                phase_space[channel][(ik, mu)] =
                    contribution.phase_space[channel][mu] * ps_scale;
            }
        }
        if let (Some(matrix), Some(rows)) = (matrix.as_mut(), contribution.rows.as_ref()) {
            for mu in 0..m {
                for col in 0..nk * m {
                    matrix[(ik * m + mu, col)] = rows[(mu, col)] * gamma_scale;
                }
            }
        }
    }

    if !store_matrix {
        for ik in 0..nk {
            let src = ctx.mapping[ik];
            if src == ik {
                continue;
            }
            for channel in [PLUS, MINUS] {
                for mu in 0..m {
                    bandwidth[channel][(ik, mu)] = bandwidth[channel][(src, mu)];
                    phase_space[channel][(ik, mu)] = phase_space[channel][(src, mu)];
                }
            }
        }
    }

    ScatteringResult {
        bandwidth,
        phase_space,
        matrix,
    }
}

fn bandwidths_at_k(
    ik: usize,
    scaled: &[f64],
    nrep: usize,
    m: usize,
    ctx: &ScatteringContext,
    store_matrix: bool,
) -> KContribution {
    let nk = ctx.grid.n_points();
    let frequency = &ctx.harmonic.frequency;
    let mut gamma = [vec![0.0; m], vec![0.0; m]];
    let mut phase_space = [vec![0.0; m], vec![0.0; m]];
    let mut rows = if store_matrix {
        Some(Mat::<f64>::zeros(m, nk * m))
    } else {
        None
    };
    let mut survivors: Vec<(usize, usize, f64, f64)> = Vec::new();

    for mu in 0..m {
        let nu_mu = frequency[(ik, mu)];
        if nu_mu <= 0.0 {
            continue;
        }
        let projected = project_mode(scaled, ctx.harmonic.eigenvectors[ik].col(mu), nrep, m);

        for (channel, is_plus) in [(PLUS, true), (MINUS, false)] {
            for ikp in 0..nk {
                let ikpp = third_partner(ctx.grid, ik, ikp, is_plus);
                let velocity_p = &ctx.harmonic.velocity[ikp];
                let velocity_pp = &ctx.harmonic.velocity[ikpp];

                survivors.clear();
                for mup in 0..m {
                    let nu_p = frequency[(ikp, mup)];
                    if nu_p <= 0.0 {
                        continue;
                    }
                    for mupp in 0..m {
                        let nu_pp = frequency[(ikpp, mupp)];
                        if nu_pp <= 0.0 {
                            continue;
                        }
                        let delta = if is_plus {
                            nu_mu + nu_p - nu_pp
                        } else {
                            nu_mu - nu_p - nu_pp
                        }
                        .abs();
                        let sigma = match ctx.sigma_in {
                            Some(sigma) => sigma,
                            None => base_sigma(
                                [
                                    velocity_p[(mup, 0)] - velocity_pp[(mupp, 0)],
                                    velocity_p[(mup, 1)] - velocity_pp[(mupp, 1)],
                                    velocity_p[(mup, 2)] - velocity_pp[(mupp, 2)],
                                ],
                                &ctx.gvecs_over_k,
                            ),
                        };
                        if sigma > 0.0
                            && delta < ctx.broadening_shape.support(sigma, DELTA_THRESHOLD)
                        {
                            survivors.push((mup, mupp, delta, sigma));
                        }
                    }
                }
                if survivors.is_empty() {
                    continue;
                }

                let potential = project_pair(&projected, ctx, ikp, ikpp, is_plus, nrep, m);
                for &(mup, mupp, delta, sigma) in &survivors {
                    let g = ctx.broadening_shape.evaluate(delta, sigma);
                    let n_p = ctx.occupations[(ikp, mup)];
                    let n_pp = ctx.occupations[(ikpp, mupp)];
                    let density = if is_plus {
                        n_p - n_pp
                    } else {
                        0.5 * (1.0 + n_p + n_pp)
                    };
                    let dirac = density * g / (frequency[(ikp, mup)] * frequency[(ikpp, mupp)]);
                    let gamma_t = potential[(mup, mupp)].norm_sqr() * dirac;
                    gamma[channel][mu] += gamma_t;
                    phase_space[channel][mu] += dirac;
                    if let Some(rows) = rows.as_mut() {
                        if is_plus {
                            rows[(mu, ikp * m + mup)] -= gamma_t;
                            rows[(mu, ikpp * m + mupp)] += gamma_t;
                        } else {
                            rows[(mu, ikp * m + mup)] += gamma_t;
                            rows[(mu, ikpp * m + mupp)] += gamma_t;
                        }
                    }
                }
            }
        }

        for channel in [PLUS, MINUS] {
            gamma[channel][mu] /= nu_mu;
            phase_space[channel][mu] /= nu_mu;
        }
        if let Some(rows) = rows.as_mut() {
            for col in 0..nk * m {
                rows[(mu, col)] /= nu_mu;
            }
        }
    }

    KContribution {
        ik,
        gamma,
        phase_space,
        rows,
    }
}

/// Contract the mode index of the mass-scaled third order with `e_μ(k)`:
/// output is `(Nrep·M)×(Nrep·M)` over `(l', μ'; l'', μ'')`.
fn project_mode(scaled: &[f64], mode: ColRef<C64>, nrep: usize, m: usize) -> Mat<C64> {
    let dim = nrep * m;
    let mut projected = Mat::<C64>::zeros(dim, dim);
    let stride = dim * dim;
    for m1 in 0..m {
        let weight = mode[m1];
        let mut idx = m1 * stride;
        for l1 in 0..nrep {
            for m2 in 0..m {
                let row = l1 * m + m2;
                for l2 in 0..nrep {
                    for m3 in 0..m {
                        projected[(row, l2 * m + m3)] += weight * scaled[idx];
                        idx += 1;
                    }
                }
            }
        }
    }
    projected
}

/// Collapse the two replica indices with the partner phases and finish the
/// projection with the partner eigenvector matrices; entry `(μ', μ'')` is
/// the matrix element of the surviving triplet.
///
/// The annihilation channel uses `e(k'), χ(k')`; the creation channel
/// conjugates both. The third leg is always conjugated.
fn project_pair(
    projected: &Mat<C64>,
    ctx: &ScatteringContext,
    ikp: usize,
    ikpp: usize,
    is_plus: bool,
    nrep: usize,
    m: usize,
) -> Mat<C64> {
    let mut collapsed = Mat::<C64>::zeros(m, m);
    for l1 in 0..nrep {
        let chi_p = if is_plus {
            ctx.chi[(ikp, l1)]
        } else {
            ctx.chi[(ikp, l1)].conj()
        };
        for l2 in 0..nrep {
            let weight = chi_p * ctx.chi[(ikpp, l2)].conj();
            let block = projected.submatrix(l1 * m, l2 * m, m, m);
            for r in 0..m {
                for c in 0..m {
                    collapsed[(r, c)] += weight * block[(r, c)];
                }
            }
        }
    }
    let vectors_pp = ctx.harmonic.eigenvectors[ikpp].conjugate();
    if is_plus {
        ctx.harmonic.eigenvectors[ikp].transpose() * collapsed * vectors_pp
    } else {
        ctx.harmonic.eigenvectors[ikp].adjoint() * collapsed * vectors_pp
    }
}
