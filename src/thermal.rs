use std::f64::consts::PI;

use faer::Mat;
use serde::{Deserialize, Serialize};

use crate::constants::{KELVIN_TO_JOULE, KELVIN_TO_THZ};

/// Mode occupations on the grid: Bose–Einstein, or equipartition when the
/// classical flag is set. Zero wherever the frequency vanishes.
pub fn occupations(frequency: &Mat<f64>, temperature: f64, is_classic: bool) -> Mat<f64> {
    let t_thz = temperature * KELVIN_TO_THZ;
    Mat::from_fn(frequency.nrows(), frequency.ncols(), |i, j| {
        let nu = frequency[(i, j)];
        if nu == 0.0 {
            0.0
        } else if is_classic {
            t_thz / nu
        } else {
            1.0 / (nu / t_thz).exp_m1()
        }
    })
}

/// Per-mode heat capacity in J/K: `k_B·(ν/T)²·n(n+1)` quantum, `k_B`
/// classical, zero on unphysical modes.
pub fn heat_capacity(
    frequency: &Mat<f64>,
    occupations: &Mat<f64>,
    temperature: f64,
    is_classic: bool,
) -> Mat<f64> {
    let t_thz = temperature * KELVIN_TO_THZ;
    Mat::from_fn(frequency.nrows(), frequency.ncols(), |i, j| {
        let nu = frequency[(i, j)];
        if nu <= 0.0 {
            0.0
        } else if is_classic {
            KELVIN_TO_JOULE
        } else {
            let n = occupations[(i, j)];
            KELVIN_TO_JOULE * (nu / t_thz).powi(2) * n * (n + 1.0)
        }
    })
}

/// Adaptive broadening from the group-velocity difference of the two
/// scattering partners: `σ = (1/2π)·√(Σ_α (Δv·b_α/K_α)²/6)` with `b_α` the
/// reciprocal-lattice vectors. `gvecs_over_k[α]` is `b_α/K_α`.
#[inline]
pub fn base_sigma(delta_velocity: [f64; 3], gvecs_over_k: &[[f64; 3]; 3]) -> f64 {
    let mut sum = 0.0;
    for g in gvecs_over_k {
        let d = delta_velocity[0] * g[0] + delta_velocity[1] * g[1] + delta_velocity[2] * g[2];
        sum += d * d;
    }
    (sum / 6.0).sqrt() / (2.0 * PI)
}

/// `b_α/K_α` columns for [`base_sigma`]: `b_α = 2π·cell_inv[:,α]`.
pub fn gvecs_over_k(cell_inv: faer::MatRef<f64>, kpts: [usize; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0f64; 3]; 3];
    for (alpha, g) in out.iter_mut().enumerate() {
        for c in 0..3 {
            g[c] = 2.0 * PI * cell_inv[(c, alpha)] / kpts[alpha] as f64;
        }
    }
    out
}

/// Line shape used for the energy-conserving delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadeningShape {
    Gauss,
    Triangle,
    Lorentz,
}

impl Default for BroadeningShape {
    fn default() -> Self {
        BroadeningShape::Gauss
    }
}

impl BroadeningShape {
    /// Kernel value at distance `delta` from resonance, width `sigma`.
    pub fn evaluate(self, delta: f64, sigma: f64) -> f64 {
        match self {
            BroadeningShape::Gauss => {
                (-delta * delta / (2.0 * sigma * sigma)).exp() / (sigma * (2.0 * PI).sqrt())
            }
            BroadeningShape::Triangle => {
                let d = delta.abs();
                if d < sigma {
                    (1.0 - d / sigma) / sigma
                } else {
                    0.0
                }
            }
            BroadeningShape::Lorentz => sigma / PI / (delta * delta + sigma * sigma),
        }
    }

    /// Screening edge: candidates with `|Δν|` beyond this are dropped. The
    /// triangular kernel has compact support `σ`; the others keep the
    /// `threshold·σ` window.
    pub fn support(self, sigma: f64, threshold: f64) -> f64 {
        match self {
            BroadeningShape::Triangle => sigma,
            _ => threshold * sigma,
        }
    }
}
