use faer::Mat;
use log::info;

use crate::constants::EV_PER_A2_AMU_TO_RADPS2;
use crate::error::Error;

/// Second-order interatomic force constants.
///
/// Ingested in the interop layout `(Nat, 3, Nrep, Nat, 3)` (row-major,
/// eV/Å²) and stored as one `M×M` block per replica with `M = 3·Nat`, so the
/// dynamical matrix at a wavevector is a phase-weighted sum of blocks.
#[derive(Clone, Debug)]
pub struct SecondOrder {
    n_atoms: usize,
    supercell: [usize; 3],
    blocks: Vec<Mat<f64>>,
}

impl SecondOrder {
    pub fn from_raw(
        n_atoms: usize,
        supercell: [usize; 3],
        data: &[f64],
        is_acoustic_sum: bool,
    ) -> Result<Self, Error> {
        let n_replicas = supercell[0] * supercell[1] * supercell[2];
        if n_atoms == 0 || n_replicas == 0 {
            return Err(Error::InvalidConfiguration(
                "second order needs at least one atom and one replica".into(),
            ));
        }
        let m = 3 * n_atoms;
        let expected = m * n_replicas * m;
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: data.len(),
            });
        }

        // (i, alpha, l, j, beta) row-major -> blocks[l][(3i+alpha, 3j+beta)]
        let mut blocks = vec![Mat::<f64>::zeros(m, m); n_replicas];
        let mut idx = 0;
        for row in 0..m {
            for l in 0..n_replicas {
                for col in 0..m {
                    blocks[l][(row, col)] = data[idx];
                    idx += 1;
                }
            }
        }

        let mut second = SecondOrder {
            n_atoms,
            supercell,
            blocks,
        };
        if is_acoustic_sum {
            second.apply_acoustic_sum_rule();
        }
        Ok(second)
    }

    pub fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    pub fn n_modes(&self) -> usize {
        3 * self.n_atoms
    }

    pub fn n_replicas(&self) -> usize {
        self.blocks.len()
    }

    pub fn supercell(&self) -> [usize; 3] {
        self.supercell
    }

    pub fn block(&self, l: usize) -> &Mat<f64> {
        &self.blocks[l]
    }

    /// Sum over replicas and partner atoms of `Φ[i,α,l,j,β]`; zero for every
    /// `(i, α, β)` once the acoustic sum rule has been applied.
    pub fn translation_residual(&self, i: usize, alpha: usize, beta: usize) -> f64 {
        let row = 3 * i + alpha;
        self.blocks
            .iter()
            .map(|block| {
                (0..self.n_atoms)
                    .map(|j| block[(row, 3 * j + beta)])
                    .sum::<f64>()
            })
            .sum()
    }

    fn apply_acoustic_sum_rule(&mut self) {
        let mut correction = 0.0;
        for i in 0..self.n_atoms {
            for alpha in 0..3 {
                for beta in 0..3 {
                    let total = self.translation_residual(i, alpha, beta);
                    self.blocks[0][(3 * i + alpha, 3 * i + beta)] -= total;
                    correction += total;
                }
            }
        }
        info!("acoustic sum rule residual: {:.6e}", correction);
    }

    /// Mass-weighted, unit-converted dynamical-matrix blocks: entry
    /// `(3i+α, 3j+β)` of block `l` is `Φ[i,α,l,j,β]/√(m_i·m_j)` scaled so
    /// eigenvalues of the assembled matrix come out in (2π·THz)².
    pub fn dynmat(&self, masses: &[f64]) -> Vec<Mat<f64>> {
        let m = self.n_modes();
        let inv_sqrt: Vec<f64> = masses.iter().map(|&x| 1.0 / x.sqrt()).collect();
        self.blocks
            .iter()
            .map(|block| {
                Mat::from_fn(m, m, |row, col| {
                    block[(row, col)]
                        * inv_sqrt[row / 3]
                        * inv_sqrt[col / 3]
                        * EV_PER_A2_AMU_TO_RADPS2
                })
            })
            .collect()
    }
}

/// Third-order interatomic force constants, interop layout
/// `(Nat, 3, Nrep, Nat, 3, Nrep, Nat, 3)` (row-major, eV/Å³), viewed as
/// `(M, Nrep, M, Nrep, M)` without copying.
#[derive(Clone, Debug)]
pub struct ThirdOrder {
    n_atoms: usize,
    n_replicas: usize,
    data: Vec<f64>,
}

impl ThirdOrder {
    pub fn from_raw(n_atoms: usize, supercell: [usize; 3], data: Vec<f64>) -> Result<Self, Error> {
        let n_replicas = supercell[0] * supercell[1] * supercell[2];
        if n_atoms == 0 || n_replicas == 0 {
            return Err(Error::InvalidConfiguration(
                "third order needs at least one atom and one replica".into(),
            ));
        }
        let m = 3 * n_atoms;
        let expected = m * n_replicas * m * n_replicas * m;
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(ThirdOrder {
            n_atoms,
            n_replicas,
            data,
        })
    }

    pub fn n_modes(&self) -> usize {
        3 * self.n_atoms
    }

    pub fn n_replicas(&self) -> usize {
        self.n_replicas
    }

    /// `Φ^(3)/√(m_i·m_j·m_k)`, flat in the `(m1, l1, m2, l2, m3)` layout.
    pub(crate) fn mass_scaled(&self, masses: &[f64]) -> Vec<f64> {
        let m = self.n_modes();
        let nrep = self.n_replicas;
        let inv_sqrt: Vec<f64> = masses.iter().map(|&x| 1.0 / x.sqrt()).collect();
        let mut scaled = self.data.clone();
        let mut idx = 0;
        for m1 in 0..m {
            let w1 = inv_sqrt[m1 / 3];
            for _l1 in 0..nrep {
                for m2 in 0..m {
                    let w12 = w1 * inv_sqrt[m2 / 3];
                    for _l2 in 0..nrep {
                        for m3 in 0..m {
                            scaled[idx] *= w12 * inv_sqrt[m3 / 3];
                            idx += 1;
                        }
                    }
                }
            }
        }
        scaled
    }
}
