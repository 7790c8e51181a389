use faer::{Mat, MatRef};

use crate::error::Error;
use crate::grid::wrap_coordinates;

/// Reference unit cell: lattice vectors (rows of `cell`, Å), Cartesian
/// positions (Å), masses (amu) and chemical symbols. Periodic boundaries are
/// always assumed.
#[derive(Clone, Debug)]
pub struct AtomicConfiguration {
    pub cell: Mat<f64>,
    pub positions: Mat<f64>,
    pub masses: Vec<f64>,
    pub symbols: Vec<String>,
}

impl AtomicConfiguration {
    pub fn new(
        cell: Mat<f64>,
        positions: Mat<f64>,
        masses: Vec<f64>,
        symbols: Vec<String>,
    ) -> Result<Self, Error> {
        if cell.nrows() != 3 || cell.ncols() != 3 {
            return Err(Error::InvalidConfiguration(
                "cell must be a 3x3 matrix of lattice vectors".into(),
            ));
        }
        let n_atoms = positions.nrows();
        if n_atoms == 0 || positions.ncols() != 3 {
            return Err(Error::InvalidConfiguration(
                "positions must be a non-empty Nx3 matrix".into(),
            ));
        }
        if masses.len() != n_atoms || symbols.len() != n_atoms {
            return Err(Error::InvalidConfiguration(format!(
                "got {} positions, {} masses, {} symbols",
                n_atoms,
                masses.len(),
                symbols.len()
            )));
        }
        if masses.iter().any(|&m| m <= 0.0) {
            return Err(Error::InvalidConfiguration("masses must be positive".into()));
        }
        if det3(cell.as_ref()).abs() < 1e-12 {
            return Err(Error::InvalidConfiguration("cell volume is zero".into()));
        }
        Ok(AtomicConfiguration {
            cell,
            positions,
            masses,
            symbols,
        })
    }

    pub fn n_atoms(&self) -> usize {
        self.positions.nrows()
    }

    pub fn n_modes(&self) -> usize {
        3 * self.n_atoms()
    }

    /// Unit-cell volume in Å³.
    pub fn volume(&self) -> f64 {
        det3(self.cell.as_ref()).abs()
    }

    pub fn cell_inv(&self) -> Mat<f64> {
        inv3(self.cell.as_ref())
    }
}

/// Periodic replication of the unit cell over a supercell.
///
/// Replica translations are stored in Fortran order over `(S1, S2, S3)` with
/// `R_0 = 0`, matching the sampling grid's unravel convention; the wrapped
/// copies are the replicated-cell minimum images used by phase sums and the
/// dynamical-matrix derivative.
#[derive(Clone, Debug)]
pub struct ReplicatedConfiguration {
    pub supercell: [usize; 3],
    pub n_replicas: usize,
    /// `R_l = n1·a1 + n2·a2 + n3·a3`, `0 <= ni < Si`, Cartesian Å.
    pub replica_vectors: Mat<f64>,
    /// Minimum images of `replica_vectors` in the replicated cell.
    pub wrapped_replica_vectors: Mat<f64>,
    /// Replicated positions, atom index running fastest within each replica.
    pub positions: Mat<f64>,
    pub cell: Mat<f64>,
}

impl ReplicatedConfiguration {
    pub fn new(configuration: &AtomicConfiguration, supercell: [usize; 3]) -> Result<Self, Error> {
        if supercell.iter().any(|&s| s == 0) {
            return Err(Error::InvalidConfiguration(format!(
                "supercell {:?} has an empty dimension",
                supercell
            )));
        }
        let n_replicas = supercell[0] * supercell[1] * supercell[2];
        let n_atoms = configuration.n_atoms();
        let unit_cell = &configuration.cell;

        let mut replica_vectors = Mat::<f64>::zeros(n_replicas, 3);
        for l in 0..n_replicas {
            let n1 = l % supercell[0];
            let n2 = (l / supercell[0]) % supercell[1];
            let n3 = l / (supercell[0] * supercell[1]);
            for c in 0..3 {
                replica_vectors[(l, c)] = n1 as f64 * unit_cell[(0, c)]
                    + n2 as f64 * unit_cell[(1, c)]
                    + n3 as f64 * unit_cell[(2, c)];
            }
        }

        let cell = Mat::<f64>::from_fn(3, 3, |i, j| supercell[i] as f64 * unit_cell[(i, j)]);
        let cell_inv = inv3(cell.as_ref());
        let mut wrapped_replica_vectors = Mat::<f64>::zeros(n_replicas, 3);
        for l in 0..n_replicas {
            let r = [
                replica_vectors[(l, 0)],
                replica_vectors[(l, 1)],
                replica_vectors[(l, 2)],
            ];
            let w = wrap_coordinates(r, cell.as_ref(), cell_inv.as_ref());
            for c in 0..3 {
                wrapped_replica_vectors[(l, c)] = w[c];
            }
        }

        let mut positions = Mat::<f64>::zeros(n_replicas * n_atoms, 3);
        for l in 0..n_replicas {
            for i in 0..n_atoms {
                for c in 0..3 {
                    positions[(l * n_atoms + i, c)] =
                        configuration.positions[(i, c)] + replica_vectors[(l, c)];
                }
            }
        }

        Ok(ReplicatedConfiguration {
            supercell,
            n_replicas,
            replica_vectors,
            wrapped_replica_vectors,
            positions,
            cell,
        })
    }

    pub fn cell_inv(&self) -> Mat<f64> {
        inv3(self.cell.as_ref())
    }
}

pub(crate) fn det3(m: MatRef<f64>) -> f64 {
    m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
        - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
        + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
}

pub(crate) fn inv3(m: MatRef<f64>) -> Mat<f64> {
    let det = det3(m);
    let mut inv = Mat::<f64>::zeros(3, 3);
    for i in 0..3 {
        let (r1, r2) = ((i + 1) % 3, (i + 2) % 3);
        for j in 0..3 {
            let (c1, c2) = ((j + 1) % 3, (j + 2) % 3);
            // transposed cofactor
            inv[(j, i)] = (m[(r1, c1)] * m[(r2, c2)] - m[(r1, c2)] * m[(r2, c1)]) / det;
        }
    }
    inv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic(a: f64) -> Mat<f64> {
        Mat::<f64>::from_fn(3, 3, |i, j| if i == j { a } else { 0.0 })
    }

    fn single_atom(a: f64) -> AtomicConfiguration {
        AtomicConfiguration::new(
            cubic(a),
            Mat::<f64>::zeros(1, 3),
            vec![28.0],
            vec!["Si".into()],
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_masses() {
        let result = AtomicConfiguration::new(
            cubic(5.0),
            Mat::<f64>::zeros(1, 3),
            vec![-1.0],
            vec!["X".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_singular_cell() {
        let result = AtomicConfiguration::new(
            Mat::<f64>::zeros(3, 3),
            Mat::<f64>::zeros(1, 3),
            vec![1.0],
            vec!["X".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn inv3_inverts() {
        let mut m = cubic(2.0);
        m[(0, 1)] = 0.5;
        m[(2, 0)] = -0.3;
        let inv = inv3(m.as_ref());
        let prod = m.as_ref() * inv.as_ref();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((prod[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn replicas_follow_grid_order() {
        let config = single_atom(4.0);
        let replicated = ReplicatedConfiguration::new(&config, [3, 2, 1]).unwrap();
        assert_eq!(replicated.n_replicas, 6);
        // R_0 = 0
        for c in 0..3 {
            assert_eq!(replicated.replica_vectors[(0, c)], 0.0);
        }
        // l = 1 advances the first supercell direction
        assert!((replicated.replica_vectors[(1, 0)] - 4.0).abs() < 1e-12);
        // l = 3 advances the second
        assert!((replicated.replica_vectors[(3, 1)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn wrapped_replicas_are_minimum_images() {
        let config = single_atom(4.0);
        let replicated = ReplicatedConfiguration::new(&config, [3, 1, 1]).unwrap();
        // R_2 = 8 x̂ wraps to -4 x̂ in the 12 Å replicated cell
        assert!((replicated.wrapped_replica_vectors[(2, 0)] - (-4.0)).abs() < 1e-12);
    }
}
