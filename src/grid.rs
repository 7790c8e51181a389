use faer::MatRef;

use crate::error::Error;

/// Regular sampling grid over the Brillouin zone.
///
/// Flat indices map to multi-indices in Fortran order: the first grid
/// dimension runs fastest. Reduced wavevectors are `multi_index / kpts`,
/// component-wise, so index 0 is always Γ.
#[derive(Clone, Debug)]
pub struct SamplingGrid {
    kpts: [usize; 3],
}

impl SamplingGrid {
    pub fn new(kpts: [usize; 3]) -> Result<Self, Error> {
        if kpts.iter().any(|&k| k == 0) {
            return Err(Error::InvalidConfiguration(format!(
                "sampling grid {:?} has an empty dimension",
                kpts
            )));
        }
        Ok(SamplingGrid { kpts })
    }

    pub fn kpts(&self) -> [usize; 3] {
        self.kpts
    }

    pub fn n_points(&self) -> usize {
        self.kpts[0] * self.kpts[1] * self.kpts[2]
    }

    /// Flat index -> multi-index, Fortran order.
    #[inline]
    pub fn unravel(&self, ik: usize) -> [usize; 3] {
        let [k1, k2, _] = self.kpts;
        [ik % k1, (ik / k1) % k2, ik / (k1 * k2)]
    }

    /// Multi-index -> flat index; components are wrapped into `[0, Ki)`
    /// first, so negative and out-of-range entries are valid input.
    #[inline]
    pub fn ravel(&self, multi_index: [i64; 3]) -> usize {
        let mut wrapped = [0usize; 3];
        for (w, (&i, &k)) in wrapped.iter_mut().zip(multi_index.iter().zip(self.kpts.iter())) {
            let k = k as i64;
            *w = (((i % k) + k) % k) as usize;
        }
        wrapped[0] + self.kpts[0] * (wrapped[1] + self.kpts[1] * wrapped[2])
    }

    /// Reduced wavevector of the grid point `ik`, components in `[0, 1)`.
    pub fn q_vector(&self, ik: usize) -> [f64; 3] {
        let idx = self.unravel(ik);
        [
            idx[0] as f64 / self.kpts[0] as f64,
            idx[1] as f64 / self.kpts[1] as f64,
            idx[2] as f64 / self.kpts[2] as f64,
        ]
    }
}

/// Wrap a Cartesian displacement into the minimum image of the given cell.
///
/// The displacement is taken to crystallographic coordinates through
/// `cell_inv`, the rounded integer part is removed, and the remainder is
/// taken back to Cartesian coordinates. Rows of `cell` are lattice vectors.
pub fn wrap_coordinates(delta: [f64; 3], cell: MatRef<f64>, cell_inv: MatRef<f64>) -> [f64; 3] {
    let mut frac = [0.0f64; 3];
    for (j, f) in frac.iter_mut().enumerate() {
        *f = (0..3).map(|c| delta[c] * cell_inv[(c, j)]).sum::<f64>();
        *f -= f.round();
    }
    let mut out = [0.0f64; 3];
    for (c, o) in out.iter_mut().enumerate() {
        *o = (0..3).map(|j| frac[j] * cell[(j, c)]).sum::<f64>();
    }
    out
}
