//! Synthetic lattices shared by the unit tests.

use faer::Mat;

use crate::forceconstants::{SecondOrder, ThirdOrder};
use crate::structure::AtomicConfiguration;

fn cubic_cell(a: f64) -> Mat<f64> {
    Mat::<f64>::from_fn(3, 3, |i, j| if i == j { a } else { 0.0 })
}

/// One atom, one replica, on-site spring `phi` along each axis.
pub(crate) fn single_atom_cube(phi: f64, mass: f64) -> (AtomicConfiguration, SecondOrder) {
    let configuration = AtomicConfiguration::new(
        cubic_cell(5.0),
        Mat::<f64>::zeros(1, 3),
        vec![mass],
        vec!["X".into()],
    )
    .unwrap();
    let mut data = vec![0.0; 9];
    for alpha in 0..3 {
        data[alpha * 3 + alpha] = phi;
    }
    let second = SecondOrder::from_raw(1, [1, 1, 1], &data, false).unwrap();
    (configuration, second)
}

/// Monatomic chain along x: nearest-neighbour springs `k_spring`, transverse
/// branches left flat. Row sums vanish by construction, so Γ carries exact
/// acoustic zeros without the sum-rule correction.
pub(crate) fn monatomic_chain(
    k_spring: f64,
    mass: f64,
    n_cells: usize,
) -> (AtomicConfiguration, SecondOrder) {
    let configuration = AtomicConfiguration::new(
        cubic_cell(3.0),
        Mat::<f64>::zeros(1, 3),
        vec![mass],
        vec!["X".into()],
    )
    .unwrap();
    // (alpha, l, beta) row-major
    let mut data = vec![0.0; 3 * n_cells * 3];
    let entry = |alpha: usize, l: usize, beta: usize| (alpha * n_cells + l) * 3 + beta;
    data[entry(0, 0, 0)] = 2.0 * k_spring;
    data[entry(0, 1, 0)] = -k_spring;
    data[entry(0, n_cells - 1, 0)] = -k_spring;
    let second = SecondOrder::from_raw(1, [n_cells, 1, 1], &data, false).unwrap();
    (configuration, second)
}

/// Diatomic chain along x replicated twice, springs isotropic in all three
/// directions: three degenerate acoustic/optical branch pairs, acoustic
/// zeros exact at Γ. The third order is a deterministic dense filler.
pub(crate) fn diatomic_chain() -> (AtomicConfiguration, SecondOrder, ThirdOrder) {
    let a = 4.0;
    let mut positions = Mat::<f64>::zeros(2, 3);
    positions[(1, 0)] = a / 2.0;
    let configuration = AtomicConfiguration::new(
        cubic_cell(a),
        positions,
        vec![12.0, 16.0],
        vec!["C".into(), "O".into()],
    )
    .unwrap();

    let (k1, k2) = (1.4, 0.9);
    let n_replicas = 2;
    let m = 6;
    let mut data = vec![0.0; m * n_replicas * m];
    // (3i+alpha, l, 3j+beta) row-major
    let mut add = |i: usize, l: usize, j: usize, value: f64| {
        for alpha in 0..3 {
            let idx = ((3 * i + alpha) * n_replicas + l) * m + 3 * j + alpha;
            data[idx] += value;
        }
    };
    // atom 0: partner atom 1 in cell (k1) and in the image on the left (k2)
    add(0, 0, 1, -k1);
    add(0, 1, 1, -k2);
    add(0, 0, 0, k1 + k2);
    // atom 1: partner atom 0 in cell (k1) and in the image on the right (k2)
    add(1, 0, 0, -k1);
    add(1, 1, 0, -k2);
    add(1, 0, 1, k1 + k2);
    let second = SecondOrder::from_raw(2, [2, 1, 1], &data, false).unwrap();

    let len = m * n_replicas * m * n_replicas * m;
    let third_data: Vec<f64> = (0..len)
        .map(|idx| ((idx * 37 % 17) as f64 - 8.0) * 0.02)
        .collect();
    let third = ThirdOrder::from_raw(2, [2, 1, 1], third_data).unwrap();

    (configuration, second, third)
}
