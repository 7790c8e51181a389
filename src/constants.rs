/// Physical constants and unit-conversion factors used in the routines.
///
/// The working unit system is eV / Å / amu on the input side; dynamical
/// matrices come out in (rad/ps)², frequencies in THz (linear) and
/// three-phonon bandwidths in rad/ps.

// CODATA 2018
pub static HBAR: f64 = 1.054571817e-34; // J s
pub static K_B: f64 = 1.380649e-23; // J/K
pub static ELECTRON_CHARGE: f64 = 1.602176634e-19; // C, also J per eV
pub static AVOGADRO: f64 = 6.02214076e23; // 1/mol

/// eV/Å²/amu -> (rad/ps)², so that sqrt(eigenvalue)/(2π) is in THz.
/// Equal to 0.1·e·N_A (`mol / (10 J)` in ase units).
pub static EV_PER_A2_AMU_TO_RADPS2: f64 = 9648.53321233;

/// k_B/(2πħ)·1e-12: temperature in kelvin -> thermal frequency in THz.
pub static KELVIN_TO_THZ: f64 = 0.02083661912;

/// k_B in J/K; per-mode heat capacities are returned in J/K.
pub static KELVIN_TO_JOULE: f64 = 1.380649e-23;

/// Converts the accumulated three-phonon sum
/// Σ |V|²·g·occupation/(ν·ν'·ν''), with V in eV·Å⁻³·amu^(-3/2), g in 1/THz
/// and ν in THz, into an angular bandwidth in rad/ps:
/// (πħ/4)·U²·1e-48/(2π)⁴·1e12 with U = e·1e30/amu^(3/2).
pub static GAMMA_TO_RADPS: f64 = 2.9793659e5;

/// Screening threshold for the delta function: triplets with
/// |Δν| ≥ DELTA_THRESHOLD·σ are dropped before the matrix element is built.
pub static DELTA_THRESHOLD: f64 = 2.0;
