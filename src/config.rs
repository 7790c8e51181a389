use serde::{Deserialize, Serialize};

use crate::conductivity::FiniteSizeMethod;
use crate::error::Error;
use crate::thermal::BroadeningShape;

/// All knobs of the engine in one place. Constructed once and handed to
/// [`crate::phonons::Phonons`]; recompute on change is never automatic,
/// so build a new container instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Replication factors of the reference cell.
    pub supercell: [usize; 3],
    /// Sampling-grid dimensions; `(1, 1, 1)` for amorphous systems.
    pub kpts: [usize; 3],
    /// Temperature in kelvin.
    pub temperature: f64,
    /// Equipartition occupations instead of Bose–Einstein.
    pub is_classic: bool,
    /// Scalar broadening override in THz; per-pair adaptive σ when unset.
    pub sigma_in: Option<f64>,
    pub broadening_shape: BroadeningShape,
    /// Apply the acoustic sum rule when loading the second order.
    pub is_acoustic_sum: bool,
    /// Å cutoff enabling the short-range (folded) dynamical matrix.
    pub distance_threshold: Option<f64>,
    /// Uniform half-bandwidth override in THz for the QHGK solver; enables
    /// its sparse pair enumeration.
    pub third_bandwidth: Option<f64>,
    pub finite_size_method: FiniteSizeMethod,
    /// Convergence tolerance of the self-consistent solver on the mean
    /// diagonal conductivity; iterates to the cap when unset.
    pub tolerance: Option<f64>,
    /// Iteration cap override for the self-consistent solver.
    pub n_iterations: Option<usize>,
    /// Sample length in Å enabling finite-size corrections.
    pub length: Option<f64>,
    /// Transport direction the finite-size correction acts on.
    pub axis: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            supercell: [1, 1, 1],
            kpts: [1, 1, 1],
            temperature: 300.0,
            is_classic: false,
            sigma_in: None,
            broadening_shape: BroadeningShape::default(),
            is_acoustic_sum: false,
            distance_threshold: None,
            third_bandwidth: None,
            finite_size_method: FiniteSizeMethod::default(),
            tolerance: None,
            n_iterations: None,
            length: None,
            axis: 0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.temperature <= 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if self.supercell.iter().any(|&s| s == 0) {
            return Err(Error::InvalidConfiguration(format!(
                "supercell {:?} has an empty dimension",
                self.supercell
            )));
        }
        if self.kpts.iter().any(|&k| k == 0) {
            return Err(Error::InvalidConfiguration(format!(
                "kpts {:?} has an empty dimension",
                self.kpts
            )));
        }
        if self.axis > 2 {
            return Err(Error::InvalidConfiguration(format!(
                "axis must be 0, 1 or 2, got {}",
                self.axis
            )));
        }
        for (name, value) in [
            ("sigma_in", self.sigma_in),
            ("third_bandwidth", self.third_bandwidth),
            ("distance_threshold", self.distance_threshold),
            ("length", self.length),
        ] {
            if let Some(v) = value {
                if v <= 0.0 {
                    return Err(Error::InvalidConfiguration(format!(
                        "{} must be positive, got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }
}
