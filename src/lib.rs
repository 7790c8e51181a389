//! Thermal-transport observables of crystalline and amorphous solids from
//! second- and third-order interatomic force constants.
//!
//! The crate is a pure numerical engine: force-constant parsing, symmetry
//! search and on-disk caching live with the caller. Feed an
//! [`structure::AtomicConfiguration`], the force-constant tensors and a
//! [`config::Config`] into [`phonons::Phonons`], then ask it for harmonic
//! observables, three-phonon bandwidths and a conductivity tensor under one
//! of the four closures in [`conductivity::Method`].

use num_complex::Complex;

pub mod conductivity;
pub mod config;
pub mod constants;
pub mod error;
pub mod forceconstants;
pub mod grid;
pub mod harmonic;
pub mod phonons;
pub mod scattering;
pub mod structure;
pub mod thermal;

#[cfg(test)]
pub(crate) mod testing;

// convenience type for complex arithmetic
pub type C64 = Complex<f64>;

pub use conductivity::{Method, ModeConductivity, ScOutcome};
pub use config::Config;
pub use error::Error;
pub use phonons::Phonons;
