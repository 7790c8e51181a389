use thiserror::Error;

/// Everything that can go wrong while building or driving the engine.
///
/// Construction-time problems (bad masses, bad shapes, empty grids) are
/// surfaced eagerly; numerical degeneracies on the hot path are clamped to
/// zero locally and never reach this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("force-constant tensor has {got} entries, expected {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("eigendecomposition failed at wavevector {ik}")]
    Diagonalization { ik: usize },

    #[error("scattering bandwidths unavailable: {0}")]
    MissingBandwidths(&'static str),
}
