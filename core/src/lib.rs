//! Array-processing and DOA estimation core for the Rust radar-sounder platform.
//!
//! The modules implement the multichannel estimation chain (steering-vector
//! generation, snapshot extraction, covariance estimation, beamforming and
//! parametric DOA estimation) behind safe abstractions with well-defined
//! per-pixel failure semantics: configuration problems are fatal before any
//! data is touched, numerical degeneracy degrades single pixels to NaN.

pub mod config;
pub mod interface;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

/// Common error type for configuration resolution and engine execution.
#[derive(thiserror::Error, Debug)]
pub enum ProcError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("buffer exhaustion: {0}")]
    BufferExhaustion(String),
    #[error("degenerate pixel: {0}")]
    Degenerate(String),
}

pub type ProcResult<T> = Result<T, ProcError>;
