//! Common utilities and data structures shared by the nav-crowd crates

pub mod math;
pub mod vector;

pub use math::*;
pub use vector::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    #[error("out of capacity: {0}")]
    OutOfCapacity(&'static str),

    #[error("no path between the requested locations")]
    PathNotFound,

    #[error("only a partial path is available")]
    PartialResult,

    #[error("navigation query failed: {0}")]
    Nav(String),
}

/// Result type for crowd operations
pub type Result<T> = std::result::Result<T, Error>;
