//! Registry error types.

use snafu::Snafu;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum RegistryError {
    /// The registry is full and the instance is not already registered.
    #[snafu(display("instance registry is full ({max} instances)"))]
    CapacityExceeded {
        /// The configured bound.
        max: u32,
    },

    /// The instance announced more extra attributes than allowed.
    #[snafu(display("instance announced {count} attributes, at most {max} are allowed"))]
    TooManyAttributes {
        /// Announced count.
        count: usize,
        /// The bound.
        max: u32,
    },
}
