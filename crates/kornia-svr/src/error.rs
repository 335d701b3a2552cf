/// Errors raised while building or validating an optimization problem.
///
/// These are caller contract violations and are reported before any
/// iteration runs.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SvrError {
    /// The supervoxel statistics cannot be used by the optimizer.
    #[error("Invalid supervoxel {id}: {reason}")]
    InvalidSupervoxel {
        /// Identifier of the offending supervoxel.
        id: u32,
        /// Human readable description of the problem.
        reason: String,
    },

    /// A supervoxel references a point outside the moving scan.
    #[error("Supervoxel {id} references point {index} but the scan has {len} points")]
    IndexOutOfRange {
        /// Identifier of the offending supervoxel.
        id: u32,
        /// The out of range index.
        index: usize,
        /// Number of points in the moving scan.
        len: usize,
    },

    /// Input and output buffers have different lengths.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}

/// Errors raised by the linear solve of a single iteration.
///
/// They are recoverable: the optimizer skips the pose update and continues.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverError {
    /// The accumulated Hessian carries no usable information.
    #[error("Singular linear system")]
    SingularSystem,
}
