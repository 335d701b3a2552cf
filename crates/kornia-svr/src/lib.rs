#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod accumulate;
pub use accumulate::{
    accumulate, accumulate_supervoxel, evaluate_cost, ordered_supervoxels, point_jacobian,
    NormalEquations,
};

mod context;
pub use context::OptimizationContext;

mod error;
pub use error::{SolverError, SvrError};

mod optimizer;
pub use optimizer::*;

mod solver;
pub use solver::solve_pose_step;

mod supervoxel;
pub use supervoxel::{Supervoxel, SupervoxelMap};

mod transform;
pub use transform::{PoseParameters, RigidTransform};
