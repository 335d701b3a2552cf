use serde::{Deserialize, Serialize};

use crate::accumulate::{accumulate, evaluate_cost, ordered_supervoxels};
use crate::context::OptimizationContext;
use crate::error::SolverError;
use crate::solver::solve_pose_step;
use crate::transform::{PoseParameters, RigidTransform};

/// When the optimizer stops iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceMode {
    /// Always run the full iteration budget.
    #[default]
    FixedIterations,
    /// Stop as soon as the norm of the pose step falls below the tolerance.
    StepTolerance,
}

/// Parameters of the pose optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Stopping rule.
    pub convergence: ConvergenceMode,
    /// Threshold on the Euclidean norm of the pose step, used by
    /// [`ConvergenceMode::StepTolerance`].
    pub tolerance: f64,
    /// Scale applied to every pose step.
    pub step_size: f64,
    /// Accumulate the supervoxels on the rayon thread pool.
    pub parallel: bool,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            convergence: ConvergenceMode::FixedIterations,
            tolerance: 1e-3,
            step_size: 1.0,
            parallel: false,
        }
    }
}

impl OptimizerParams {
    /// Create default optimizer parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the stopping rule.
    pub fn with_convergence(mut self, convergence: ConvergenceMode) -> Self {
        self.convergence = convergence;
        self
    }

    /// Set the step norm tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the step scale.
    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    /// Enable or disable the parallel accumulation.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// How the optimization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationStatus {
    /// The fixed iteration budget was spent.
    Completed,
    /// The step norm fell below the tolerance.
    Converged,
    /// The iteration budget was exhausted before the step norm fell below the tolerance.
    NonConvergence,
}

/// Diagnostics of a single iteration.
#[derive(Debug, Clone)]
pub struct IterationReport {
    /// 1-based iteration index.
    pub iteration: usize,
    /// Cost at the pose the iteration started from.
    pub cost: f64,
    /// Symmetric Hessian of the iteration.
    pub hessian: [[f64; 6]; 6],
    /// Gradient of the iteration.
    pub gradient: [f64; 6],
    /// The pose step, or the reason the update was skipped.
    pub step: Result<[f64; 6], SolverError>,
}

/// Receives the diagnostics of every iteration.
///
/// Observers never influence the optimization. Any `FnMut(&IterationReport)`
/// closure is an observer.
pub trait IterationObserver {
    /// Called once per iteration, after the linear solve.
    fn on_iteration(&mut self, report: &IterationReport);
}

impl<F> IterationObserver for F
where
    F: FnMut(&IterationReport),
{
    fn on_iteration(&mut self, report: &IterationReport) {
        self(report)
    }
}

/// Result of the pose optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// The refined pose of the moving scan.
    pub transform: RigidTransform,
    /// Cost computed in the last iteration.
    pub cost: f64,
    /// Number of iterations performed.
    pub num_iterations: usize,
    /// Number of iterations whose pose update was skipped on a singular system.
    pub singular_iterations: usize,
    /// How the optimization ended.
    pub status: OptimizationStatus,
}

/// Align the moving scan against the supervoxel map.
///
/// See [`optimize_with_observer`].
pub fn optimize(context: &OptimizationContext<'_>, params: &OptimizerParams) -> OptimizationResult {
    optimize_with_observer(context, params, |_: &IterationReport| {})
}

/// Align the moving scan against the supervoxel map, reporting every iteration.
///
/// Each iteration transforms the moving scan by the current pose, accumulates
/// the gradient and Hessian of the sum-of-Gaussians cost over all supervoxels,
/// solves for a step and subtracts it from the pose parameters. An iteration
/// whose system is singular leaves the pose untouched.
///
/// # Arguments
///
/// * `context` - The validated optimization inputs.
/// * `params` - The optimizer parameters.
/// * `observer` - Receives the diagnostics of every iteration.
///
/// # Returns
///
/// The refined transform together with the cost of the last iteration.
pub fn optimize_with_observer<O: IterationObserver>(
    context: &OptimizationContext<'_>,
    params: &OptimizerParams,
    mut observer: O,
) -> OptimizationResult {
    let supervoxels = ordered_supervoxels(context.supervoxels());
    let mut pose = PoseParameters::from_transform(context.initial_transform());

    let mut cost = None;
    let mut num_iterations = 0;
    let mut singular_iterations = 0;
    let mut converged = false;

    for iteration in 1..=params.max_iterations {
        let now = std::time::Instant::now();

        let transform = pose.to_transform();
        let transformed_scan = transform.transform_scan(context.scan());

        let system = accumulate(&supervoxels, &transformed_scan, params.parallel);
        cost = Some(system.cost);
        num_iterations = iteration;

        // nothing was accumulated, e.g. every supervoxel is empty
        let step = if system.is_zero() {
            Err(SolverError::SingularSystem)
        } else {
            solve_pose_step(&system.hessian, &system.gradient)
        };

        log::debug!("Iteration: {} cost: {}", iteration, system.cost);
        log::trace!("Hessian: {:?}", system.hessian);
        log::trace!("Gradient: {:?}", system.gradient);

        let report = IterationReport {
            iteration,
            cost: system.cost,
            hessian: system.hessian,
            gradient: system.gradient,
            step,
        };
        observer.on_iteration(&report);

        match step {
            Ok(step) => {
                let step_norm = step.iter().map(|v| v * v).sum::<f64>().sqrt();
                log::trace!("Pose step: {:?}", step);
                log::debug!("Step norm: {}", step_norm);

                pose.apply_step(&step, params.step_size);

                if params.convergence == ConvergenceMode::StepTolerance
                    && step_norm < params.tolerance
                {
                    log::debug!("Converged in {} iterations with cost {}", iteration, system.cost);
                    converged = true;
                    break;
                }
            }
            Err(err) => {
                log::warn!("Iteration {}: {}, skipping pose update", iteration, err);
                singular_iterations += 1;
            }
        }

        log::debug!("elapsed: {:?}", now.elapsed());
    }

    let transform = pose.to_transform();

    // no iteration ran, report the cost of the initial pose
    let cost = cost.unwrap_or_else(|| evaluate_cost(context, &transform));

    let status = match params.convergence {
        ConvergenceMode::FixedIterations => OptimizationStatus::Completed,
        ConvergenceMode::StepTolerance if converged => OptimizationStatus::Converged,
        ConvergenceMode::StepTolerance => OptimizationStatus::NonConvergence,
    };

    OptimizationResult {
        transform,
        cost,
        num_iterations,
        singular_iterations,
        status,
    }
}
