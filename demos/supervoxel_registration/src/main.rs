use argh::FromArgs;
use rand::Rng;

use kornia_svr::{
    optimize_with_observer, ConvergenceMode, IterationReport, OptimizationContext,
    OptimizerParams, PoseParameters, RigidTransform, Supervoxel, SupervoxelMap,
};

#[derive(FromArgs)]
/// Register a synthetic scan against its supervoxel summary
struct Args {
    /// the number of supervoxels in the reference scan
    #[argh(option, short = 'n', default = "20")]
    num_supervoxels: usize,

    /// the number of points sampled per supervoxel
    #[argh(option, short = 'p', default = "50")]
    points_per_supervoxel: usize,

    /// the maximum number of iterations
    #[argh(option, short = 'i', default = "20")]
    iterations: usize,

    /// stop once the step norm falls below this tolerance
    #[argh(option, short = 't')]
    tolerance: Option<f64>,

    /// the magnitude of the translation offset applied to the moving scan
    #[argh(option, default = "0.1")]
    offset: f64,

    /// the rotation offset applied to the moving scan in degrees
    #[argh(option, default = "2.0")]
    angle: f64,

    /// accumulate the supervoxels in parallel
    #[argh(switch)]
    parallel: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut rng = rand::rng();

    // sample the reference scan as anisotropic blobs and summarize every blob
    let mut reference = Vec::new();
    let mut supervoxels = SupervoxelMap::new();
    for id in 0..args.num_supervoxels {
        let center = [
            rng.random_range(0.0..10.0),
            rng.random_range(0.0..10.0),
            rng.random_range(0.0..2.0),
        ];
        let extent = [
            rng.random_range(0.2..0.6),
            rng.random_range(0.2..0.6),
            rng.random_range(0.05..0.3),
        ];

        let start = reference.len();
        for _ in 0..args.points_per_supervoxel {
            reference.push([
                center[0] + rng.random_range(-1.0..1.0) * extent[0],
                center[1] + rng.random_range(-1.0..1.0) * extent[1],
                center[2] + rng.random_range(-1.0..1.0) * extent[2],
            ]);
        }
        let indices = (start..reference.len()).collect::<Vec<_>>();

        let (mean, covariance) = mean_and_covariance(&reference[start..]);
        let sv = Supervoxel::new(id as u32, mean, covariance, 1.0, 1.0, indices)?;
        supervoxels.insert(id as u32, sv);
    }

    // the moving scan is the reference seen from a perturbed pose
    let angle = args.angle.to_radians();
    let dst_t_src = RigidTransform::from_translation_euler(
        [args.offset, -args.offset / 2.0, args.offset / 4.0],
        angle / 2.0,
        -angle / 4.0,
        angle,
    );
    let mut moving = vec![[0.0; 3]; reference.len()];
    dst_t_src.inverse().transform_points(&reference, &mut moving)?;

    println!(
        "Reference scan: #{} points in #{} supervoxels",
        reference.len(),
        supervoxels.len()
    );

    let ctx = OptimizationContext::new(&moving, &supervoxels, RigidTransform::identity())?;

    let mut params = OptimizerParams::new()
        .with_max_iterations(args.iterations)
        .with_parallel(args.parallel);
    if let Some(tolerance) = args.tolerance {
        params = params
            .with_convergence(ConvergenceMode::StepTolerance)
            .with_tolerance(tolerance);
    }

    let result = optimize_with_observer(&ctx, &params, |report: &IterationReport| {
        match &report.step {
            Ok(step) => println!(
                "Iteration: {} cost: {:.6} step: {:?}",
                report.iteration, report.cost, step
            ),
            Err(err) => println!("Iteration: {} cost: {:.6} {}", report.iteration, report.cost, err),
        }
    });

    let expected = PoseParameters::from_transform(&dst_t_src);
    let estimated = PoseParameters::from_transform(&result.transform);

    println!("Status: {:?} after {} iterations", result.status, result.num_iterations);
    println!("Final cost: {:.6}", result.cost);
    println!("Expected  [x y z roll pitch yaw]: {:?}", expected.as_array());
    println!("Estimated [x y z roll pitch yaw]: {:?}", estimated.as_array());

    let error = expected
        .as_array()
        .iter()
        .zip(estimated.as_array().iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt();
    log::info!("Pose parameter error: {}", error);

    Ok(())
}

/// Sample mean and covariance of a set of points.
fn mean_and_covariance(points: &[[f64; 3]]) -> ([f64; 3], [[f64; 3]; 3]) {
    let n = points.len() as f64;

    let mut mean = [0.0; 3];
    for p in points {
        for k in 0..3 {
            mean[k] += p[k] / n;
        }
    }

    let mut covariance = [[0.0; 3]; 3];
    for p in points {
        let d = [p[0] - mean[0], p[1] - mean[1], p[2] - mean[2]];
        for i in 0..3 {
            for j in 0..3 {
                covariance[i][j] += d[i] * d[j] / n;
            }
        }
    }

    (mean, covariance)
}
