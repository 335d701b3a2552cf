//! Cost, gradient and Hessian of the sum-of-Gaussians registration cost.
//!
//! For a transformed point `X` assigned to a supervoxel with mean `U`, inverse
//! covariance `S` and weights `d1`, `d2`, the cost term is
//! `d1 * exp(-d2 * (X - U)^T S (X - U) / 2)`. Derivatives are taken with respect
//! to the 6 pose parameters through the small-angle Jacobian of `X`.

use rayon::prelude::*;

use crate::context::OptimizationContext;
use crate::supervoxel::{Supervoxel, SupervoxelMap};
use crate::transform::RigidTransform;

/// Gradient and approximate Hessian of the cost, together with the cost itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEquations {
    /// Accumulated cost.
    pub cost: f64,
    /// Gradient with respect to `[x, y, z, roll, pitch, yaw]`.
    pub gradient: [f64; 6],
    /// Hessian with respect to `[x, y, z, roll, pitch, yaw]`.
    ///
    /// Only the upper triangle is filled during accumulation, see
    /// [`NormalEquations::mirror_upper`].
    pub hessian: [[f64; 6]; 6],
}

impl Default for NormalEquations {
    fn default() -> Self {
        Self::zeros()
    }
}

impl NormalEquations {
    /// An empty system.
    pub fn zeros() -> Self {
        Self {
            cost: 0.0,
            gradient: [0.0; 6],
            hessian: [[0.0; 6]; 6],
        }
    }

    /// Add the contribution of one transformed point to the upper triangle.
    ///
    /// # Arguments
    ///
    /// * `point` - The transformed moving-scan point.
    /// * `mean` - The supervoxel mean.
    /// * `covariance_inv` - The supervoxel inverse covariance.
    /// * `d1` - Amplitude weight.
    /// * `d2` - Decay weight.
    pub fn add_point(
        &mut self,
        point: &[f64; 3],
        mean: &[f64; 3],
        covariance_inv: &[[f64; 3]; 3],
        d1: f64,
        d2: f64,
    ) {
        let jacobian = point_jacobian(point);

        let residual = [point[0] - mean[0], point[1] - mean[1], point[2] - mean[2]];
        let weighted_residual = mat3_vec3(covariance_inv, &residual);

        let power = -d2 * dot3(&residual, &weighted_residual) / 2.0;
        let exponent = power.exp();

        self.cost += d1 * exponent;

        // S * J, column by column
        let mut weighted_jacobian = [[0.0; 3]; 6];
        for (k, col) in weighted_jacobian.iter_mut().enumerate() {
            *col = mat3_vec3(covariance_inv, &jacobian_col(&jacobian, k));
        }

        // J_k^T S (X - U)
        let mut projected = [0.0; 6];
        for (k, val) in projected.iter_mut().enumerate() {
            *val = dot3(&jacobian_col(&jacobian, k), &weighted_residual);
        }

        let scale = -d1 * d2 * exponent;
        for (g, p) in self.gradient.iter_mut().zip(projected.iter()) {
            *g += scale * p;
        }

        for i in 0..6 {
            for j in i..6 {
                let outer = -d2 * projected[i] * projected[j];
                let curvature = dot3(&jacobian_col(&jacobian, j), &weighted_jacobian[i]);
                self.hessian[i][j] += scale * (outer + curvature);
            }
        }
    }

    /// Sum two partial systems.
    pub fn merge(mut self, other: &NormalEquations) -> NormalEquations {
        self.cost += other.cost;
        for (a, b) in self.gradient.iter_mut().zip(other.gradient.iter()) {
            *a += b;
        }
        for (row_a, row_b) in self.hessian.iter_mut().zip(other.hessian.iter()) {
            for (a, b) in row_a.iter_mut().zip(row_b.iter()) {
                *a += b;
            }
        }
        self
    }

    /// Copy the upper triangle of the Hessian into the lower one.
    pub fn mirror_upper(&mut self) {
        for i in 0..6 {
            for j in (i + 1)..6 {
                self.hessian[j][i] = self.hessian[i][j];
            }
        }
    }

    /// Whether the gradient and the Hessian are exactly zero.
    pub fn is_zero(&self) -> bool {
        self.gradient.iter().all(|v| *v == 0.0)
            && self.hessian.iter().flatten().all(|v| *v == 0.0)
    }
}

/// Linearized sensitivity of a transformed point to the 6 pose parameters.
///
/// Rows are the x, y, z coordinates. The first three columns are the identity
/// (translation), the last three the infinitesimal rotation generators about
/// X, Y and Z evaluated at `point`.
#[inline]
pub fn point_jacobian(point: &[f64; 3]) -> [[f64; 6]; 3] {
    let [x, y, z] = *point;
    [
        [1.0, 0.0, 0.0, 0.0, z, -y],
        [0.0, 1.0, 0.0, -z, 0.0, x],
        [0.0, 0.0, 1.0, y, -x, 0.0],
    ]
}

/// Accumulate the contribution of every point assigned to a supervoxel.
///
/// # Arguments
///
/// * `supervoxel` - The supervoxel to accumulate.
/// * `transformed_scan` - The moving scan after applying the candidate transform.
///
/// PRECONDITION: every index of `supervoxel` is valid for `transformed_scan`.
pub fn accumulate_supervoxel(
    supervoxel: &Supervoxel,
    transformed_scan: &[[f64; 3]],
) -> NormalEquations {
    let mut system = NormalEquations::zeros();
    for &index in supervoxel.indices() {
        system.add_point(
            &transformed_scan[index],
            supervoxel.mean(),
            supervoxel.covariance_inv(),
            supervoxel.d1(),
            supervoxel.d2(),
        );
    }
    system
}

/// Accumulate the full system over all supervoxels and mirror the Hessian.
///
/// Supervoxels without assigned points are skipped. With `parallel` the
/// per-supervoxel partial systems are computed on the rayon thread pool and
/// summed; the result matches the sequential one up to floating point
/// reassociation.
///
/// # Arguments
///
/// * `supervoxels` - The supervoxels to accumulate, in reduction order.
/// * `transformed_scan` - The moving scan after applying the candidate transform.
/// * `parallel` - Whether to reduce on the rayon thread pool.
pub fn accumulate(
    supervoxels: &[&Supervoxel],
    transformed_scan: &[[f64; 3]],
    parallel: bool,
) -> NormalEquations {
    let mut system = if parallel {
        supervoxels
            .par_iter()
            .filter(|sv| !sv.indices().is_empty())
            .map(|sv| accumulate_supervoxel(sv, transformed_scan))
            .reduce(NormalEquations::zeros, |a, b| a.merge(&b))
    } else {
        supervoxels
            .iter()
            .filter(|sv| !sv.indices().is_empty())
            .fold(NormalEquations::zeros(), |acc, sv| {
                acc.merge(&accumulate_supervoxel(sv, transformed_scan))
            })
    };

    system.mirror_upper();
    system
}

/// Supervoxels sorted by id, so that sequential reductions are reproducible
/// regardless of the hash map iteration order.
pub fn ordered_supervoxels(map: &SupervoxelMap) -> Vec<&Supervoxel> {
    let mut supervoxels = map.values().collect::<Vec<_>>();
    supervoxels.sort_unstable_by_key(|sv| sv.id());
    supervoxels
}

/// Evaluate the registration cost of a candidate transform, without derivatives.
///
/// # Arguments
///
/// * `context` - The validated optimization inputs.
/// * `transform` - The candidate pose of the moving scan.
pub fn evaluate_cost(context: &OptimizationContext<'_>, transform: &RigidTransform) -> f64 {
    let scan = context.scan();
    ordered_supervoxels(context.supervoxels())
        .iter()
        .map(|sv| {
            let mean = sv.mean();
            sv.indices()
                .iter()
                .map(|&index| {
                    let p = transform.transform_point(&scan[index]);
                    let residual = [p[0] - mean[0], p[1] - mean[1], p[2] - mean[2]];
                    let weighted = mat3_vec3(sv.covariance_inv(), &residual);
                    sv.d1() * (-sv.d2() * dot3(&residual, &weighted) / 2.0).exp()
                })
                .sum::<f64>()
        })
        .sum()
}

#[inline]
fn jacobian_col(jacobian: &[[f64; 6]; 3], k: usize) -> [f64; 3] {
    [jacobian[0][k], jacobian[1][k], jacobian[2][k]]
}

#[inline]
fn mat3_vec3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

#[inline]
fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SvrError;
    use approx::assert_relative_eq;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn create_random_points(num_points: usize) -> Vec<[f64; 3]> {
        (0..num_points)
            .map(|_| {
                [
                    rand::random::<f64>(),
                    rand::random::<f64>(),
                    rand::random::<f64>(),
                ]
            })
            .collect()
    }

    fn create_random_map(num_points: usize, num_supervoxels: u32) -> Result<SupervoxelMap, SvrError> {
        let mut map = SupervoxelMap::new();
        for id in 0..num_supervoxels {
            let indices = (0..num_points)
                .filter(|i| *i as u32 % num_supervoxels == id)
                .collect::<Vec<_>>();
            let s = 0.05 + rand::random::<f64>() * 0.1;
            let cov = [[s, 0.01, 0.0], [0.01, s, 0.0], [0.0, 0.0, s * 2.0]];
            let mean = [
                rand::random::<f64>(),
                rand::random::<f64>(),
                rand::random::<f64>(),
            ];
            map.insert(id, Supervoxel::new(id, mean, cov, 1.0, 0.5, indices)?);
        }
        Ok(map)
    }

    #[test]
    fn test_point_jacobian() {
        let jac = point_jacobian(&[1.0, 2.0, 3.0]);
        assert_eq!(jac[0], [1.0, 0.0, 0.0, 0.0, 3.0, -2.0]);
        assert_eq!(jac[1], [0.0, 1.0, 0.0, -3.0, 0.0, 1.0]);
        assert_eq!(jac[2], [0.0, 0.0, 1.0, 2.0, -1.0, 0.0]);
    }

    #[test]
    fn test_zero_gradient_at_mean() -> Result<(), SvrError> {
        let scan = vec![[0.0; 3]];
        let sv = Supervoxel::new(0, [0.0; 3], IDENTITY, 1.0, 1.0, vec![0])?;

        let system = accumulate(&[&sv], &scan, false);

        assert_eq!(system.cost, 1.0);
        assert_eq!(system.gradient, [0.0; 6]);
        Ok(())
    }

    #[test]
    fn test_single_point_closed_form() -> Result<(), SvrError> {
        // the point sits at the origin so the rotational columns of J vanish
        let t = [0.1, -0.05, 0.02];
        let scan = vec![[0.0; 3]];
        let sv = Supervoxel::new(0, [-t[0], -t[1], -t[2]], IDENTITY, 1.0, 1.0, vec![0])?;

        let system = accumulate(&[&sv], &scan, false);

        let w = (-(t[0] * t[0] + t[1] * t[1] + t[2] * t[2]) / 2.0).exp();
        assert_relative_eq!(system.cost, w, epsilon = 1e-15);

        for i in 0..3 {
            assert_relative_eq!(system.gradient[i], -w * t[i], epsilon = 1e-15);
            assert_eq!(system.gradient[i + 3], 0.0);
        }

        for i in 0..6 {
            for j in 0..6 {
                let expected = if i < 3 && j < 3 {
                    let delta = if i == j { 1.0 } else { 0.0 };
                    -w * (delta - t[i] * t[j])
                } else {
                    0.0
                };
                assert_relative_eq!(system.hessian[i][j], expected, epsilon = 1e-15);
            }
        }
        Ok(())
    }

    #[test]
    fn test_hessian_symmetry() -> Result<(), SvrError> {
        let scan = create_random_points(200);
        let map = create_random_map(scan.len(), 7)?;

        let system = accumulate(&ordered_supervoxels(&map), &scan, false);

        for i in 0..6 {
            for j in 0..6 {
                assert_eq!(system.hessian[i][j], system.hessian[j][i]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_skip_empty_supervoxel() -> Result<(), SvrError> {
        let scan = create_random_points(50);
        let mut map = create_random_map(scan.len(), 4)?;
        let before = accumulate(&ordered_supervoxels(&map), &scan, false);

        map.insert(99, Supervoxel::new(99, [0.5; 3], IDENTITY, 3.0, 2.0, vec![])?);
        let after = accumulate(&ordered_supervoxels(&map), &scan, false);

        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn test_empty_map_is_zero() {
        let scan = create_random_points(10);
        let system = accumulate(&[], &scan, false);
        assert!(system.is_zero());
        assert_eq!(system.cost, 0.0);
    }

    #[test]
    fn test_parallel_matches_sequential() -> Result<(), SvrError> {
        let scan = create_random_points(500);
        let map = create_random_map(scan.len(), 16)?;
        let supervoxels = ordered_supervoxels(&map);

        let sequential = accumulate(&supervoxels, &scan, false);
        let parallel = accumulate(&supervoxels, &scan, true);

        assert_relative_eq!(sequential.cost, parallel.cost, epsilon = 1e-9);
        for i in 0..6 {
            assert_relative_eq!(sequential.gradient[i], parallel.gradient[i], epsilon = 1e-9);
            for j in 0..6 {
                assert_relative_eq!(
                    sequential.hessian[i][j],
                    parallel.hessian[i][j],
                    epsilon = 1e-9
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_gradient_matches_finite_differences() -> Result<(), SvrError> {
        // translation entries of the gradient are exact derivatives of the cost
        let scan = create_random_points(30);
        let map = create_random_map(scan.len(), 3)?;
        let ctx = OptimizationContext::new(&scan, &map, RigidTransform::identity())?;

        let system = accumulate(&ordered_supervoxels(&map), &scan, false);

        let eps = 1e-6;
        for k in 0..3 {
            let mut plus = [0.0; 3];
            let mut minus = [0.0; 3];
            plus[k] = eps;
            minus[k] = -eps;
            let cost_plus = evaluate_cost(&ctx, &RigidTransform::new(IDENTITY, plus));
            let cost_minus = evaluate_cost(&ctx, &RigidTransform::new(IDENTITY, minus));
            let numeric = (cost_plus - cost_minus) / (2.0 * eps);
            assert_relative_eq!(system.gradient[k], numeric, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_evaluate_cost_matches_accumulation() -> Result<(), SvrError> {
        let scan = create_random_points(40);
        let map = create_random_map(scan.len(), 5)?;
        let ctx = OptimizationContext::new(&scan, &map, RigidTransform::identity())?;

        let transform = RigidTransform::from_translation_euler([0.1, 0.0, -0.1], 0.05, 0.0, 0.02);
        let transformed = transform.transform_scan(&scan);
        let system = accumulate(&ordered_supervoxels(&map), &transformed, false);

        assert_relative_eq!(evaluate_cost(&ctx, &transform), system.cost, epsilon = 1e-12);
        Ok(())
    }
}
