use crate::error::SolverError;

/// Solve `H * step = g` for the pose step using a singular value decomposition.
///
/// The solve is the minimum-norm least-squares solution: singular values below
/// `max_sv * 6 * f64::EPSILON` are treated as zero, so rank-deficient and
/// indefinite Hessians yield a finite step.
///
/// # Arguments
///
/// * `hessian` - The symmetric 6x6 Hessian.
/// * `gradient` - The gradient.
///
/// # Returns
///
/// The step to subtract from the pose parameters, or
/// [`SolverError::SingularSystem`] if the system carries no information
/// (all-zero or non-finite).
///
/// Example:
///
/// ```
/// use kornia_svr::solve_pose_step;
///
/// let mut hessian = [[0.0; 6]; 6];
/// for (i, row) in hessian.iter_mut().enumerate() {
///     row[i] = 2.0;
/// }
/// let step = solve_pose_step(&hessian, &[2.0; 6]).unwrap();
/// assert!((step[0] - 1.0).abs() < 1e-12);
/// ```
pub fn solve_pose_step(
    hessian: &[[f64; 6]; 6],
    gradient: &[f64; 6],
) -> Result<[f64; 6], SolverError> {
    if hessian.iter().flatten().chain(gradient.iter()).any(|v| !v.is_finite()) {
        return Err(SolverError::SingularSystem);
    }

    let mat_h = faer::Mat::<f64>::from_fn(6, 6, |i, j| hessian[i][j]);
    let svd = mat_h.svd();

    let (u, s, v) = (svd.u(), svd.s_diagonal(), svd.v());

    let max_sv = (0..6).map(|k| s.read(k).abs()).fold(0.0f64, f64::max);
    if max_sv <= f64::MIN_POSITIVE {
        return Err(SolverError::SingularSystem);
    }
    let threshold = max_sv * 6.0 * f64::EPSILON;

    // step = V * S^+ * U^T * g
    let mut step = [0.0; 6];
    for k in 0..6 {
        let sv = s.read(k);
        if sv.abs() <= threshold {
            continue;
        }
        let coeff = (0..6).map(|i| u.read(i, k) * gradient[i]).sum::<f64>() / sv;
        for (i, val) in step.iter_mut().enumerate() {
            *val += v.read(i, k) * coeff;
        }
    }

    if step.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::SingularSystem);
    }

    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn diagonal(values: [f64; 6]) -> [[f64; 6]; 6] {
        let mut m = [[0.0; 6]; 6];
        for (i, v) in values.iter().enumerate() {
            m[i][i] = *v;
        }
        m
    }

    #[test]
    fn test_solve_identity() -> Result<(), SolverError> {
        let gradient = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let step = solve_pose_step(&diagonal([1.0; 6]), &gradient)?;
        for i in 0..6 {
            assert_relative_eq!(step[i], gradient[i], epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_solve_dense() -> Result<(), SolverError> {
        // symmetric positive definite: diagonally dominant
        let mut hessian = [[0.1; 6]; 6];
        for (i, row) in hessian.iter_mut().enumerate() {
            row[i] = 2.0 + i as f64;
        }
        let expected = [0.5, -1.0, 0.25, 2.0, 0.0, -0.3];
        let mut gradient = [0.0; 6];
        for (i, g) in gradient.iter_mut().enumerate() {
            *g = (0..6).map(|j| hessian[i][j] * expected[j]).sum();
        }

        let step = solve_pose_step(&hessian, &gradient)?;
        for i in 0..6 {
            assert_relative_eq!(step[i], expected[i], epsilon = 1e-10);
        }
        Ok(())
    }

    #[test]
    fn test_solve_rank_deficient() -> Result<(), SolverError> {
        let hessian = diagonal([2.0, 2.0, 2.0, 0.0, 0.0, 0.0]);
        let gradient = [2.0, 4.0, 6.0, 1.0, 1.0, 1.0];
        let step = solve_pose_step(&hessian, &gradient)?;
        let expected = [1.0, 2.0, 3.0, 0.0, 0.0, 0.0];
        for i in 0..6 {
            assert_relative_eq!(step[i], expected[i], epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_solve_indefinite() -> Result<(), SolverError> {
        let hessian = diagonal([1.0, -2.0, 4.0, -1.0, 0.5, 1.0]);
        let gradient = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let step = solve_pose_step(&hessian, &gradient)?;
        let expected = [1.0, -0.5, 0.25, -1.0, 2.0, 1.0];
        for i in 0..6 {
            assert_relative_eq!(step[i], expected[i], epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_solve_zero_system() {
        let res = solve_pose_step(&[[0.0; 6]; 6], &[0.0; 6]);
        assert_eq!(res, Err(SolverError::SingularSystem));

        let res = solve_pose_step(&[[0.0; 6]; 6], &[1.0; 6]);
        assert_eq!(res, Err(SolverError::SingularSystem));
    }

    #[test]
    fn test_solve_non_finite() {
        let mut hessian = diagonal([1.0; 6]);
        hessian[2][2] = f64::NAN;
        let res = solve_pose_step(&hessian, &[1.0; 6]);
        assert_eq!(res, Err(SolverError::SingularSystem));
    }
}
