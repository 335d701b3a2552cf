use std::collections::HashMap;

use crate::error::SvrError;

/// Relative threshold on the covariance determinant below which it is considered singular.
const SINGULAR_DET_EPS: f64 = 1e-12;

/// Relative tolerance on the difference between mirrored covariance entries.
const SYMMETRY_EPS: f64 = 1e-9;

/// Gaussian statistics of one reference-scan partition.
///
/// Besides the mean and covariance, a supervoxel carries the two weights of its
/// Gaussian cost term and the indices of the moving-scan points assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Supervoxel {
    id: u32,
    mean: [f64; 3],
    covariance: [[f64; 3]; 3],
    covariance_inv: [[f64; 3]; 3],
    d1: f64,
    d2: f64,
    indices: Vec<usize>,
}

/// Supervoxels keyed by their identifier.
pub type SupervoxelMap = HashMap<u32, Supervoxel>;

impl Supervoxel {
    /// Create a supervoxel and precompute its covariance inverse.
    ///
    /// # Arguments
    ///
    /// * `id` - The supervoxel identifier.
    /// * `mean` - Centroid of the partition.
    /// * `covariance` - Symmetric positive-definite covariance of the partition.
    /// * `d1` - Amplitude weight of the cost term, must be positive.
    /// * `d2` - Decay weight of the cost term, must be positive.
    /// * `indices` - Moving-scan points assigned to this partition.
    ///
    /// # Errors
    ///
    /// Returns [`SvrError::InvalidSupervoxel`] when the covariance is not finite,
    /// not symmetric, not positive definite or numerically singular, or when a
    /// weight is not positive.
    pub fn new(
        id: u32,
        mean: [f64; 3],
        covariance: [[f64; 3]; 3],
        d1: f64,
        d2: f64,
        indices: Vec<usize>,
    ) -> Result<Self, SvrError> {
        let invalid = |reason: &str| SvrError::InvalidSupervoxel {
            id,
            reason: reason.to_string(),
        };

        if !(d1.is_finite() && d1 > 0.0) {
            return Err(invalid("d1 must be positive"));
        }
        if !(d2.is_finite() && d2 > 0.0) {
            return Err(invalid("d2 must be positive"));
        }
        if mean.iter().any(|v| !v.is_finite()) {
            return Err(invalid("mean is not finite"));
        }

        let covariance_inv = invert_covariance(&covariance).map_err(invalid)?;

        Ok(Self {
            id,
            mean,
            covariance,
            covariance_inv,
            d1,
            d2,
            indices,
        })
    }

    /// The supervoxel identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The centroid of the partition.
    pub fn mean(&self) -> &[f64; 3] {
        &self.mean
    }

    /// The covariance of the partition.
    pub fn covariance(&self) -> &[[f64; 3]; 3] {
        &self.covariance
    }

    /// The precomputed inverse of the covariance.
    pub fn covariance_inv(&self) -> &[[f64; 3]; 3] {
        &self.covariance_inv
    }

    /// Amplitude weight.
    pub fn d1(&self) -> f64 {
        self.d1
    }

    /// Decay weight.
    pub fn d2(&self) -> f64 {
        self.d2
    }

    /// Indices of the moving-scan points assigned to this supervoxel.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

/// Invert a symmetric positive-definite 3x3 matrix using its adjugate.
fn invert_covariance(m: &[[f64; 3]; 3]) -> Result<[[f64; 3]; 3], &'static str> {
    if m.iter().flatten().any(|v| !v.is_finite()) {
        return Err("covariance is not finite");
    }

    let scale = m.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));
    for i in 0..3 {
        for j in (i + 1)..3 {
            if (m[i][j] - m[j][i]).abs() > SYMMETRY_EPS * scale {
                return Err("covariance is not symmetric");
            }
        }
    }

    // Sylvester criterion on the leading principal minors
    let minor1 = m[0][0];
    let minor2 = m[0][0] * m[1][1] - m[0][1] * m[1][0];

    let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
    let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
    let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;

    if minor1 <= 0.0 || minor2 <= 0.0 || det <= 0.0 {
        return Err("covariance is not positive definite");
    }

    if det <= SINGULAR_DET_EPS * scale.powi(3) {
        return Err("covariance is singular");
    }

    let inv_det = 1.0 / det;
    Ok([
        [
            c00 * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            c01 * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            c02 * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}
