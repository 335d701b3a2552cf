use crate::error::SvrError;

/// Below this value of `cos(pitch)` the Euler decomposition is in gimbal lock.
const GIMBAL_LOCK_EPS: f64 = 1e-9;

/// A rigid transformation in 3D: a rotation followed by a translation.
///
/// The rotation is stored row-major, so a point `p` maps to `R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Rotation matrix, row-major.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// Create a transform from a rotation matrix and a translation vector.
    ///
    /// PRECONDITION: `rotation` is a proper rotation matrix.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    /// Build a transform from a translation and Euler angles.
    ///
    /// The rotation is composed as `Rx(roll) * Ry(pitch) * Rz(yaw)`, i.e. rotate about X,
    /// then about the new Y, then about the new Z.
    ///
    /// # Arguments
    ///
    /// * `translation` - The translation vector.
    /// * `roll` - Rotation angle about the X axis in radians.
    /// * `pitch` - Rotation angle about the Y axis in radians.
    /// * `yaw` - Rotation angle about the Z axis in radians.
    ///
    /// Example:
    ///
    /// ```
    /// use kornia_svr::RigidTransform;
    ///
    /// let t = RigidTransform::from_translation_euler([1.0, 2.0, 3.0], 0.0, 0.0, 0.0);
    /// assert_eq!(t.transform_point(&[0.0, 0.0, 0.0]), [1.0, 2.0, 3.0]);
    /// ```
    pub fn from_translation_euler(translation: [f64; 3], roll: f64, pitch: f64, yaw: f64) -> Self {
        let rx = rotation_x(roll);
        let ry = rotation_y(pitch);
        let rz = rotation_z(yaw);
        Self {
            rotation: matmul33(&matmul33(&rx, &ry), &rz),
            translation,
        }
    }

    /// Apply the transform to a single point.
    #[inline]
    pub fn transform_point(&self, p: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Transform a set of points into a pre-allocated buffer.
    ///
    /// # Arguments
    ///
    /// * `src_points` - The points to transform.
    /// * `dst_points` - A buffer of the same length receiving the transformed points.
    pub fn transform_points(
        &self,
        src_points: &[[f64; 3]],
        dst_points: &mut [[f64; 3]],
    ) -> Result<(), SvrError> {
        if src_points.len() != dst_points.len() {
            return Err(SvrError::DimensionMismatch {
                expected: src_points.len(),
                actual: dst_points.len(),
            });
        }

        for (dst, src) in dst_points.iter_mut().zip(src_points.iter()) {
            *dst = self.transform_point(src);
        }

        Ok(())
    }

    /// Transform a whole scan into a freshly allocated copy.
    pub fn transform_scan(&self, points: &[[f64; 3]]) -> Vec<[f64; 3]> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Compose two transforms, `self * other`: `other` is applied first.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        let rotation = matmul33(&self.rotation, &other.rotation);
        let rotated = self.transform_point(&other.translation);
        RigidTransform {
            rotation,
            translation: rotated,
        }
    }

    /// The inverse transform: `R^T` and `-R^T * t`.
    pub fn inverse(&self) -> RigidTransform {
        let r = &self.rotation;
        let rt = [
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ];
        let t = &self.translation;
        let translation = [
            -(rt[0][0] * t[0] + rt[0][1] * t[1] + rt[0][2] * t[2]),
            -(rt[1][0] * t[0] + rt[1][1] * t[1] + rt[1][2] * t[2]),
            -(rt[2][0] * t[0] + rt[2][1] * t[1] + rt[2][2] * t[2]),
        ];
        RigidTransform {
            rotation: rt,
            translation,
        }
    }
}

/// The six scalars the optimizer works on: translation and X-Y-Z Euler angles.
///
/// This type owns the only conversion pair between rigid transforms and Euler
/// angles in the crate, so composition and decomposition always agree on the
/// rotation order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseParameters {
    /// Translation along X.
    pub x: f64,
    /// Translation along Y.
    pub y: f64,
    /// Translation along Z.
    pub z: f64,
    /// Rotation about X in radians.
    pub roll: f64,
    /// Rotation about Y in radians.
    pub pitch: f64,
    /// Rotation about Z in radians.
    pub yaw: f64,
}

impl PoseParameters {
    /// Decompose a rigid transform into translation and Euler angles.
    ///
    /// Inverse of [`PoseParameters::to_transform`]. In gimbal lock
    /// (`pitch = ±π/2`) the yaw is fixed to zero and the whole in-plane rotation
    /// is assigned to roll.
    pub fn from_transform(transform: &RigidTransform) -> Self {
        let r = &transform.rotation;
        let [x, y, z] = transform.translation;

        let pitch = r[0][2].clamp(-1.0, 1.0).asin();
        let cos_pitch = r[0][0].hypot(r[0][1]);

        let (roll, yaw) = if cos_pitch < GIMBAL_LOCK_EPS {
            (r[2][1].atan2(r[1][1]), 0.0)
        } else {
            ((-r[1][2]).atan2(r[2][2]), (-r[0][1]).atan2(r[0][0]))
        };

        Self {
            x,
            y,
            z,
            roll,
            pitch,
            yaw,
        }
    }

    /// Recompose the rigid transform, see [`RigidTransform::from_translation_euler`].
    pub fn to_transform(&self) -> RigidTransform {
        RigidTransform::from_translation_euler([self.x, self.y, self.z], self.roll, self.pitch, self.yaw)
    }

    /// The parameters as `[x, y, z, roll, pitch, yaw]`.
    pub fn as_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.roll, self.pitch, self.yaw]
    }

    /// Build the parameters from `[x, y, z, roll, pitch, yaw]`.
    pub fn from_array(params: [f64; 6]) -> Self {
        let [x, y, z, roll, pitch, yaw] = params;
        Self {
            x,
            y,
            z,
            roll,
            pitch,
            yaw,
        }
    }

    /// Subtract a scaled step from every parameter, in `[x, y, z, roll, pitch, yaw]` order.
    pub fn apply_step(&mut self, step: &[f64; 6], scale: f64) {
        self.x -= scale * step[0];
        self.y -= scale * step[1];
        self.z -= scale * step[2];
        self.roll -= scale * step[3];
        self.pitch -= scale * step[4];
        self.yaw -= scale * step[5];
    }
}

fn rotation_x(angle: f64) -> [[f64; 3]; 3] {
    let (s, c) = angle.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

fn rotation_y(angle: f64) -> [[f64; 3]; 3] {
    let (s, c) = angle.sin_cos();
    [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]
}

fn rotation_z(angle: f64) -> [[f64; 3]; 3] {
    let (s, c) = angle.sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

fn matmul33(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut m = [[0.0; 3]; 3];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    m
}
