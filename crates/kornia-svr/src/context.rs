use crate::error::SvrError;
use crate::supervoxel::SupervoxelMap;
use crate::transform::RigidTransform;

/// Read-only inputs of one optimization call.
///
/// The context borrows the moving scan and the supervoxel map from the caller
/// and is validated once at construction, so the optimizer never has to deal
/// with out of range indices mid-loop.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationContext<'a> {
    scan: &'a [[f64; 3]],
    supervoxels: &'a SupervoxelMap,
    initial_transform: RigidTransform,
}

impl<'a> OptimizationContext<'a> {
    /// Create and validate a new optimization context.
    ///
    /// # Arguments
    ///
    /// * `scan` - The moving scan, indexed by the supervoxels.
    /// * `supervoxels` - The reference scan summarized as supervoxels.
    /// * `initial_transform` - Initial guess of the pose of the moving scan.
    ///
    /// # Errors
    ///
    /// * [`SvrError::IndexOutOfRange`] if a supervoxel references a point outside `scan`.
    /// * [`SvrError::InvalidSupervoxel`] if a map key disagrees with the supervoxel id.
    pub fn new(
        scan: &'a [[f64; 3]],
        supervoxels: &'a SupervoxelMap,
        initial_transform: RigidTransform,
    ) -> Result<Self, SvrError> {
        for (key, supervoxel) in supervoxels.iter() {
            if *key != supervoxel.id() {
                return Err(SvrError::InvalidSupervoxel {
                    id: supervoxel.id(),
                    reason: format!("stored under key {key}"),
                });
            }

            if let Some(&index) = supervoxel.indices().iter().find(|&&i| i >= scan.len()) {
                return Err(SvrError::IndexOutOfRange {
                    id: supervoxel.id(),
                    index,
                    len: scan.len(),
                });
            }
        }

        Ok(Self {
            scan,
            supervoxels,
            initial_transform,
        })
    }

    /// The moving scan.
    pub fn scan(&self) -> &'a [[f64; 3]] {
        self.scan
    }

    /// The supervoxel map.
    pub fn supervoxels(&self) -> &'a SupervoxelMap {
        self.supervoxels
    }

    /// The initial pose estimate.
    pub fn initial_transform(&self) -> &RigidTransform {
        &self.initial_transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervoxel::Supervoxel;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    #[test]
    fn test_context_valid() -> Result<(), SvrError> {
        let scan = vec![[0.0; 3], [1.0, 0.0, 0.0]];
        let mut map = SupervoxelMap::new();
        map.insert(0, Supervoxel::new(0, [0.0; 3], IDENTITY, 1.0, 1.0, vec![0, 1])?);

        let ctx = OptimizationContext::new(&scan, &map, RigidTransform::identity())?;
        assert_eq!(ctx.scan().len(), 2);
        assert_eq!(ctx.supervoxels().len(), 1);
        assert_eq!(ctx.initial_transform(), &RigidTransform::identity());
        Ok(())
    }

    #[test]
    fn test_context_index_out_of_range() -> Result<(), SvrError> {
        let scan = vec![[0.0; 3], [1.0, 0.0, 0.0]];
        let mut map = SupervoxelMap::new();
        map.insert(5, Supervoxel::new(5, [0.0; 3], IDENTITY, 1.0, 1.0, vec![1, 2])?);

        let res = OptimizationContext::new(&scan, &map, RigidTransform::identity());
        assert!(matches!(
            res,
            Err(SvrError::IndexOutOfRange {
                id: 5,
                index: 2,
                len: 2
            })
        ));
        Ok(())
    }

    #[test]
    fn test_context_key_mismatch() -> Result<(), SvrError> {
        let scan = vec![[0.0; 3]];
        let mut map = SupervoxelMap::new();
        map.insert(1, Supervoxel::new(2, [0.0; 3], IDENTITY, 1.0, 1.0, vec![0])?);

        let res = OptimizationContext::new(&scan, &map, RigidTransform::identity());
        assert!(matches!(res, Err(SvrError::InvalidSupervoxel { id: 2, .. })));
        Ok(())
    }
}
