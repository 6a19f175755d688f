use crate::{OcTreeError, Result};

/// Construction parameters for an [`OcTreeBase`](crate::OcTreeBase).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OcTreeParams {
    /// Edge length of the finest cells, in meters.
    pub resolution: f64,
    /// Occupancy probability at or above which a node counts as occupied.
    pub occupancy_threshold: f64,
    /// The `k` of occupancy-weighted attribute integration, `old * p + new * (k - p)`.
    ///
    /// The default of 0.99 keeps results identical to data produced by older mapping tools. A value of 1.0 turns the blend
    /// into a proper convex combination.
    pub integration_weight_sum: f64,
}

impl Default for OcTreeParams {
    fn default() -> Self {
        Self {
            resolution: 0.1,
            occupancy_threshold: 0.5,
            integration_weight_sum: 0.99,
        }
    }
}

impl OcTreeParams {
    pub fn with_resolution(resolution: f64) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_resolution(self.resolution)?;
        if !(self.occupancy_threshold > 0.0 && self.occupancy_threshold < 1.0) {
            return Err(OcTreeError::InvalidParameter {
                name: "occupancy_threshold",
                value: self.occupancy_threshold,
            });
        }
        if !(self.integration_weight_sum.is_finite() && self.integration_weight_sum > 0.0) {
            return Err(OcTreeError::InvalidParameter {
                name: "integration_weight_sum",
                value: self.integration_weight_sum,
            });
        }
        Ok(())
    }
}

pub(crate) fn validate_resolution(resolution: f64) -> Result<()> {
    if resolution.is_finite() && resolution > 0.0 {
        Ok(())
    } else {
        Err(OcTreeError::InvalidParameter {
            name: "resolution",
            value: resolution,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(OcTreeParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(OcTreeParams::with_resolution(0.0).validate().is_err());
        assert!(OcTreeParams::with_resolution(f64::NAN).validate().is_err());

        let params = OcTreeParams {
            occupancy_threshold: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(OcTreeError::InvalidParameter {
                name: "occupancy_threshold",
                ..
            })
        ));
    }
}
