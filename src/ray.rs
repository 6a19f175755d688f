use crate::{NodePayload, OcTreeBase, Result};

use glam::DVec3;
use log::trace;

impl<T: NodePayload> OcTreeBase<T> {
    /// Traces the straight line from `origin` to `end` through the finest cells, writing the center of every traversed
    /// cell into `ray` in order.
    ///
    /// The cell containing `origin` comes first and the cell containing `end` is never included, so a ray whose
    /// endpoints share a cell is empty. Cells are 6-connected: each step moves to the neighbor across the nearest cell
    /// boundary. The tree's contents are not consulted.
    ///
    /// Fails with [`OcTreeError::OutOfBounds`](crate::OcTreeError::OutOfBounds) if either endpoint is outside the
    /// representable range, in which case `ray` is left empty.
    pub fn compute_ray(&self, origin: DVec3, end: DVec3, ray: &mut Vec<DVec3>) -> Result<()> {
        ray.clear();
        let origin_key = self.coord_to_key(origin)?;
        let end_key = self.coord_to_key(end)?;
        if origin_key == end_key {
            return Ok(());
        }
        ray.push(self.key_to_coord(origin_key));

        let delta = end - origin;
        let length = delta.length();
        let direction = delta / length;
        let resolution = self.resolution();
        let codec = self.key_codec();

        let mut step = [0i16; 3];
        // Ray parameter at which the next boundary is crossed, per axis.
        let mut t_max = [f64::MAX; 3];
        // Ray parameter between two consecutive boundaries, per axis.
        let mut t_delta = [f64::MAX; 3];
        for axis in 0..3 {
            let d = direction[axis];
            if d > 0.0 {
                step[axis] = 1;
            } else if d < 0.0 {
                step[axis] = -1;
            } else {
                continue;
            }
            let border = codec.key_to_coord_axis(origin_key[axis])
                + step[axis] as f64 * resolution * 0.5;
            t_max[axis] = (border - origin[axis]) / d;
            t_delta[axis] = resolution / d.abs();
        }

        let mut key = origin_key;
        loop {
            let axis = nearest_boundary(&t_max);
            key[axis] = match key[axis].checked_add_signed(step[axis]) {
                Some(k) => k,
                None => break,
            };
            t_max[axis] += t_delta[axis];

            if key == end_key {
                break;
            }
            // Rounding can carry the walk past the end cell without ever entering it.
            let traveled = t_max[0].min(t_max[1]).min(t_max[2]);
            if traveled > length {
                break;
            }
            ray.push(codec.key_to_coord(key));
        }
        trace!(
            "Ray from {} to {} crosses {} cells",
            origin,
            end,
            ray.len()
        );
        Ok(())
    }
}

/// Axis with the smallest `t_max`. Ties go to the lowest axis.
fn nearest_boundary(t_max: &[f64; 3]) -> usize {
    let mut axis = 0;
    for i in 1..3 {
        if t_max[i] < t_max[axis] {
            axis = i;
        }
    }
    axis
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{OcTree, OcTreeError};
    use approx::assert_relative_eq;

    #[test]
    fn axis_aligned_ray() {
        let tree = OcTree::new(0.1);
        let mut ray = Vec::new();
        tree.compute_ray(
            DVec3::new(0.05, 0.05, 0.05),
            DVec3::new(0.55, 0.05, 0.05),
            &mut ray,
        )
        .unwrap();
        assert_eq!(ray.len(), 5);
        for (i, center) in ray.iter().enumerate() {
            assert_relative_eq!(center.x, 0.05 + 0.1 * i as f64, epsilon = 1e-9);
            assert_relative_eq!(center.y, 0.05, epsilon = 1e-9);
            assert_relative_eq!(center.z, 0.05, epsilon = 1e-9);
        }
    }

    #[test]
    fn negative_direction() {
        let tree = OcTree::new(0.1);
        let mut ray = Vec::new();
        tree.compute_ray(
            DVec3::new(0.05, 0.05, 0.05),
            DVec3::new(-0.35, 0.05, 0.05),
            &mut ray,
        )
        .unwrap();
        let xs: Vec<f64> = ray.iter().map(|c| c.x).collect();
        assert_eq!(xs.len(), 4);
        for (x, expected) in xs.iter().zip([0.05, -0.05, -0.15, -0.25]) {
            assert_relative_eq!(*x, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn diagonal_ray_is_six_connected() {
        let tree = OcTree::new(0.1);
        let origin = DVec3::new(0.01, 0.02, 0.03);
        let end = DVec3::new(1.27, -0.64, 0.47);
        let mut ray = Vec::new();
        tree.compute_ray(origin, end, &mut ray).unwrap();

        let keys: Vec<_> = ray
            .iter()
            .map(|&c| tree.coord_to_key(c).unwrap())
            .collect();
        assert_eq!(keys[0], tree.coord_to_key(origin).unwrap());
        let end_key = tree.coord_to_key(end).unwrap();
        assert!(!keys.contains(&end_key));

        for pair in keys.windows(2) {
            let steps: i32 = (0..3)
                .map(|axis| (pair[0][axis] as i32 - pair[1][axis] as i32).abs())
                .sum();
            assert_eq!(steps, 1, "{:?}", pair);
        }
        // The last cell borders the end cell.
        let last = keys[keys.len() - 1];
        let gap: i32 = (0..3)
            .map(|axis| (last[axis] as i32 - end_key[axis] as i32).abs())
            .sum();
        assert_eq!(gap, 1);
    }

    #[test]
    fn same_cell_is_empty() {
        let tree = OcTree::new(0.1);
        let mut ray = vec![DVec3::ONE];
        tree.compute_ray(DVec3::splat(0.01), DVec3::splat(0.09), &mut ray).unwrap();
        assert!(ray.is_empty());
    }

    #[test]
    fn out_of_range_endpoint_fails() {
        let tree = OcTree::new(0.1);
        let mut ray = Vec::new();
        let result = tree.compute_ray(DVec3::ZERO, DVec3::new(1e6, 0.0, 0.0), &mut ray);
        assert!(matches!(result, Err(OcTreeError::OutOfBounds { .. })));
        assert!(ray.is_empty());

        let result = tree.compute_ray(DVec3::new(1e7, 0.0, 0.0), DVec3::ZERO, &mut ray);
        assert!(matches!(result, Err(OcTreeError::OutOfBounds { .. })));
        assert!(ray.is_empty());
    }
}
