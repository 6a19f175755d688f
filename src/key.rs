use crate::shape::{delinearize_child, linearize_child};
use crate::{ChildIndex, Depth, OcTreeError, Result, TREE_DEPTH, TREE_MAX_VAL};

use glam::DVec3;
use std::ops::{Index, IndexMut};

/// Discretized coordinates of a finest-resolution cell, one 16-bit key per axis.
///
/// A key also identifies the node at any shallower depth that contains the cell. The node at depth `d` only looks at the
/// `d` most significant bits of each axis.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct OcTreeKey(pub [u16; 3]);

impl OcTreeKey {
    #[inline]
    pub const fn new(x: u16, y: u16, z: u16) -> Self {
        Self([x, y, z])
    }

    /// The octant of the child at `depth + 1` on the path to this key, for the node at `depth`.
    ///
    /// Only defined for `depth < TREE_DEPTH`; nodes at full depth have no children.
    #[inline]
    pub fn child_index(&self, depth: Depth) -> ChildIndex {
        debug_assert!(depth < TREE_DEPTH);
        let bit = TREE_DEPTH - depth - 1;
        linearize_child(self.0.map(|k| ((k >> bit) & 1) as u32))
    }

    /// Clears the bits below `depth`, giving the minimum key of the node at `depth` that contains this key.
    #[inline]
    pub fn at_depth(&self, depth: Depth) -> Self {
        debug_assert!(depth <= TREE_DEPTH);
        let mask = (u32::MAX << (TREE_DEPTH - depth) as u32) as u16;
        Self(self.0.map(|k| k & mask))
    }

    /// The minimum key of `child` under the node at `depth` whose minimum key is `self`.
    #[inline]
    pub fn child_key(&self, depth: Depth, child: ChildIndex) -> Self {
        debug_assert!(depth < TREE_DEPTH);
        let bit = TREE_DEPTH - depth - 1;
        let offset = delinearize_child(child);
        Self::new(
            self.0[0] | ((offset[0] as u16) << bit),
            self.0[1] | ((offset[1] as u16) << bit),
            self.0[2] | ((offset[2] as u16) << bit),
        )
    }
}

impl Index<usize> for OcTreeKey {
    type Output = u16;

    #[inline]
    fn index(&self, axis: usize) -> &u16 {
        &self.0[axis]
    }
}

impl IndexMut<usize> for OcTreeKey {
    #[inline]
    fn index_mut(&mut self, axis: usize) -> &mut u16 {
        &mut self.0[axis]
    }
}

/// Converts between metric coordinates and [`OcTreeKey`]s at a fixed resolution.
///
/// The tree is centered on the origin: key [`TREE_MAX_VAL`] is the first cell on the positive side of each axis, so
/// representable coordinates lie in `[-TREE_MAX_VAL * resolution, TREE_MAX_VAL * resolution)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyCodec {
    resolution: f64,
    resolution_factor: f64,
}

impl KeyCodec {
    pub fn new(resolution: f64) -> Self {
        assert!(resolution > 0.0);
        Self {
            resolution,
            resolution_factor: 1.0 / resolution,
        }
    }

    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Metric center of the root node.
    #[inline]
    pub fn tree_center(&self) -> DVec3 {
        DVec3::ZERO
    }

    /// Edge length of a node at `depth`.
    #[inline]
    pub fn node_size(&self, depth: Depth) -> f64 {
        self.resolution * (1u32 << (TREE_DEPTH - depth)) as f64
    }

    /// Discretizes one axis. Coordinates are floored, so a cell covers `[k * r, (k + 1) * r)` relative to the origin.
    #[inline]
    pub fn coord_to_key_axis(&self, coordinate: f64) -> Result<u16> {
        let scaled = (coordinate * self.resolution_factor).floor() + TREE_MAX_VAL as f64;
        // NaN fails both comparisons.
        if scaled >= 0.0 && scaled < (2 * TREE_MAX_VAL) as f64 {
            Ok(scaled as u16)
        } else {
            Err(OcTreeError::OutOfBounds { coordinate })
        }
    }

    #[inline]
    pub fn coord_to_key(&self, point: DVec3) -> Result<OcTreeKey> {
        Ok(OcTreeKey::new(
            self.coord_to_key_axis(point.x)?,
            self.coord_to_key_axis(point.y)?,
            self.coord_to_key_axis(point.z)?,
        ))
    }

    /// Center coordinate of the finest cell with key `key` on one axis.
    #[inline]
    pub fn key_to_coord_axis(&self, key: u16) -> f64 {
        (key as f64 - TREE_MAX_VAL as f64 + 0.5) * self.resolution
    }

    #[inline]
    pub fn key_to_coord(&self, key: OcTreeKey) -> DVec3 {
        DVec3::new(
            self.key_to_coord_axis(key[0]),
            self.key_to_coord_axis(key[1]),
            self.key_to_coord_axis(key[2]),
        )
    }

    /// Center coordinate of the node at `depth` that contains `key`.
    pub fn key_to_coord_at_depth(&self, key: OcTreeKey, depth: Depth) -> DVec3 {
        if depth == TREE_DEPTH {
            return self.key_to_coord(key);
        }
        let min_key = key.at_depth(depth);
        let half_extent = (1u32 << (TREE_DEPTH - depth - 1)) as f64;
        let axis = |k: u16| (k as f64 - TREE_MAX_VAL as f64 + half_extent) * self.resolution;
        DVec3::new(axis(min_key[0]), axis(min_key[1]), axis(min_key[2]))
    }

    /// Metric minimum corner of the node at `depth` that contains `key`.
    pub fn node_min_corner(&self, key: OcTreeKey, depth: Depth) -> DVec3 {
        let min_key = key.at_depth(depth);
        let axis = |k: u16| (k as f64 - TREE_MAX_VAL as f64) * self.resolution;
        DVec3::new(axis(min_key[0]), axis(min_key[1]), axis(min_key[2]))
    }
}
