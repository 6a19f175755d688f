use crate::{NodePayload, NodePtr, OcTreeBase, OcTreeKey, Result};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::DVec3;
use std::io::{self, Read, Write};

/// Occupancy probability of a log-odds value.
#[inline]
pub fn probability(log_odds: f32) -> f64 {
    1.0 - 1.0 / (1.0 + (log_odds as f64).exp())
}

/// Log-odds of an occupancy probability.
#[inline]
pub fn logodds(probability: f64) -> f32 {
    (probability / (1.0 - probability)).ln() as f32
}

/// A node that only stores occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OccupancyNode {
    pub log_odds: f32,
}

impl OccupancyNode {
    pub const fn new(log_odds: f32) -> Self {
        Self { log_odds }
    }
}

impl NodePayload for OccupancyNode {
    const TREE_TYPE: &'static str = "OcTree";

    #[inline]
    fn value(&self) -> f32 {
        self.log_odds
    }

    #[inline]
    fn set_value(&mut self, value: f32) {
        self.log_odds = value;
    }

    fn write_data<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_f32::<LittleEndian>(self.log_odds)
    }

    fn read_data<R: Read + ?Sized>(input: &mut R) -> io::Result<Self> {
        Ok(Self::new(input.read_f32::<LittleEndian>()?))
    }
}

/// The plain occupancy octree.
pub type OcTree = OcTreeBase<OccupancyNode>;

impl<T: NodePayload> OcTreeBase<T> {
    /// Occupancy probability of `node`.
    #[inline]
    pub fn occupancy(&self, node: &T) -> f64 {
        probability(node.value())
    }

    #[inline]
    pub fn is_node_occupied(&self, node: &T) -> bool {
        self.occupancy(node) >= self.params().occupancy_threshold
    }

    /// Sets the log-odds of the finest cell at `key`, creating the path to it if necessary.
    pub fn set_node_value(&mut self, key: OcTreeKey, log_odds: f32) -> NodePtr {
        self.update_node(key, |node| node.set_value(log_odds))
    }

    pub fn set_node_value_at(&mut self, coordinate: DVec3, log_odds: f32) -> Result<NodePtr> {
        let key = self.coord_to_key(coordinate)?;
        Ok(self.set_node_value(key, log_odds))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn log_odds_conversion() {
        assert_relative_eq!(probability(0.0), 0.5);
        assert_relative_eq!(probability(logodds(0.7)), 0.7, epsilon = 1e-6);
        assert!(logodds(0.2) < 0.0);
    }

    #[test]
    fn occupied_against_threshold() {
        let mut tree = OcTree::new(0.1);
        let key = tree.coord_to_key(DVec3::new(1.0, 1.0, 1.0)).unwrap();
        let ptr = tree.set_node_value(key, logodds(0.7));
        assert!(tree.is_node_occupied(tree.get_value(ptr).unwrap()));

        let ptr = tree.set_node_value(key, logodds(0.3));
        assert!(!tree.is_node_occupied(tree.get_value(ptr).unwrap()));
    }

    #[test]
    fn inner_nodes_take_max_child() {
        let mut tree = OcTree::new(0.1);
        tree.set_node_value_at(DVec3::new(0.05, 0.05, 0.05), 1.0).unwrap();
        tree.set_node_value_at(DVec3::new(0.15, 0.05, 0.05), 2.0).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.get_value(root).unwrap().log_odds, 2.0);

        assert!(tree
            .set_node_value_at(DVec3::new(1e6, 0.0, 0.0), 1.0)
            .is_err());
    }
}
