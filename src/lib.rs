//! Bounded-depth octrees for volumetric occupancy maps.
//!
//! An [`OcTreeBase`](crate::OcTreeBase) maps discretized 3D space onto a tree of fixed depth [`TREE_DEPTH`]. Coordinates
//! are converted to [`OcTreeKey`](crate::OcTreeKey)s by a [`KeyCodec`](crate::KeyCodec), and one bit of each axis key
//! selects the child octant at every depth. Each node stores a payload implementing
//! [`NodePayload`](crate::NodePayload), which carries the primary occupancy value (log-odds) and any auxiliary
//! attributes together with their collapse and aggregation rules.
//!
//! Two trees are provided out of the box:
//!
//! - [`OcTree`](crate::OcTree): plain occupancy
//! - [`ColorOcTree`](crate::ColorOcTree): occupancy plus an optional [`Color`](crate::Color) and semantic
//!   [`Label`](crate::Label) per cell
//!
//! # Performance
//!
//! Nodes live in a slab arena and are addressed by [`NodePtr`](crate::NodePtr). Recursion is bounded by the tree depth,
//! so every operation has a small, predictable stack footprint even for trees with millions of nodes.
//!
//! - search by key: O(depth)
//! - access by [`NodePtr`](crate::NodePtr): O(1)
//! - prune, expand, traversal: O(nodes)
//!
//! [`OcTreeBase::expand`](crate::OcTreeBase::expand) materializes every cell down to full depth and is very expensive on
//! sparse trees.

mod allocator;
mod attribute;
mod color;
mod config;
mod error;
mod io;
mod key;
mod node;
mod occupancy;
mod ray;
mod shape;
mod tree;

pub use attribute::*;
pub use color::*;
pub use config::*;
pub use error::*;
pub use io::*;
pub use key::*;
pub use node::*;
pub use occupancy::*;
pub use tree::*;

pub use glam;

/// A depth in the tree. The root is at depth 0 and the finest cells are at [`TREE_DEPTH`].
pub type Depth = u8;

/// A linear index of a node relative to its parent.
pub type ChildIndex = u8;

/// The maximum depth of every tree. Keys are 16 bits per axis.
pub const TREE_DEPTH: Depth = 16;

/// Half the number of cells along an axis. Key `TREE_MAX_VAL` is the first cell on the positive side of the origin.
pub const TREE_MAX_VAL: u32 = 1 << (TREE_DEPTH - 1);

use ahash::AHashMap;

type SmallKeyHashMap<K, V> = AHashMap<K, V>;
