use std::fmt;
use std::io::{self, Read, Write};

/// The data stored in every node of an [`OcTreeBase`](crate::OcTreeBase).
///
/// A payload has a primary value, the occupancy log-odds, and any number of auxiliary attributes. The provided methods
/// are the hooks the tree calls when it merges or summarizes nodes; override them to give attributes their own
/// semantics.
pub trait NodePayload: Clone + Default + PartialEq + fmt::Debug {
    /// The name under which trees of this payload are persisted and registered.
    const TREE_TYPE: &'static str;

    fn value(&self) -> f32;

    fn set_value(&mut self, value: f32);

    /// Whether two sibling leaves agree closely enough to be merged into their parent.
    ///
    /// The default compares whole payloads. Narrowing this to a subset of fields makes pruning lossy for every field
    /// left out.
    fn collapses_with(&self, sibling: &Self) -> bool {
        self == sibling
    }

    /// Called on a parent whose eight leaf children are being merged into it. `children` is in octant order.
    fn collapse_from(&mut self, children: &[Self]) {
        *self = children[0].clone();
    }

    /// Recomputes the primary value of an inner node from its existing children: the maximum child log-odds.
    fn update_value_from_children(&mut self, children: &[Self]) {
        if let Some(max) = children.iter().map(Self::value).reduce(f32::max) {
            self.set_value(max);
        }
    }

    /// Recomputes auxiliary attributes of an inner node from its existing children.
    fn update_attributes_from_children(&mut self, _children: &[Self]) {}

    /// Writes the fixed-size record of this node.
    fn write_data<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()>;

    fn read_data<R: Read + ?Sized>(input: &mut R) -> io::Result<Self>;
}
