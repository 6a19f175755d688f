use crate::allocator::{AllocPtr, NodeAllocator, EMPTY_ALLOC_PTR};
use crate::config::validate_resolution;
use crate::shape::CHILDREN;
use crate::{
    ChildIndex, Depth, KeyCodec, NodePayload, OcTreeError, OcTreeKey, OcTreeParams, Result,
    TREE_DEPTH, TREE_MAX_VAL,
};

use glam::DVec3;
use log::{debug, warn};
use smallvec::SmallVec;
use std::cell::Cell;

/// Uniquely and stably identifies a node in the [`OcTreeBase`] until the node is removed by pruning or clearing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodePtr {
    pub(crate) depth: Depth,
    pub(crate) alloc_ptr: AllocPtr,
}

impl NodePtr {
    pub(crate) fn new(depth: Depth, alloc_ptr: AllocPtr) -> Self {
        Self { depth, alloc_ptr }
    }

    #[inline]
    pub fn depth(&self) -> Depth {
        self.depth
    }
}

/// A cell returned by traversal queries: its metric center and edge length.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OcTreeVolume {
    pub center: DVec3,
    pub size: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VisitCommand {
    Continue,
    SkipDescendants,
}

/// A key-addressed octree of fixed depth [`TREE_DEPTH`] storing a [`NodePayload`] in every node.
///
/// Nodes are created on demand along the key path of every written cell. A node either has no children (a leaf) or
/// owns up to eight, and after [`prune`](Self::prune) every inner node has all eight. Leaves above full depth stand
/// for all of the cells they cover.
#[derive(Clone, Debug)]
pub struct OcTreeBase<T> {
    root: AllocPtr,
    allocator: NodeAllocator<T>,
    codec: KeyCodec,
    params: OcTreeParams,
    /// Number of nodes, maintained by every mutation.
    tree_size: usize,
    /// Metric min and max of all leaves. `None` after any size change.
    bounds: Cell<Option<(DVec3, DVec3)>>,
}

impl<T: NodePayload> OcTreeBase<T> {
    /// An empty tree with default parameters at `resolution`.
    ///
    /// # Panics
    ///
    /// If `resolution` is not a finite positive number.
    pub fn new(resolution: f64) -> Self {
        assert!(
            validate_resolution(resolution).is_ok(),
            "invalid resolution {}",
            resolution
        );
        Self::from_valid_params(OcTreeParams::with_resolution(resolution))
    }

    pub fn with_params(params: OcTreeParams) -> Result<Self> {
        params.validate()?;
        Ok(Self::from_valid_params(params))
    }

    fn from_valid_params(params: OcTreeParams) -> Self {
        debug!("Creating {} with resolution {}", T::TREE_TYPE, params.resolution);
        Self {
            root: EMPTY_ALLOC_PTR,
            allocator: NodeAllocator::default(),
            codec: KeyCodec::new(params.resolution),
            params,
            tree_size: 0,
            bounds: Cell::new(None),
        }
    }

    #[inline]
    pub fn tree_type(&self) -> &'static str {
        T::TREE_TYPE
    }

    /// The number of nodes in the tree, inner nodes included.
    #[inline]
    pub fn size(&self) -> usize {
        self.tree_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root == EMPTY_ALLOC_PTR
    }

    #[inline]
    pub fn tree_depth(&self) -> Depth {
        TREE_DEPTH
    }

    #[inline]
    pub fn resolution(&self) -> f64 {
        self.codec.resolution()
    }

    #[inline]
    pub fn params(&self) -> &OcTreeParams {
        &self.params
    }

    #[inline]
    pub fn key_codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Changes the discretization. Only allowed while the tree is empty, since existing keys would change meaning.
    pub fn set_resolution(&mut self, resolution: f64) -> Result<()> {
        if !self.is_empty() {
            warn!(
                "Refusing to change resolution of a {} with {} nodes",
                T::TREE_TYPE,
                self.tree_size
            );
            return Err(OcTreeError::NonEmptyTree);
        }
        validate_resolution(resolution)?;
        debug!("Resolution changed to {}", resolution);
        self.codec = KeyCodec::new(resolution);
        self.params.resolution = resolution;
        self.bounds.set(None);
        Ok(())
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.allocator.clear();
        self.root = EMPTY_ALLOC_PTR;
        self.tree_size = 0;
        self.bounds.set(None);
    }

    #[inline]
    pub fn coord_to_key(&self, coordinate: DVec3) -> Result<OcTreeKey> {
        self.codec.coord_to_key(coordinate)
    }

    #[inline]
    pub fn key_to_coord(&self, key: OcTreeKey) -> DVec3 {
        self.codec.key_to_coord(key)
    }

    /// Like [`coord_to_key`](Self::coord_to_key), for APIs that report out-of-range coordinates as a miss.
    pub(crate) fn key_for_coord(&self, coordinate: DVec3) -> Option<OcTreeKey> {
        match self.codec.coord_to_key(coordinate) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Ignoring {}: {}", coordinate, e);
                None
            }
        }
    }

    #[inline]
    pub fn root(&self) -> Option<NodePtr> {
        (!self.is_empty()).then(|| NodePtr::new(0, self.root))
    }

    #[inline]
    pub fn get_value(&self, ptr: NodePtr) -> Option<&T> {
        self.allocator.get_value(ptr.alloc_ptr)
    }

    #[inline]
    pub fn get_value_mut(&mut self, ptr: NodePtr) -> Option<&mut T> {
        self.allocator.get_value_mut(ptr.alloc_ptr)
    }

    /// True iff the node at `ptr` has at least one child.
    #[inline]
    pub fn has_children(&self, ptr: NodePtr) -> bool {
        self.allocator.has_children(ptr.alloc_ptr)
    }

    /// Returns the child of `parent_ptr` in octant `child_index`, if it exists.
    #[inline]
    pub fn child(&self, parent_ptr: NodePtr, child_index: ChildIndex) -> Option<NodePtr> {
        let children = self.allocator.get_children(parent_ptr.alloc_ptr)?;
        let child_ptr = children[child_index as usize];
        (child_ptr != EMPTY_ALLOC_PTR).then(|| NodePtr::new(parent_ptr.depth + 1, child_ptr))
    }

    /// Finds the node covering `key`: either the cell at full depth or a pruned leaf above it.
    ///
    /// Returns `None` for an empty tree or when the path ends at an inner node that lacks the required child, i.e.
    /// the cell has never been written.
    pub fn search(&self, key: OcTreeKey) -> Option<NodePtr> {
        if self.is_empty() {
            return None;
        }
        let mut ptr = self.root;
        for depth in 0..TREE_DEPTH {
            let children = match self.allocator.get_children(ptr) {
                Some(children) => children,
                None => return Some(NodePtr::new(depth, ptr)),
            };
            let child_ptr = children[key.child_index(depth) as usize];
            if child_ptr != EMPTY_ALLOC_PTR {
                ptr = child_ptr;
            } else if self.allocator.has_children(ptr) {
                return None;
            } else {
                return Some(NodePtr::new(depth, ptr));
            }
        }
        Some(NodePtr::new(TREE_DEPTH, ptr))
    }

    /// [`search`](Self::search) by coordinate. Out-of-range coordinates are a miss.
    pub fn search_at(&self, coordinate: DVec3) -> Option<NodePtr> {
        self.key_for_coord(coordinate).and_then(|key| self.search(key))
    }

    /// Calls `updater` on the finest cell at `key`, creating every missing node on the path first.
    ///
    /// A pruned leaf met on the way is expanded into eight copies of itself before descending, so the cells it stood
    /// for keep their value. Afterwards the primary value of every ancestor is refreshed from its children.
    pub fn update_node(&mut self, key: OcTreeKey, updater: impl FnOnce(&mut T)) -> NodePtr {
        let mut just_created = false;
        if self.is_empty() {
            self.root = self.allocator.insert_leaf(T::default());
            self.tree_size += 1;
            just_created = true;
        }

        let mut path = SmallVec::<[AllocPtr; TREE_DEPTH as usize]>::new();
        let mut ptr = self.root;
        for depth in 0..TREE_DEPTH {
            path.push(ptr);
            let child_index = key.child_index(depth);
            let existing = self
                .allocator
                .get_children(ptr)
                .map(|children| children[child_index as usize])
                .filter(|&child_ptr| child_ptr != EMPTY_ALLOC_PTR);
            ptr = if let Some(child_ptr) = existing {
                just_created = false;
                child_ptr
            } else if !just_created && !self.allocator.has_children(ptr) {
                self.expand_node(ptr);
                just_created = false;
                self.allocator.get_or_insert_children(ptr)[child_index as usize]
            } else {
                let child_ptr = self.allocator.insert_leaf(T::default());
                self.allocator.set_child_pointer(ptr, child_index, child_ptr);
                self.tree_size += 1;
                just_created = true;
                child_ptr
            };
        }

        if let Some(value) = self.allocator.get_value_mut(ptr) {
            updater(value);
        }
        for &ancestor in path.iter().rev() {
            self.refresh_from_children(ancestor, false);
        }
        self.bounds.set(None);
        NodePtr::new(TREE_DEPTH, ptr)
    }

    /// Whether the children of `ptr` can be merged into it: all eight exist, none has children, and they all agree
    /// under [`NodePayload::collapses_with`].
    pub fn is_node_collapsible(&self, ptr: NodePtr) -> bool {
        self.is_collapsible(ptr.alloc_ptr)
    }

    fn is_collapsible(&self, ptr: AllocPtr) -> bool {
        let children = match self.allocator.get_children(ptr) {
            Some(children) => children,
            None => return false,
        };
        let first_ptr = children[0];
        if first_ptr == EMPTY_ALLOC_PTR || self.allocator.has_children(first_ptr) {
            return false;
        }
        let first = match self.allocator.get_value(first_ptr) {
            Some(first) => first,
            None => return false,
        };
        children[1..].iter().all(|&child_ptr| {
            child_ptr != EMPTY_ALLOC_PTR
                && !self.allocator.has_children(child_ptr)
                && self
                    .allocator
                    .get_value(child_ptr)
                    .map_or(false, |child| first.collapses_with(child))
        })
    }

    /// Lossless compression (up to the fields [`NodePayload::collapses_with`] ignores): bottom-up, every node whose
    /// children are collapsible absorbs them and becomes a leaf.
    pub fn prune(&mut self) {
        if self.is_empty() {
            return;
        }
        let num_pruned = self.prune_recurs(self.root);
        if num_pruned > 0 {
            self.bounds.set(None);
        }
        debug!("Pruned {} nodes, {} remaining", num_pruned * CHILDREN, self.tree_size);
    }

    fn prune_recurs(&mut self, ptr: AllocPtr) -> usize {
        let children = match self.allocator.get_children(ptr) {
            Some(children) => *children,
            None => return 0,
        };
        let mut num_pruned = 0;
        for child_ptr in children {
            if child_ptr != EMPTY_ALLOC_PTR {
                num_pruned += self.prune_recurs(child_ptr);
            }
        }
        if self.prune_node(ptr) {
            num_pruned += 1;
        }
        num_pruned
    }

    fn prune_node(&mut self, ptr: AllocPtr) -> bool {
        if !self.is_collapsible(ptr) {
            return false;
        }
        let children = match self.allocator.take_children(ptr) {
            Some(children) => children,
            None => return false,
        };
        let values: SmallVec<[T; CHILDREN]> = children
            .iter()
            .filter_map(|&child_ptr| self.allocator.remove(child_ptr))
            .map(|(value, _)| value)
            .collect();
        debug_assert_eq!(values.len(), CHILDREN);
        self.tree_size -= values.len();
        if let Some(node) = self.allocator.get_value_mut(ptr) {
            node.collapse_from(&values);
        }
        true
    }

    /// Inverse of [`prune`](Self::prune): every leaf above full depth gets eight copies of itself, recursively, until
    /// all leaves are at full depth.
    ///
    /// This creates up to 8<sup>16</sup> nodes per pruned leaf and is very expensive on sparse trees.
    pub fn expand(&mut self) {
        if self.is_empty() {
            return;
        }
        let num_expanded = self.expand_recurs(self.root, 0);
        if num_expanded > 0 {
            self.bounds.set(None);
        }
        debug!("Expanded {} nodes, {} total", num_expanded, self.tree_size);
    }

    fn expand_recurs(&mut self, ptr: AllocPtr, depth: Depth) -> usize {
        if depth >= TREE_DEPTH {
            return 0;
        }
        let mut num_expanded = 0;
        if !self.allocator.has_children(ptr) {
            self.expand_node(ptr);
            num_expanded += CHILDREN;
        }
        let children = match self.allocator.get_children(ptr) {
            Some(children) => *children,
            None => return num_expanded,
        };
        for child_ptr in children {
            if child_ptr != EMPTY_ALLOC_PTR {
                num_expanded += self.expand_recurs(child_ptr, depth + 1);
            }
        }
        num_expanded
    }

    /// Gives the leaf at `ptr` eight children holding copies of its payload.
    fn expand_node(&mut self, ptr: AllocPtr) {
        debug_assert!(!self.allocator.has_children(ptr));
        let value = match self.allocator.get_value(ptr) {
            Some(value) => value.clone(),
            None => return,
        };
        for child_index in 0..CHILDREN as ChildIndex {
            let child_ptr = self.allocator.insert_leaf(value.clone());
            self.allocator.set_child_pointer(ptr, child_index, child_ptr);
        }
        self.tree_size += CHILDREN;
    }

    /// Bottom-up over all inner nodes: recomputes the primary value and the auxiliary attributes from the children.
    pub fn update_inner_occupancy(&mut self) {
        if !self.is_empty() {
            self.update_inner_occupancy_recurs(self.root, 0);
        }
    }

    fn update_inner_occupancy_recurs(&mut self, ptr: AllocPtr, depth: Depth) {
        let children = match self.allocator.get_children(ptr) {
            Some(children) => *children,
            None => return,
        };
        if depth < TREE_DEPTH {
            for child_ptr in children {
                if child_ptr != EMPTY_ALLOC_PTR {
                    self.update_inner_occupancy_recurs(child_ptr, depth + 1);
                }
            }
        }
        self.refresh_from_children(ptr, true);
    }

    fn refresh_from_children(&mut self, ptr: AllocPtr, with_attributes: bool) {
        let children = match self.allocator.get_children(ptr) {
            Some(children) => children,
            None => return,
        };
        let values: SmallVec<[T; CHILDREN]> = children
            .iter()
            .filter(|&&child_ptr| child_ptr != EMPTY_ALLOC_PTR)
            .filter_map(|&child_ptr| self.allocator.get_value(child_ptr).cloned())
            .collect();
        if values.is_empty() {
            return;
        }
        if let Some(node) = self.allocator.get_value_mut(ptr) {
            node.update_value_from_children(&values);
            if with_attributes {
                node.update_attributes_from_children(&values);
            }
        }
    }

    /// Visit all nodes in depth-first pre-order, children in octant order. The visitor receives the minimum key of
    /// every node.
    ///
    /// If `visitor` returns [`VisitCommand::SkipDescendants`], descendants of that node will not be visited.
    pub fn visit_tree_depth_first(
        &self,
        mut visitor: impl FnMut(NodePtr, OcTreeKey) -> VisitCommand,
    ) {
        if self.is_empty() {
            return;
        }
        let mut stack = SmallVec::<[(NodePtr, OcTreeKey); 32]>::new();
        stack.push((NodePtr::new(0, self.root), OcTreeKey::default()));
        while let Some((ptr, key)) = stack.pop() {
            if visitor(ptr, key) == VisitCommand::SkipDescendants {
                continue;
            }
            if let Some(children) = self.allocator.get_children(ptr.alloc_ptr) {
                for (child_index, &child_ptr) in children.iter().enumerate().rev() {
                    if child_ptr != EMPTY_ALLOC_PTR {
                        stack.push((
                            NodePtr::new(ptr.depth + 1, child_ptr),
                            key.child_key(ptr.depth, child_index as ChildIndex),
                        ));
                    }
                }
            }
        }
    }

    fn volume(&self, key: OcTreeKey, depth: Depth) -> OcTreeVolume {
        OcTreeVolume {
            center: self.codec.key_to_coord_at_depth(key, depth),
            size: self.codec.node_size(depth),
        }
    }

    /// Collects the leaves of the tree, treating nodes at `max_depth` as leaves. A `max_depth` of 0 means no limit.
    pub fn leaf_nodes(&self, max_depth: Depth) -> Vec<OcTreeVolume> {
        let max_depth = effective_max_depth(max_depth);
        let mut nodes = Vec::new();
        self.visit_tree_depth_first(|ptr, key| {
            if ptr.depth < max_depth && self.has_children(ptr) {
                VisitCommand::Continue
            } else {
                nodes.push(self.volume(key, ptr.depth));
                VisitCommand::SkipDescendants
            }
        });
        nodes
    }

    /// Collects every node down to `max_depth`, inner nodes included. A `max_depth` of 0 means no limit.
    pub fn voxels(&self, max_depth: Depth) -> Vec<OcTreeVolume> {
        let max_depth = effective_max_depth(max_depth);
        let mut voxels = Vec::new();
        self.visit_tree_depth_first(|ptr, key| {
            voxels.push(self.volume(key, ptr.depth));
            if ptr.depth < max_depth {
                VisitCommand::Continue
            } else {
                VisitCommand::SkipDescendants
            }
        });
        voxels
    }

    /// Counts the nodes by traversal, independent of [`size`](Self::size).
    pub fn calc_num_nodes(&self) -> usize {
        let mut num_nodes = 0;
        self.visit_tree_depth_first(|_, _| {
            num_nodes += 1;
            VisitCommand::Continue
        });
        num_nodes
    }

    /// Metric minimum corner of the bounding box of all leaves. Zero for an empty tree.
    pub fn metric_min(&self) -> DVec3 {
        self.metric_bounds().0
    }

    /// Metric maximum corner of the bounding box of all leaves. Zero for an empty tree.
    pub fn metric_max(&self) -> DVec3 {
        self.metric_bounds().1
    }

    pub fn metric_size(&self) -> DVec3 {
        let (min, max) = self.metric_bounds();
        max - min
    }

    fn metric_bounds(&self) -> (DVec3, DVec3) {
        if let Some(bounds) = self.bounds.get() {
            return bounds;
        }
        let bounds = self.calc_min_max();
        self.bounds.set(Some(bounds));
        bounds
    }

    /// Bounds in key space first, so the per-leaf work is integer only.
    fn calc_min_max(&self) -> (DVec3, DVec3) {
        let mut min_key = [u32::MAX; 3];
        let mut max_key = [0u32; 3];
        let mut any_leaf = false;
        self.visit_tree_depth_first(|ptr, key| {
            if self.has_children(ptr) {
                return VisitCommand::Continue;
            }
            any_leaf = true;
            let extent = 1u32 << (TREE_DEPTH - ptr.depth);
            for axis in 0..3 {
                let lower = key[axis] as u32;
                min_key[axis] = min_key[axis].min(lower);
                max_key[axis] = max_key[axis].max(lower + extent);
            }
            VisitCommand::SkipDescendants
        });
        if !any_leaf {
            return (DVec3::ZERO, DVec3::ZERO);
        }
        let resolution = self.resolution();
        let to_metric = |k: [u32; 3]| {
            (DVec3::new(k[0] as f64, k[1] as f64, k[2] as f64) - DVec3::splat(TREE_MAX_VAL as f64))
                * resolution
        };
        (to_metric(min_key), to_metric(max_key))
    }

    /// Bytes a dense grid covering the bounding box would need for the same payloads, for comparison.
    pub fn memory_full_grid(&self) -> u64 {
        let cells = (self.metric_size() / self.resolution()).ceil();
        (cells.x * cells.y * cells.z) as u64 * std::mem::size_of::<T>() as u64
    }

    pub(crate) fn allocator(&self) -> &NodeAllocator<T> {
        &self.allocator
    }

    pub(crate) fn allocator_mut(&mut self) -> &mut NodeAllocator<T> {
        &mut self.allocator
    }

    /// Installs a freshly read tree. `size` must be the number of nodes reachable from `root`.
    pub(crate) fn set_root(&mut self, root: AllocPtr, size: usize) {
        self.root = root;
        self.tree_size = size;
        self.bounds.set(None);
    }

    pub(crate) fn reset_resolution(&mut self, resolution: f64) {
        self.codec = KeyCodec::new(resolution);
        self.params.resolution = resolution;
    }
}

fn effective_max_depth(max_depth: Depth) -> Depth {
    if max_depth == 0 {
        TREE_DEPTH
    } else {
        max_depth.min(TREE_DEPTH)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
