use crate::shape::CHILDREN;
use crate::ChildIndex;

use slab::Slab;

/// Allocates nodes and their child pointer blocks.
///
/// Every node has a value. A node only owns a pointer block while it has (or is about to get) children; leaves carry
/// [`EMPTY_ALLOC_PTR`] instead, so releasing the children of a collapsed node also releases its block.
#[derive(Clone, Debug)]
pub struct NodeAllocator<T> {
    /// One entry per node.
    nodes: Slab<NodeEntry<T>>,
    /// A slab of pointer blocks, only for branches.
    pointers: Slab<[AllocPtr; CHILDREN]>,
}

#[derive(Clone, Debug)]
struct NodeEntry<T> {
    value: T,
    children: AllocPtr,
}

/// Points to a node owned by an internal allocator.
pub type AllocPtr = u32;

/// An [`AllocPtr`] that doesn't point to anything.
pub const EMPTY_ALLOC_PTR: AllocPtr = AllocPtr::MAX;

impl<T> Default for NodeAllocator<T> {
    fn default() -> Self {
        Self {
            nodes: Default::default(),
            pointers: Default::default(),
        }
    }
}

impl<T> NodeAllocator<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.pointers.clear();
    }

    #[inline]
    pub fn insert_leaf(&mut self, value: T) -> AllocPtr {
        self.nodes.insert(NodeEntry {
            value,
            children: EMPTY_ALLOC_PTR,
        }) as AllocPtr
    }

    /// Removes the node at `ptr` along with its pointer block. Descendants are not touched.
    #[inline]
    pub fn remove(&mut self, ptr: AllocPtr) -> Option<(T, Option<[AllocPtr; CHILDREN]>)> {
        let entry = self.nodes.try_remove(ptr as usize)?;
        let children = if entry.children == EMPTY_ALLOC_PTR {
            None
        } else {
            self.pointers.try_remove(entry.children as usize)
        };
        Some((entry.value, children))
    }

    #[inline]
    pub fn get_value(&self, ptr: AllocPtr) -> Option<&T> {
        self.nodes.get(ptr as usize).map(|entry| &entry.value)
    }

    #[inline]
    pub fn get_value_mut(&mut self, ptr: AllocPtr) -> Option<&mut T> {
        self.nodes.get_mut(ptr as usize).map(|entry| &mut entry.value)
    }

    #[inline]
    pub fn get_children(&self, ptr: AllocPtr) -> Option<&[AllocPtr; CHILDREN]> {
        let entry = self.nodes.get(ptr as usize)?;
        if entry.children == EMPTY_ALLOC_PTR {
            None
        } else {
            self.pointers.get(entry.children as usize)
        }
    }

    /// Returns the pointer block of `ptr`, allocating an empty one if the node is a leaf.
    #[inline]
    pub fn get_or_insert_children(&mut self, ptr: AllocPtr) -> &mut [AllocPtr; CHILDREN] {
        let Self { nodes, pointers } = self;
        let entry = nodes
            .get_mut(ptr as usize)
            .unwrap_or_else(|| panic!("Tried inserting children of missing node {:?}", ptr));
        if entry.children == EMPTY_ALLOC_PTR {
            entry.children = pointers.insert([EMPTY_ALLOC_PTR; CHILDREN]) as AllocPtr;
        }
        &mut pointers[entry.children as usize]
    }

    /// Detaches and frees the pointer block of `ptr`, returning it. The children themselves stay allocated.
    #[inline]
    pub fn take_children(&mut self, ptr: AllocPtr) -> Option<[AllocPtr; CHILDREN]> {
        let entry = self.nodes.get_mut(ptr as usize)?;
        if entry.children == EMPTY_ALLOC_PTR {
            return None;
        }
        let block = std::mem::replace(&mut entry.children, EMPTY_ALLOC_PTR);
        self.pointers.try_remove(block as usize)
    }

    /// True iff the node has a pointer block with at least one child.
    #[inline]
    pub fn has_children(&self, ptr: AllocPtr) -> bool {
        self.get_children(ptr)
            .map_or(false, |children| children.iter().any(|&c| c != EMPTY_ALLOC_PTR))
    }

    #[inline]
    pub fn set_child_pointer(
        &mut self,
        parent_ptr: AllocPtr,
        child_index: ChildIndex,
        child_ptr: AllocPtr,
    ) {
        self.get_or_insert_children(parent_ptr)[child_index as usize] = child_ptr;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn children_blocks_follow_nodes() {
        let mut alloc = NodeAllocator::default();
        let parent = alloc.insert_leaf("parent");
        assert!(alloc.get_children(parent).is_none());
        assert!(!alloc.has_children(parent));

        let child = alloc.insert_leaf("child");
        alloc.set_child_pointer(parent, 3, child);
        assert!(alloc.has_children(parent));
        assert_eq!(alloc.get_children(parent).unwrap()[3], child);

        let block = alloc.take_children(parent).unwrap();
        assert_eq!(block[3], child);
        assert!(alloc.get_children(parent).is_none());
        assert_eq!(alloc.get_value(child), Some(&"child"));

        assert_eq!(alloc.remove(child), Some(("child", None)));
        assert!(alloc.get_value(child).is_none());
        assert_eq!(alloc.len(), 1);
    }
}
