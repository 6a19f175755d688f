use crate::allocator::{AllocPtr, EMPTY_ALLOC_PTR};
use crate::config::validate_resolution;
use crate::shape::CHILDREN;
use crate::{
    ChildIndex, ColorOccupancyNode, Depth, NodePayload, OcTreeBase, OcTreeError, OcTreeParams,
    OccupancyNode, Result, SmallKeyHashMap, TREE_DEPTH,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::any::Any;
use std::fmt;
use std::io::{Read, Write};

/// First bytes of every serialized tree.
pub const MAGIC: [u8; 4] = *b"OCTR";

/// Version of the node stream layout that follows the header.
pub const FORMAT_VERSION: u8 = 1;

/// Everything needed to pick a tree type and allocate it before reading its nodes.
///
/// Layout, little-endian: [`MAGIC`], [`FORMAT_VERSION`] (u8), type name length (u8), type name (UTF-8), resolution
/// (f64), node count (u64).
#[derive(Clone, Debug, PartialEq)]
pub struct TreeHeader {
    pub tree_type: String,
    pub resolution: f64,
    pub num_nodes: u64,
}

impl TreeHeader {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        let name = self.tree_type.as_bytes();
        let name_len = u8::try_from(name.len()).map_err(|_| OcTreeError::InvalidTypeName)?;
        out.write_all(&MAGIC)?;
        out.write_u8(FORMAT_VERSION)?;
        out.write_u8(name_len)?;
        out.write_all(name)?;
        out.write_f64::<LittleEndian>(self.resolution)?;
        out.write_u64::<LittleEndian>(self.num_nodes)?;
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        let mut magic = [0; 4];
        input.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(OcTreeError::BadMagic);
        }
        let version = input.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(OcTreeError::UnsupportedVersion(version));
        }
        let name_len = input.read_u8()?;
        let mut name = vec![0; name_len as usize];
        input.read_exact(&mut name)?;
        let tree_type = String::from_utf8(name).map_err(|_| OcTreeError::InvalidTypeName)?;
        let resolution = input.read_f64::<LittleEndian>()?;
        validate_resolution(resolution)?;
        let num_nodes = input.read_u64::<LittleEndian>()?;
        Ok(Self {
            tree_type,
            resolution,
            num_nodes,
        })
    }
}

impl<T: NodePayload> OcTreeBase<T> {
    /// Prunes the tree, then writes it. See [`write_const`](Self::write_const).
    pub fn write<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<()> {
        self.prune();
        self.write_const(out)
    }

    /// Writes a [`TreeHeader`] followed by every node in depth-first pre-order. Each node is its payload record and a
    /// mask with bit `i` set iff child `i` exists.
    pub fn write_const<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        let header = TreeHeader {
            tree_type: T::TREE_TYPE.to_owned(),
            resolution: self.resolution(),
            num_nodes: self.size() as u64,
        };
        header.write_to(out)?;
        if let Some(root) = self.root() {
            self.write_node(root.alloc_ptr, out)?;
        }
        debug!("Wrote {} with {} nodes", T::TREE_TYPE, header.num_nodes);
        Ok(())
    }

    fn write_node<W: Write + ?Sized>(&self, ptr: AllocPtr, out: &mut W) -> Result<()> {
        let value = self
            .allocator()
            .get_value(ptr)
            .unwrap_or_else(|| panic!("Dangling node pointer {}", ptr));
        value.write_data(out)?;

        let children = self
            .allocator()
            .get_children(ptr)
            .copied()
            .unwrap_or([EMPTY_ALLOC_PTR; CHILDREN]);
        let mut mask = 0u8;
        for (child_index, &child_ptr) in children.iter().enumerate() {
            if child_ptr != EMPTY_ALLOC_PTR {
                mask |= 1 << child_index;
            }
        }
        out.write_u8(mask)?;

        for child_ptr in children {
            if child_ptr != EMPTY_ALLOC_PTR {
                self.write_node(child_ptr, out)?;
            }
        }
        Ok(())
    }

    /// Reads a tree written by [`write`](Self::write). The stream must hold a tree of this payload type.
    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        let header = TreeHeader::read_from(input)?;
        if header.tree_type != T::TREE_TYPE {
            return Err(OcTreeError::TreeTypeMismatch {
                expected: T::TREE_TYPE,
                found: header.tree_type,
            });
        }
        let mut tree = Self::with_params(OcTreeParams::with_resolution(header.resolution))?;
        tree.read_body(&header, input)?;
        Ok(tree)
    }

    /// Replaces the contents of this tree with the nodes following `header`. The tree is left empty on failure.
    pub(crate) fn read_body<R: Read + ?Sized>(
        &mut self,
        header: &TreeHeader,
        input: &mut R,
    ) -> Result<()> {
        self.clear();
        self.reset_resolution(header.resolution);
        if header.num_nodes == 0 {
            debug!("Read empty {}", header.tree_type);
            return Ok(());
        }

        let mut num_read = 0;
        let result = self
            .read_node(input, 0, &mut num_read, header.num_nodes)
            .and_then(|root| {
                if num_read as u64 == header.num_nodes {
                    Ok(root)
                } else {
                    Err(OcTreeError::MalformedStream(
                        "fewer nodes than the header announced",
                    ))
                }
            });
        match result {
            Ok(root) => {
                debug_assert_eq!(self.allocator().len(), num_read);
                self.set_root(root, num_read);
                debug!("Read {} with {} nodes", header.tree_type, num_read);
                Ok(())
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn read_node<R: Read + ?Sized>(
        &mut self,
        input: &mut R,
        depth: Depth,
        num_read: &mut usize,
        num_nodes: u64,
    ) -> Result<AllocPtr> {
        if *num_read as u64 >= num_nodes {
            return Err(OcTreeError::MalformedStream(
                "more nodes than the header announced",
            ));
        }
        let value = T::read_data(input)?;
        let mask = input.read_u8()?;
        let ptr = self.allocator_mut().insert_leaf(value);
        *num_read += 1;

        if mask == 0 {
            return Ok(ptr);
        }
        if depth >= TREE_DEPTH {
            return Err(OcTreeError::MalformedStream(
                "node below the maximum depth",
            ));
        }
        for child_index in 0..CHILDREN as ChildIndex {
            if mask & (1 << child_index) != 0 {
                let child_ptr = self.read_node(input, depth + 1, num_read, num_nodes)?;
                self.allocator_mut().set_child_pointer(ptr, child_index, child_ptr);
            }
        }
        Ok(ptr)
    }
}

/// The type-erased interface shared by every [`OcTreeBase`], so trees of any registered payload can be read from a
/// stream and handled uniformly.
pub trait AbstractOcTree: Any + fmt::Debug {
    fn tree_type(&self) -> &'static str;

    fn resolution(&self) -> f64;

    fn size(&self) -> usize;

    fn calc_num_nodes(&self) -> usize;

    fn prune(&mut self);

    /// Prunes the tree, then writes it with its header.
    fn write_to(&mut self, out: &mut dyn Write) -> Result<()>;

    /// Replaces the contents with the nodes following an already consumed `header`.
    fn read_body_from(&mut self, header: &TreeHeader, input: &mut dyn Read) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn AbstractOcTree {
    /// The concrete tree, if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

impl<T: NodePayload + 'static> AbstractOcTree for OcTreeBase<T> {
    fn tree_type(&self) -> &'static str {
        T::TREE_TYPE
    }

    fn resolution(&self) -> f64 {
        OcTreeBase::resolution(self)
    }

    fn size(&self) -> usize {
        OcTreeBase::size(self)
    }

    fn calc_num_nodes(&self) -> usize {
        OcTreeBase::calc_num_nodes(self)
    }

    fn prune(&mut self) {
        OcTreeBase::prune(self)
    }

    fn write_to(&mut self, out: &mut dyn Write) -> Result<()> {
        self.write(out)
    }

    fn read_body_from(&mut self, header: &TreeHeader, input: &mut dyn Read) -> Result<()> {
        if header.tree_type != T::TREE_TYPE {
            return Err(OcTreeError::TreeTypeMismatch {
                expected: T::TREE_TYPE,
                found: header.tree_type.clone(),
            });
        }
        self.read_body(header, input)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Creates an empty tree at a (valid) resolution.
pub type TreeConstructor = fn(f64) -> Box<dyn AbstractOcTree>;

fn construct<T: NodePayload + 'static>(resolution: f64) -> Box<dyn AbstractOcTree> {
    Box::new(OcTreeBase::<T>::new(resolution))
}

/// Maps tree type names to constructors, so a stream can be read without knowing its payload type in advance.
#[derive(Clone, Debug, Default)]
pub struct TreeRegistry {
    constructors: SmallKeyHashMap<String, TreeConstructor>,
}

impl TreeRegistry {
    /// A registry that knows no tree types.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with [`OcTree`](crate::OcTree) and [`ColorOcTree`](crate::ColorOcTree).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<OccupancyNode>();
        registry.register::<ColorOccupancyNode>();
        registry
    }

    /// Registers `OcTreeBase<T>` under [`NodePayload::TREE_TYPE`].
    pub fn register<T: NodePayload + 'static>(&mut self) {
        self.register_constructor(T::TREE_TYPE, construct::<T>);
    }

    /// Returns the constructor previously registered under `tree_type`, if any.
    pub fn register_constructor(
        &mut self,
        tree_type: impl Into<String>,
        constructor: TreeConstructor,
    ) -> Option<TreeConstructor> {
        let tree_type = tree_type.into();
        debug!("Registering tree type {}", tree_type);
        self.constructors.insert(tree_type, constructor)
    }

    #[inline]
    pub fn contains(&self, tree_type: &str) -> bool {
        self.constructors.contains_key(tree_type)
    }

    pub fn create(&self, tree_type: &str, resolution: f64) -> Result<Box<dyn AbstractOcTree>> {
        validate_resolution(resolution)?;
        let constructor = self
            .constructors
            .get(tree_type)
            .ok_or_else(|| OcTreeError::UnknownTreeType(tree_type.to_owned()))?;
        Ok(constructor(resolution))
    }

    /// Reads a tree of any registered type.
    pub fn read_tree<R: Read>(&self, input: &mut R) -> Result<Box<dyn AbstractOcTree>> {
        let header = TreeHeader::read_from(input)?;
        let mut tree = self.create(&header.tree_type, header.resolution)?;
        tree.read_body_from(&header, input)?;
        Ok(tree)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{ColorOcTree, OcTree, OcTreeKey};
    use glam::DVec3;

    fn sample_tree() -> OcTree {
        let mut tree = OcTree::new(0.05);
        for (i, &c) in [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, -2.0, 0.5),
            DVec3::new(-3.0, 0.2, -0.7),
        ]
        .iter()
        .enumerate()
        {
            tree.set_node_value_at(c, i as f32 - 1.0).unwrap();
        }
        tree
    }

    #[test]
    fn header_layout() {
        let header = TreeHeader {
            tree_type: "OcTree".into(),
            resolution: 0.1,
            num_nodes: 3,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], b"OCTR");
        assert_eq!(bytes[4], FORMAT_VERSION);
        assert_eq!(bytes[5], 6);
        assert_eq!(&bytes[6..12], b"OcTree");
        assert_eq!(bytes.len(), 12 + 8 + 8);
        assert_eq!(TreeHeader::read_from(&mut bytes.as_slice()).unwrap(), header);
    }

    #[test]
    fn write_then_read_preserves_structure() {
        let tree = sample_tree();
        let mut bytes = Vec::new();
        tree.write_const(&mut bytes).unwrap();

        let read = OcTree::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(read.resolution(), 0.05);
        assert_eq!(read.size(), tree.size());
        assert_eq!(read.calc_num_nodes(), tree.size());
        assert_eq!(read.leaf_nodes(0), tree.leaf_nodes(0));
        let key = read.coord_to_key(DVec3::new(1.0, -2.0, 0.5)).unwrap();
        let ptr = read.search(key).unwrap();
        assert_eq!(read.get_value(ptr), Some(&OccupancyNode::new(0.0)));
    }

    #[test]
    fn write_prunes_first() {
        let mut tree = OcTree::new(0.1);
        let corner = OcTreeKey::new(32768, 32768, 32768);
        for child_index in 0..8 {
            tree.set_node_value(corner.child_key(TREE_DEPTH - 1, child_index), 1.0);
        }
        let mut bytes = Vec::new();
        tree.write(&mut bytes).unwrap();
        assert_eq!(tree.size(), TREE_DEPTH as usize);

        let read = OcTree::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(read.size(), TREE_DEPTH as usize);
        assert_eq!(read.search(corner).unwrap().depth(), TREE_DEPTH - 1);
    }

    #[test]
    fn empty_tree_round_trip() {
        let tree = ColorOcTree::new(0.2);
        let mut bytes = Vec::new();
        tree.write_const(&mut bytes).unwrap();
        let read = ColorOcTree::read(&mut bytes.as_slice()).unwrap();
        assert!(read.is_empty());
        assert_eq!(read.resolution(), 0.2);
    }

    #[test]
    fn rejects_foreign_streams() {
        assert!(matches!(
            OcTree::read(&mut b"NOPE and some more bytes".as_slice()),
            Err(OcTreeError::BadMagic)
        ));

        let mut bytes = Vec::new();
        sample_tree().write_const(&mut bytes).unwrap();
        assert!(matches!(
            ColorOcTree::read(&mut bytes.as_slice()),
            Err(OcTreeError::TreeTypeMismatch { expected: "ColorOcTree", found }) if found == "OcTree"
        ));

        bytes[4] = 9;
        assert!(matches!(
            OcTree::read(&mut bytes.as_slice()),
            Err(OcTreeError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejects_truncated_streams() {
        let mut bytes = Vec::new();
        sample_tree().write_const(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            OcTree::read(&mut bytes.as_slice()),
            Err(OcTreeError::Io(_))
        ));
    }

    #[test]
    fn rejects_node_count_mismatch() {
        let header = TreeHeader {
            tree_type: "OcTree".into(),
            resolution: 0.1,
            num_nodes: 3,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        // A single leaf root.
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.push(0);
        assert!(matches!(
            OcTree::read(&mut bytes.as_slice()),
            Err(OcTreeError::MalformedStream(_))
        ));
    }

    #[test]
    fn rejects_nodes_below_max_depth() {
        let header = TreeHeader {
            tree_type: "OcTree".into(),
            resolution: 0.1,
            num_nodes: 100,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        // A chain where every node claims a first child, one level too deep.
        for _ in 0..=TREE_DEPTH {
            bytes.extend_from_slice(&0.0f32.to_le_bytes());
            bytes.push(1);
        }

        let mut tree = OcTree::new(0.1);
        let result = tree.read_body(&header, &mut &bytes[28..]);
        assert!(matches!(result, Err(OcTreeError::MalformedStream(_))));
        assert!(tree.is_empty());
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn registry_reads_any_registered_type() {
        let registry = TreeRegistry::with_defaults();
        assert!(registry.contains("OcTree"));
        assert!(registry.contains("ColorOcTree"));

        let mut bytes = Vec::new();
        sample_tree().write_const(&mut bytes).unwrap();
        let tree = registry.read_tree(&mut bytes.as_slice()).unwrap();
        assert_eq!(tree.tree_type(), "OcTree");
        assert_eq!(tree.size(), sample_tree().size());
        assert!(tree.downcast_ref::<OcTree>().is_some());
        assert!(tree.downcast_ref::<ColorOcTree>().is_none());

        assert!(matches!(
            TreeRegistry::new().read_tree(&mut bytes.as_slice()),
            Err(OcTreeError::UnknownTreeType(name)) if name == "OcTree"
        ));
        assert!(matches!(
            registry.create("OcTree", 0.0),
            Err(OcTreeError::InvalidParameter { name: "resolution", .. })
        ));
    }
}
