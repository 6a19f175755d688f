use occupancy_octree::glam::DVec3;
use occupancy_octree::{
    AbstractOcTree, Color, ColorOcTree, Label, OcTree, OcTreeError, TreeHeader, TreeRegistry,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn colored_tree() -> ColorOcTree {
    let mut tree = ColorOcTree::new(0.1);
    for i in 0..20 {
        let coordinate = DVec3::new(i as f64 * 0.3 - 3.0, (i % 4) as f64 * 0.1, -0.25);
        tree.set_node_value_at(coordinate, (i % 3) as f32 - 1.0).unwrap();
        if i % 2 == 0 {
            tree.set_node_color_at(coordinate, Color::new(i * 10, 255 - i, 7)).unwrap();
        }
        if i % 5 == 0 {
            tree.set_node_label_at(coordinate, Label::one_hot(i as usize % 10)).unwrap();
        }
    }
    tree.update_inner_occupancy();
    tree
}

#[test]
fn color_tree_round_trip() {
    init_logger();

    let mut tree = colored_tree();
    let mut bytes = Vec::new();
    tree.write(&mut bytes).unwrap();

    let read = ColorOcTree::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(read.size(), tree.size());
    assert_eq!(read.leaf_nodes(0), tree.leaf_nodes(0));
    assert_eq!(read.voxels(0), tree.voxels(0));
    assert_eq!(read.metric_min(), tree.metric_min());
    assert_eq!(read.metric_max(), tree.metric_max());

    for volume in tree.leaf_nodes(0) {
        let original = tree.get_value(tree.search_at(volume.center).unwrap());
        let copy = read.get_value(read.search_at(volume.center).unwrap());
        assert_eq!(original, copy);
    }
    assert_eq!(read.color_histogram(), tree.color_histogram());
}

#[test]
fn registry_dispatches_on_header() {
    init_logger();

    let registry = TreeRegistry::with_defaults();

    let mut color_bytes = Vec::new();
    colored_tree().write(&mut color_bytes).unwrap();
    let mut plain = OcTree::new(0.25);
    plain.set_node_value_at(DVec3::new(1.0, 2.0, 3.0), 0.7).unwrap();
    let mut plain_bytes = Vec::new();
    plain.write(&mut plain_bytes).unwrap();

    let header = TreeHeader::read_from(&mut color_bytes.as_slice()).unwrap();
    assert_eq!(header.tree_type, "ColorOcTree");
    assert_eq!(header.num_nodes as usize, colored_tree().size());

    let mut trees: Vec<Box<dyn AbstractOcTree>> = vec![
        registry.read_tree(&mut color_bytes.as_slice()).unwrap(),
        registry.read_tree(&mut plain_bytes.as_slice()).unwrap(),
    ];
    assert_eq!(trees[0].tree_type(), "ColorOcTree");
    assert_eq!(trees[1].tree_type(), "OcTree");
    assert_eq!(trees[1].resolution(), 0.25);
    for tree in trees.iter_mut() {
        tree.prune();
        assert_eq!(tree.size(), tree.calc_num_nodes());
    }

    let color = trees[0].downcast_ref::<ColorOcTree>().unwrap();
    assert_eq!(color.color_histogram(), colored_tree().color_histogram());

    // Written back through the trait object, the stream is unchanged.
    let mut rewritten = Vec::new();
    trees[1].write_to(&mut rewritten).unwrap();
    assert_eq!(rewritten, plain_bytes);
}

#[test]
fn unknown_tree_type() {
    init_logger();

    let header = TreeHeader {
        tree_type: "CountingOcTree".into(),
        resolution: 0.1,
        num_nodes: 0,
    };
    let mut bytes = Vec::new();
    header.write_to(&mut bytes).unwrap();
    assert!(matches!(
        TreeRegistry::with_defaults().read_tree(&mut bytes.as_slice()),
        Err(OcTreeError::UnknownTreeType(name)) if name == "CountingOcTree"
    ));
}
