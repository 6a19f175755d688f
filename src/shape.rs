use crate::ChildIndex;

use ndshape::{ConstPow2Shape3u32, ConstShape};

/// The 2x2x2 block of children under every branch.
///
/// The x bit is the least significant, so child `i` lies on the positive side of axis `a` iff bit `a` of `i` is set.
pub(crate) type OctantShape = ConstPow2Shape3u32<1, 1, 1>;

/// Number of children of a branch node.
pub(crate) const CHILDREN: usize = OctantShape::USIZE;

/// Packs one bit per axis (each 0 or 1) into a [`ChildIndex`].
#[inline]
pub(crate) fn linearize_child(offset: [u32; 3]) -> ChildIndex {
    OctantShape::linearize(offset) as ChildIndex
}

/// Inverse of [`linearize_child`].
#[inline]
pub(crate) fn delinearize_child(i: ChildIndex) -> [u32; 3] {
    OctantShape::delinearize(i as u32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn x_is_least_significant() {
        assert_eq!(CHILDREN, 8);
        assert_eq!(linearize_child([1, 0, 0]), 1);
        assert_eq!(linearize_child([0, 1, 0]), 2);
        assert_eq!(linearize_child([0, 0, 1]), 4);
        for i in 0..8 {
            assert_eq!(linearize_child(delinearize_child(i)), i);
        }
    }
}
