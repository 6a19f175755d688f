use crate::attribute::{read_optional, write_optional};
use crate::{
    probability, Attribute, Color, Label, NodePayload, OcTreeBase, OcTreeKey, UpdatePolicy,
    VisitCommand,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::DVec3;
use std::io::{self, Read, Write};

/// Occupancy plus an optional [`Color`] and an optional semantic [`Label`].
///
/// Pruning only compares occupancy. When eight leaves are merged, each attribute that the first child carries becomes
/// the mean of the children that carry it, and each attribute the first child lacks stays unset. Per-cell color and label
/// detail below a merged node is lost.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorOccupancyNode {
    pub log_odds: f32,
    pub color: Option<Color>,
    pub label: Option<Label>,
}

impl ColorOccupancyNode {
    pub const fn new(log_odds: f32) -> Self {
        Self {
            log_odds,
            color: None,
            label: None,
        }
    }

    #[inline]
    pub fn is_color_set(&self) -> bool {
        self.color.is_some()
    }

    #[inline]
    pub fn is_label_set(&self) -> bool {
        self.label.is_some()
    }
}

impl NodePayload for ColorOccupancyNode {
    const TREE_TYPE: &'static str = "ColorOcTree";

    #[inline]
    fn value(&self) -> f32 {
        self.log_odds
    }

    #[inline]
    fn set_value(&mut self, value: f32) {
        self.log_odds = value;
    }

    fn collapses_with(&self, sibling: &Self) -> bool {
        self.log_odds == sibling.log_odds
    }

    fn collapse_from(&mut self, children: &[Self]) {
        *self = children[0];
        if self.color.is_some() {
            self.color = Color::mean(children.iter().filter_map(|c| c.color.as_ref()));
        }
        if self.label.is_some() {
            self.label = Label::mean(children.iter().filter_map(|c| c.label.as_ref()));
        }
    }

    fn update_attributes_from_children(&mut self, children: &[Self]) {
        self.color = Color::mean(children.iter().filter_map(|c| c.color.as_ref()));
        self.label = Label::mean(children.iter().filter_map(|c| c.label.as_ref()));
    }

    fn write_data<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_f32::<LittleEndian>(self.log_odds)?;
        write_optional(&self.color, out)?;
        write_optional(&self.label, out)
    }

    fn read_data<R: Read + ?Sized>(input: &mut R) -> io::Result<Self> {
        Ok(Self {
            log_odds: input.read_f32::<LittleEndian>()?,
            color: read_optional(input)?,
            label: read_optional(input)?,
        })
    }
}

/// An occupancy octree with per-cell color and semantic labels.
pub type ColorOcTree = OcTreeBase<ColorOccupancyNode>;

macro_rules! impl_attribute_updates {
    (
        $field:ident: $attribute:ty,
        $update:ident, $update_at:ident,
        $set:ident, $set_at:ident,
        $average:ident, $average_at:ident,
        $integrate:ident, $integrate_at:ident
    ) => {
        impl ColorOcTree {
            /// Merges `value` into the node covering `key` under `policy`.
            ///
            /// Only existing nodes are touched. Returns `None` if no node covers `key`. A pruned leaf covering `key`
            /// is updated as a whole.
            pub fn $update(
                &mut self,
                key: OcTreeKey,
                value: $attribute,
                policy: UpdatePolicy,
            ) -> Option<&ColorOccupancyNode> {
                let ptr = self.search(key)?;
                let weight_sum = self.params().integration_weight_sum;
                let node = self.get_value_mut(ptr)?;
                let occupancy = probability(node.log_odds);
                policy.apply(&mut node.$field, value, occupancy, weight_sum);
                Some(&*node)
            }

            pub fn $update_at(
                &mut self,
                coordinate: DVec3,
                value: $attribute,
                policy: UpdatePolicy,
            ) -> Option<&ColorOccupancyNode> {
                let key = self.key_for_coord(coordinate)?;
                self.$update(key, value, policy)
            }

            #[inline]
            pub fn $set(&mut self, key: OcTreeKey, value: $attribute) -> Option<&ColorOccupancyNode> {
                self.$update(key, value, UpdatePolicy::Replace)
            }

            #[inline]
            pub fn $set_at(&mut self, coordinate: DVec3, value: $attribute) -> Option<&ColorOccupancyNode> {
                self.$update_at(coordinate, value, UpdatePolicy::Replace)
            }

            #[inline]
            pub fn $average(&mut self, key: OcTreeKey, value: $attribute) -> Option<&ColorOccupancyNode> {
                self.$update(key, value, UpdatePolicy::Average)
            }

            #[inline]
            pub fn $average_at(&mut self, coordinate: DVec3, value: $attribute) -> Option<&ColorOccupancyNode> {
                self.$update_at(coordinate, value, UpdatePolicy::Average)
            }

            #[inline]
            pub fn $integrate(&mut self, key: OcTreeKey, value: $attribute) -> Option<&ColorOccupancyNode> {
                self.$update(key, value, UpdatePolicy::Integrate)
            }

            #[inline]
            pub fn $integrate_at(&mut self, coordinate: DVec3, value: $attribute) -> Option<&ColorOccupancyNode> {
                self.$update_at(coordinate, value, UpdatePolicy::Integrate)
            }
        }
    };
}

impl_attribute_updates!(
    color: Color,
    update_node_color, update_node_color_at,
    set_node_color, set_node_color_at,
    average_node_color, average_node_color_at,
    integrate_node_color, integrate_node_color_at
);
impl_attribute_updates!(
    label: Label,
    update_node_label, update_node_label_at,
    set_node_label, set_node_label_at,
    average_node_label, average_node_label_at,
    integrate_node_label, integrate_node_label_at
);

impl ColorOcTree {
    /// Per-channel counts over the occupied leaves that have a color.
    pub fn color_histogram(&self) -> ColorHistogram {
        let mut histogram = ColorHistogram::default();
        self.visit_tree_depth_first(|ptr, _| {
            if self.has_children(ptr) {
                return VisitCommand::Continue;
            }
            if let Some(node) = self.get_value(ptr) {
                if let Some(color) = node.color.filter(|_| self.is_node_occupied(node)) {
                    histogram.add(color);
                }
            }
            VisitCommand::SkipDescendants
        });
        histogram
    }
}

/// 256 bins per color channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColorHistogram {
    pub red: [u32; 256],
    pub green: [u32; 256],
    pub blue: [u32; 256],
}

impl Default for ColorHistogram {
    fn default() -> Self {
        Self {
            red: [0; 256],
            green: [0; 256],
            blue: [0; 256],
        }
    }
}

impl ColorHistogram {
    #[inline]
    pub fn add(&mut self, color: Color) {
        self.red[color.r as usize] += 1;
        self.green[color.g as usize] += 1;
        self.blue[color.b as usize] += 1;
    }

    /// Number of colors counted.
    pub fn total(&self) -> u64 {
        self.red.iter().map(|&n| n as u64).sum()
    }

    /// Writes a gnuplot script that renders the histogram as an EPS image to `output_file`. Pipe it into `gnuplot`.
    pub fn write_gnuplot<W: Write>(&self, out: &mut W, output_file: &str) -> io::Result<()> {
        writeln!(out, "set term postscript eps enhanced color")?;
        writeln!(out, "set output \"{}\"", output_file)?;
        writeln!(
            out,
            "plot [-1:256] \
             '-' w filledcurve lt 1 lc 1 tit \"r\", \
             '-' w filledcurve lt 1 lc 2 tit \"g\", \
             '-' w filledcurve lt 1 lc 3 tit \"b\", \
             '-' w l lt 1 lc 1 tit \"\", \
             '-' w l lt 1 lc 2 tit \"\", \
             '-' w l lt 1 lc 3 tit \"\""
        )?;
        let channels = [&self.red, &self.green, &self.blue];
        // Filled curves are closed back to the origin.
        for bins in channels {
            write_bins(out, bins)?;
            writeln!(out, "0 0")?;
            writeln!(out, "e")?;
        }
        for bins in channels {
            write_bins(out, bins)?;
            writeln!(out, "e")?;
        }
        Ok(())
    }
}

fn write_bins<W: Write>(out: &mut W, bins: &[u32; 256]) -> io::Result<()> {
    for (i, count) in bins.iter().enumerate() {
        writeln!(out, "{} {}", i, count)?;
    }
    Ok(())
}
