use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

/// An auxiliary per-node attribute that rides on top of the occupancy value.
///
/// Attributes are stored as `Option<A>` on the node, so "never observed" is distinct from every observable value.
pub trait Attribute: Copy + Default + PartialEq + fmt::Debug {
    /// Equal-weight mean of `self` and `observation`, per channel.
    fn average(&self, observation: &Self) -> Self;

    /// `self * occupancy + observation * (weight_sum - occupancy)`, per channel.
    ///
    /// This is only a convex combination when `weight_sum == 1.0`.
    fn integrate(&self, observation: &Self, occupancy: f64, weight_sum: f64) -> Self;

    /// Per-channel arithmetic mean of `values`, or `None` if there are none.
    fn mean<'a>(values: impl IntoIterator<Item = &'a Self>) -> Option<Self>
    where
        Self: 'a;

    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()>;

    fn read_from<R: Read + ?Sized>(input: &mut R) -> io::Result<Self>;
}

/// How a new observation of an attribute is merged into a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdatePolicy {
    /// Overwrite, discarding history.
    Replace,
    /// Running average with the previous value.
    Average,
    /// Blend weighted by the node's current occupancy probability.
    Integrate,
}

impl UpdatePolicy {
    /// Merges `observation` into `slot`. An unset slot always takes the observation as is.
    pub fn apply<A: Attribute>(
        self,
        slot: &mut Option<A>,
        observation: A,
        occupancy: f64,
        weight_sum: f64,
    ) {
        let merged = match (self, slot.as_ref()) {
            (UpdatePolicy::Replace, _) | (_, None) => observation,
            (UpdatePolicy::Average, Some(old)) => old.average(&observation),
            (UpdatePolicy::Integrate, Some(old)) => {
                old.integrate(&observation, occupancy, weight_sum)
            }
        };
        *slot = Some(merged);
    }
}

/// Writes a has-value flag followed by the attribute image. Unset attributes write a default image so records keep a
/// fixed size.
pub(crate) fn write_optional<A: Attribute, W: Write + ?Sized>(
    attribute: &Option<A>,
    out: &mut W,
) -> io::Result<()> {
    out.write_u8(attribute.is_some() as u8)?;
    attribute.unwrap_or_default().write_to(out)
}

pub(crate) fn read_optional<A: Attribute, R: Read + ?Sized>(
    input: &mut R,
) -> io::Result<Option<A>> {
    let is_set = input.read_u8()?;
    let attribute = A::read_from(input)?;
    match is_set {
        0 => Ok(None),
        1 => Ok(Some(attribute)),
        flag => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid attribute flag {}", flag),
        )),
    }
}

/// An RGB color.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[inline]
    fn channels(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    #[inline]
    fn from_channels([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl Attribute for Color {
    fn average(&self, observation: &Self) -> Self {
        let [r0, g0, b0] = self.channels();
        let [r1, g1, b1] = observation.channels();
        let mid = |a: u8, b: u8| ((a as u16 + b as u16) / 2) as u8;
        Self::new(mid(r0, r1), mid(g0, g1), mid(b0, b1))
    }

    fn integrate(&self, observation: &Self, occupancy: f64, weight_sum: f64) -> Self {
        let old = self.channels();
        let new = observation.channels();
        let mut out = [0; 3];
        for i in 0..3 {
            // `as u8` truncates and saturates.
            out[i] = (old[i] as f64 * occupancy + new[i] as f64 * (weight_sum - occupancy)) as u8;
        }
        Self::from_channels(out)
    }

    fn mean<'a>(values: impl IntoIterator<Item = &'a Self>) -> Option<Self> {
        let mut sum = [0u32; 3];
        let mut count = 0;
        for color in values {
            for (s, c) in sum.iter_mut().zip(color.channels()) {
                *s += c as u32;
            }
            count += 1;
        }
        (count > 0).then(|| Self::from_channels(sum.map(|s| (s / count) as u8)))
    }

    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.channels())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> io::Result<Self> {
        let mut channels = [0; 3];
        input.read_exact(&mut channels)?;
        Ok(Self::from_channels(channels))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.r, self.g, self.b)
    }
}

/// Number of semantic classes scored by a [`Label`].
pub const LABEL_CLASSES: usize = 10;

/// Per-class scores of a semantic label.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Label {
    pub scores: [f32; LABEL_CLASSES],
}

impl Label {
    pub const fn new(scores: [f32; LABEL_CLASSES]) -> Self {
        Self { scores }
    }

    /// Every class gets `prior`.
    pub const fn uniform(prior: f32) -> Self {
        Self {
            scores: [prior; LABEL_CLASSES],
        }
    }

    /// A label that puts all weight on `class`.
    ///
    /// # Panics
    ///
    /// If `class >= LABEL_CLASSES`.
    pub fn one_hot(class: usize) -> Self {
        let mut scores = [0.0; LABEL_CLASSES];
        scores[class] = 1.0;
        Self { scores }
    }

    /// Index of the highest scoring class. Ties go to the lowest index.
    pub fn most_likely(&self) -> usize {
        let mut best = 0;
        for (i, &score) in self.scores.iter().enumerate() {
            if score > self.scores[best] {
                best = i;
            }
        }
        best
    }
}

impl Attribute for Label {
    fn average(&self, observation: &Self) -> Self {
        let mut scores = self.scores;
        for (s, o) in scores.iter_mut().zip(observation.scores) {
            *s = (*s + o) / 2.0;
        }
        Self { scores }
    }

    fn integrate(&self, observation: &Self, occupancy: f64, weight_sum: f64) -> Self {
        let mut scores = self.scores;
        for (s, o) in scores.iter_mut().zip(observation.scores) {
            *s = (*s as f64 * occupancy + o as f64 * (weight_sum - occupancy)) as f32;
        }
        Self { scores }
    }

    fn mean<'a>(values: impl IntoIterator<Item = &'a Self>) -> Option<Self> {
        let mut sum = [0.0f64; LABEL_CLASSES];
        let mut count = 0;
        for label in values {
            for (s, v) in sum.iter_mut().zip(label.scores) {
                *s += v as f64;
            }
            count += 1;
        }
        (count > 0).then(|| Self {
            scores: sum.map(|s| (s / count as f64) as f32),
        })
    }

    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        for score in self.scores {
            out.write_f32::<LittleEndian>(score)?;
        }
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> io::Result<Self> {
        let mut scores = [0.0; LABEL_CLASSES];
        input.read_f32_into::<LittleEndian>(&mut scores)?;
        Ok(Self { scores })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn average_truncates() {
        let c = Color::new(10, 20, 31).average(&Color::new(20, 30, 40));
        assert_eq!(c, Color::new(15, 25, 35));
        assert_eq!(
            Color::new(255, 255, 0).average(&Color::new(254, 255, 1)),
            Color::new(254, 255, 0)
        );
    }

    #[test]
    fn policies_bootstrap_unset_slots() {
        for policy in [
            UpdatePolicy::Replace,
            UpdatePolicy::Average,
            UpdatePolicy::Integrate,
        ] {
            let mut slot = None;
            policy.apply(&mut slot, Color::new(1, 2, 3), 0.7, 0.99);
            assert_eq!(slot, Some(Color::new(1, 2, 3)));
        }
    }

    #[test]
    fn replace_discards_history() {
        let mut slot = Some(Color::new(100, 100, 100));
        UpdatePolicy::Replace.apply(&mut slot, Color::new(1, 2, 3), 0.5, 0.99);
        assert_eq!(slot, Some(Color::new(1, 2, 3)));
    }

    #[test]
    fn integrate_is_not_normalized() {
        // 101 * 0.5 + 200 * (0.99 - 0.5) = 148.5
        let mut slot = Some(Color::new(101, 101, 101));
        UpdatePolicy::Integrate.apply(&mut slot, Color::new(200, 200, 200), 0.5, 0.99);
        assert_eq!(slot, Some(Color::new(148, 148, 148)));

        let mut slot = Some(Color::new(101, 101, 101));
        UpdatePolicy::Integrate.apply(&mut slot, Color::new(200, 200, 200), 0.5, 1.0);
        assert_eq!(slot, Some(Color::new(150, 150, 150)));
    }

    #[test]
    fn mean_is_order_independent() {
        let colors = [
            Color::new(0, 10, 255),
            Color::new(3, 20, 255),
            Color::new(7, 30, 254),
        ];
        let forward = Color::mean(colors.iter());
        let backward = Color::mean(colors.iter().rev());
        assert_eq!(forward, Some(Color::new(3, 20, 254)));
        assert_eq!(forward, backward);
        assert_eq!(Color::mean(std::iter::empty()), None);
    }

    #[test]
    fn label_scores() {
        let a = Label::one_hot(2);
        let b = Label::one_hot(4);
        let avg = a.average(&b);
        assert_eq!(avg.scores[2], 0.5);
        assert_eq!(avg.scores[4], 0.5);
        assert_eq!(avg.most_likely(), 2);

        let mean = Label::mean([a, a, b].iter()).unwrap();
        assert_eq!(mean.most_likely(), 2);
        assert_eq!(Label::uniform(0.1).most_likely(), 0);
    }

    #[test]
    #[should_panic]
    fn one_hot_rejects_unknown_class() {
        Label::one_hot(LABEL_CLASSES);
    }

    #[test]
    fn optional_records_have_fixed_size() {
        let mut unset = Vec::new();
        write_optional::<Label, _>(&None, &mut unset).unwrap();
        let mut set = Vec::new();
        write_optional(&Some(Label::one_hot(9)), &mut set).unwrap();
        assert_eq!(unset.len(), set.len());

        assert_eq!(read_optional::<Label, _>(&mut unset.as_slice()).unwrap(), None);
        assert_eq!(
            read_optional::<Label, _>(&mut set.as_slice()).unwrap(),
            Some(Label::one_hot(9))
        );
        assert!(read_optional::<Label, _>(&mut [7u8; 41].as_slice()).is_err());
    }
}
