//! Animation scripts: frames, durations and the pixels they touch.
//!
//! Models are built once by the ingress layer after validation and are
//! read-only afterwards. Animations share them through an `Arc`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One timed partial update of the strip.
///
/// Only the pixels present in `pixels` are written; everything else keeps
/// whatever the buffer already holds. The map is ordered by pixel index so
/// rendering walks pixels in a stable order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    /// How long this frame stays up before the next one, in milliseconds.
    pub duration_ms: f64,
    /// Pixel index → packed `0xRRGGBB` color.
    pub pixels: BTreeMap<usize, u32>,
}

impl Frame {
    pub fn new(duration_ms: f64, pixels: impl IntoIterator<Item = (usize, u32)>) -> Self {
        Self {
            duration_ms,
            pixels: pixels.into_iter().collect(),
        }
    }

    /// Frame duration as a [`Duration`]. Negative or non-finite values
    /// (never produced by validation) collapse to zero.
    pub fn duration(&self) -> Duration {
        if self.duration_ms.is_finite() && self.duration_ms > 0.0 {
            // `as` saturates absurdly long durations at u64::MAX nanoseconds
            Duration::from_nanos((self.duration_ms * 1_000_000.0).round() as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// An immutable animation script: ordered frames plus a repeat flag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnimationModel {
    frames: Vec<Frame>,
    repeat: bool,
    involved_pixels: BTreeSet<usize>,
}

impl AnimationModel {
    /// Build a model, deriving `involved_pixels` from the frames.
    pub fn new(frames: Vec<Frame>, repeat: bool) -> Self {
        let involved_pixels = frames
            .iter()
            .flat_map(|frame| frame.pixels.keys().copied())
            .collect();
        Self {
            frames,
            repeat,
            involved_pixels,
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    /// Every pixel index any frame writes.
    pub fn involved_pixels(&self) -> &BTreeSet<usize> {
        &self.involved_pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn involved_pixels_is_union_of_frame_keys() {
        let model = AnimationModel::new(
            vec![
                Frame::new(10.0, [(3, 0xFF0000), (1, 0x00FF00)]),
                Frame::new(10.0, [(1, 0x000000), (7, 0x0000FF)]),
            ],
            false,
        );
        assert_eq!(
            model.involved_pixels().iter().copied().collect::<Vec<_>>(),
            vec![1, 3, 7]
        );
    }

    #[test]
    fn empty_model_involves_nothing() {
        let model = AnimationModel::new(Vec::new(), true);
        assert!(model.frames().is_empty());
        assert!(model.involved_pixels().is_empty());
        assert!(model.repeat());
    }

    #[rstest]
    #[case(100.0, Duration::from_millis(100))]
    #[case(0.5, Duration::from_micros(500))]
    #[case(0.0, Duration::ZERO)]
    #[case(-3.0, Duration::ZERO)]
    #[case(f64::NAN, Duration::ZERO)]
    fn frame_duration_in_millis(#[case] ms: f64, #[case] expected: Duration) {
        assert_eq!(Frame::new(ms, []).duration(), expected);
    }
}
