//! Page identity and rendered page data
//!
//! A [`PageKey`] names one unit of render work: a page index rendered at a
//! given scale and rotation. A [`RenderedPage`] is the pixel output for one
//! key, owned by the cache once inserted.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Page rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Rotation {
    /// Upright
    #[default]
    Deg0,

    /// Quarter turn clockwise
    Deg90,

    /// Upside down
    Deg180,

    /// Quarter turn counter-clockwise
    Deg270,
}

impl Rotation {
    /// Build a rotation from degrees
    ///
    /// Accepts any multiple of 90, including negative values and values
    /// beyond a full turn. Returns `None` for anything else.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// Rotation angle in degrees (0, 90, 180 or 270)
    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether this rotation swaps the page's width and height
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// The rotation one quarter turn further clockwise
    pub fn rotated_clockwise(self) -> Self {
        match self {
            Self::Deg0 => Self::Deg90,
            Self::Deg90 => Self::Deg180,
            Self::Deg180 => Self::Deg270,
            Self::Deg270 => Self::Deg0,
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Identity of a cache entry and of a render request
///
/// Two keys are equal when page index, rotation and the exact scale value
/// match. Scale is compared bitwise, so callers that derive scales from
/// geometry should round them before building keys.
#[derive(Debug, Clone, Copy)]
pub struct PageKey {
    /// Zero-based page index
    pub page_index: usize,

    /// Render scale (1.0 = one pixel per page unit)
    scale: f32,

    /// Page rotation
    pub rotation: Rotation,
}

impl PageKey {
    /// Create a new page key
    ///
    /// # Panics
    ///
    /// Panics if `scale` is not a finite, strictly positive number.
    pub fn new(page_index: usize, scale: f32, rotation: Rotation) -> Self {
        assert!(
            scale.is_finite() && scale > 0.0,
            "page scale must be finite and positive, got {scale}"
        );
        Self {
            page_index,
            scale,
            rotation,
        }
    }

    /// Create a key, returning `None` if `scale` is not finite and positive
    pub fn try_new(page_index: usize, scale: f32, rotation: Rotation) -> Option<Self> {
        (scale.is_finite() && scale > 0.0).then(|| Self::new(page_index, scale, rotation))
    }

    /// Render scale
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Same render parameters, different page
    pub fn with_page(&self, page_index: usize) -> Self {
        Self {
            page_index,
            ..*self
        }
    }

    /// Whether `other` uses the same scale and rotation
    pub fn same_params(&self, other: &PageKey) -> bool {
        self.scale.to_bits() == other.scale.to_bits() && self.rotation == other.rotation
    }
}

impl PartialEq for PageKey {
    fn eq(&self, other: &Self) -> bool {
        self.page_index == other.page_index && self.same_params(other)
    }
}

impl Eq for PageKey {}

impl Hash for PageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.page_index.hash(state);
        self.scale.to_bits().hash(state);
        self.rotation.hash(state);
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {} @{:.3}x {}",
            self.page_index, self.scale, self.rotation
        )
    }
}

/// Rendered pixel data for one page key
///
/// Exclusively owned by the page cache once inserted. Callers get a borrowed
/// view through [`PageCache::with_page`](crate::PageCache::with_page) or a
/// defensive copy through [`PageCache::get`](crate::PageCache::get).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// Key this page was rendered for
    pub key: PageKey,

    /// Raw pixel data, opaque to the cache
    pub pixels: Vec<u8>,

    /// Width in pixels
    pub width_px: u32,

    /// Height in pixels
    pub height_px: u32,

    /// Scheduler sequence number of the request that produced this page
    pub produced_at_sequence: u64,
}

impl RenderedPage {
    /// Create a new rendered page
    pub fn new(
        key: PageKey,
        pixels: Vec<u8>,
        width_px: u32,
        height_px: u32,
        produced_at_sequence: u64,
    ) -> Self {
        Self {
            key,
            pixels,
            width_px,
            height_px,
            produced_at_sequence,
        }
    }

    /// Memory held by the pixel buffer in bytes
    pub fn memory_size(&self) -> usize {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0), Some(Rotation::Deg0));
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(540), Some(Rotation::Deg180));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn test_rotation_axes() {
        assert!(!Rotation::Deg0.swaps_axes());
        assert!(Rotation::Deg90.swaps_axes());
        assert!(!Rotation::Deg180.swaps_axes());
        assert!(Rotation::Deg270.swaps_axes());
        assert_eq!(Rotation::Deg270.rotated_clockwise(), Rotation::Deg0);
    }

    #[test]
    fn test_key_identity() {
        let a = PageKey::new(4, 1.5, Rotation::Deg0);
        let b = PageKey::new(4, 1.5, Rotation::Deg0);
        let other_scale = PageKey::new(4, 2.0, Rotation::Deg0);
        let other_rotation = PageKey::new(4, 1.5, Rotation::Deg90);

        assert_eq!(a, b);
        assert_ne!(a, other_scale);
        assert_ne!(a, other_rotation);

        let set: HashSet<PageKey> = [a, b, other_scale, other_rotation].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_key_with_page_keeps_params() {
        let key = PageKey::new(1, 2.0, Rotation::Deg180);
        let moved = key.with_page(9);
        assert_eq!(moved.page_index, 9);
        assert!(moved.same_params(&key));
    }

    #[test]
    fn test_try_new_rejects_bad_scale() {
        assert!(PageKey::try_new(0, 0.0, Rotation::Deg0).is_none());
        assert!(PageKey::try_new(0, -1.0, Rotation::Deg0).is_none());
        assert!(PageKey::try_new(0, f32::NAN, Rotation::Deg0).is_none());
        assert!(PageKey::try_new(0, f32::INFINITY, Rotation::Deg0).is_none());
        assert!(PageKey::try_new(0, 0.5, Rotation::Deg0).is_some());
    }

    #[test]
    #[should_panic]
    fn test_new_panics_on_zero_scale() {
        let _ = PageKey::new(0, 0.0, Rotation::Deg0);
    }

    #[test]
    fn test_rendered_page_memory_size() {
        let key = PageKey::new(0, 1.0, Rotation::Deg0);
        let page = RenderedPage::new(key, vec![0u8; 64 * 32 * 4], 64, 32, 7);
        assert_eq!(page.memory_size(), 64 * 32 * 4);
        assert_eq!(page.produced_at_sequence, 7);
    }

    #[test]
    fn test_key_display() {
        let key = PageKey::new(12, 1.5, Rotation::Deg90);
        assert_eq!(key.to_string(), "page 12 @1.500x 90°");
    }
}
