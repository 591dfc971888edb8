//! Viewport tracking
//!
//! [`compute_visible_set`] turns scroll position and viewport geometry into
//! the set of pages that must be resident. It is a pure function: the same
//! inputs always produce the same set.

use crate::layout::DocumentLayout;
use pageport_scheduler::RenderPriority;

/// Viewport geometry reported by the UI layer, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportState {
    /// Distance from the top of the document to the top of the viewport
    pub scroll_offset: f32,
    pub viewport_width: f32,
    pub viewport_height: f32,
}

impl ViewportState {
    pub fn new(scroll_offset: f32, viewport_width: f32, viewport_height: f32) -> Self {
        Self {
            scroll_offset,
            viewport_width,
            viewport_height,
        }
    }
}

/// Pages that must be resident for a settled viewport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleSet {
    /// Selected page indices, ascending
    pub pages: Vec<usize>,

    /// Page under the viewport's vertical center
    pub focal: usize,

    /// First page intersecting the viewport
    pub first_visible: usize,

    /// Last page intersecting the viewport
    pub last_visible: usize,
}

impl VisibleSet {
    pub fn contains(&self, page_index: usize) -> bool {
        self.pages.binary_search(&page_index).is_ok()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether the page actually intersects the viewport
    pub fn is_intersecting(&self, page_index: usize) -> bool {
        (self.first_visible..=self.last_visible).contains(&page_index)
    }

    /// Render priority for a member page
    pub fn priority_of(&self, page_index: usize) -> RenderPriority {
        if page_index == self.focal {
            RenderPriority::Focal
        } else if self.is_intersecting(page_index) {
            RenderPriority::Visible
        } else {
            RenderPriority::Prefetch
        }
    }
}

/// Clamp a scroll offset to `[0, total_height - viewport_height]`
pub fn clamp_scroll(scroll_offset: f32, viewport_height: f32, total_height: f32) -> f32 {
    let max_scroll = (total_height - viewport_height.max(0.0)).max(0.0);
    if scroll_offset.is_finite() {
        scroll_offset.clamp(0.0, max_scroll)
    } else {
        0.0
    }
}

/// Compute the visible set for a viewport
///
/// Pages intersecting the viewport plus `prefetch_margin` pages on each side
/// are candidates. If there are more candidates than `max_resident_pages`,
/// the set keeps the focal page and its nearest neighbours, preferring pages
/// that actually intersect the viewport over margin pages at equal distance.
pub fn compute_visible_set(
    viewport: &ViewportState,
    layout: &DocumentLayout,
    max_resident_pages: usize,
    prefetch_margin: usize,
) -> VisibleSet {
    let page_count = layout.page_count();
    let height = if viewport.viewport_height.is_finite() {
        viewport.viewport_height.max(0.0)
    } else {
        0.0
    };
    let scroll = clamp_scroll(viewport.scroll_offset, height, layout.total_height());
    let bottom = scroll + height;

    let focal = layout.page_at_offset(scroll + height / 2.0);
    let first_visible = layout.page_at_offset(scroll).min(focal);
    let last_visible = layout.last_page_starting_before(bottom).max(focal);

    let first = first_visible.saturating_sub(prefetch_margin);
    let last = last_visible
        .saturating_add(prefetch_margin)
        .min(page_count.saturating_sub(1));

    let mut candidates: Vec<usize> = (first..=last).collect();
    candidates.sort_by_key(|&page| {
        let intersecting = (first_visible..=last_visible).contains(&page);
        (page.abs_diff(focal), !intersecting, page)
    });
    candidates.truncate(max_resident_pages.max(1));
    candidates.sort_unstable();

    VisibleSet {
        pages: candidates,
        focal,
        first_visible,
        last_visible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageport_cache::Rotation;
    use pageport_scheduler::PageDimensions;

    /// 1000px pages with 100px gaps: page `n` starts at `n * 1100`
    fn layout(pages: usize) -> DocumentLayout {
        DocumentLayout::new(
            vec![PageDimensions::new(800.0, 1000.0); pages],
            1.0,
            Rotation::Deg0,
            100.0,
        )
        .unwrap()
    }

    fn centered_on(page: usize, viewport_height: f32) -> ViewportState {
        let center = page as f32 * 1100.0 + 500.0;
        ViewportState::new(center - viewport_height / 2.0, 800.0, viewport_height)
    }

    #[test]
    fn test_focal_page_with_margin() {
        let layout = layout(100);
        let set = compute_visible_set(&centered_on(50, 600.0), &layout, 3, 1);

        assert_eq!(set.pages, vec![49, 50, 51]);
        assert_eq!(set.focal, 50);
        assert_eq!(set.priority_of(50), RenderPriority::Focal);
        assert_eq!(set.priority_of(49), RenderPriority::Prefetch);
        assert!(!set.contains(52));
    }

    #[test]
    fn test_scroll_to_another_page() {
        let layout = layout(100);
        let set = compute_visible_set(&centered_on(70, 600.0), &layout, 3, 1);
        assert_eq!(set.pages, vec![69, 70, 71]);
    }

    #[test]
    fn test_truncated_to_ceiling() {
        let layout = layout(100);

        // Tall viewport spanning pages 48..=52
        let viewport = centered_on(50, 5000.0);
        let set = compute_visible_set(&viewport, &layout, 3, 1);

        assert_eq!(set.focal, 50);
        assert_eq!(set.pages, vec![49, 50, 51]);
        assert!(set.is_intersecting(48));
        assert!(!set.contains(48));
    }

    #[test]
    fn test_intersecting_pages_beat_margin_pages() {
        let layout = layout(100);

        // Center in page 10 near its bottom edge, page 11 also on screen
        let viewport = ViewportState::new(10.0 * 1100.0 + 600.0, 800.0, 700.0);
        let set = compute_visible_set(&viewport, &layout, 2, 1);

        assert_eq!(set.focal, 10);
        assert_eq!(set.pages, vec![10, 11]);
        assert_eq!(set.priority_of(11), RenderPriority::Visible);
    }

    #[test]
    fn test_ceiling_of_one_keeps_focal_only() {
        let layout = layout(10);
        let set = compute_visible_set(&centered_on(4, 600.0), &layout, 1, 1);
        assert_eq!(set.pages, vec![4]);
    }

    #[test]
    fn test_zero_margin() {
        let layout = layout(10);
        let set = compute_visible_set(&centered_on(4, 600.0), &layout, 3, 0);
        assert_eq!(set.pages, vec![4]);
    }

    #[test]
    fn test_scroll_clamped_to_document() {
        let layout = layout(10);

        let before = compute_visible_set(&ViewportState::new(-5000.0, 800.0, 600.0), &layout, 3, 1);
        assert_eq!(before.focal, 0);
        assert_eq!(before.pages, vec![0, 1]);

        let past_end = compute_visible_set(&ViewportState::new(1.0e9, 800.0, 600.0), &layout, 3, 1);
        assert_eq!(past_end.focal, 9);
        assert_eq!(past_end.pages, vec![8, 9]);

        let nan = compute_visible_set(&ViewportState::new(f32::NAN, 800.0, 600.0), &layout, 3, 1);
        assert_eq!(nan.focal, 0);
    }

    #[test]
    fn test_viewport_taller_than_document() {
        let layout = layout(2);
        let set = compute_visible_set(&ViewportState::new(300.0, 800.0, 10_000.0), &layout, 3, 1);

        assert_eq!(set.pages, vec![0, 1]);
        assert_eq!(set.first_visible, 0);
        assert_eq!(set.last_visible, 1);
    }

    #[test]
    fn test_clamp_scroll() {
        assert_eq!(clamp_scroll(-1.0, 100.0, 1000.0), 0.0);
        assert_eq!(clamp_scroll(950.0, 100.0, 1000.0), 900.0);
        assert_eq!(clamp_scroll(50.0, 2000.0, 1000.0), 0.0);
        assert_eq!(clamp_scroll(f32::INFINITY, 100.0, 1000.0), 0.0);
    }

    #[test]
    fn test_pure_function() {
        let layout = layout(100);
        let viewport = centered_on(33, 900.0);
        assert_eq!(
            compute_visible_set(&viewport, &layout, 3, 1),
            compute_visible_set(&viewport, &layout, 3, 1)
        );
    }
}
