//! Continuous vertical page layout
//!
//! Pages are stacked top to bottom in one column, separated by a fixed gap,
//! in scaled pixels. Page sizes come from the backend once; changing scale or
//! rotation only recomputes offsets.

use crate::error::{ViewerError, ViewerResult};
use pageport_cache::Rotation;
use pageport_scheduler::{PageDimensions, RenderBackend};

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    dimensions: Vec<PageDimensions>,
    scale: f32,
    rotation: Rotation,
    spacing: f32,
    sizes_px: Vec<(u32, u32)>,
    tops: Vec<f32>,
    total_height: f32,
}

impl DocumentLayout {
    pub fn new(
        dimensions: Vec<PageDimensions>,
        scale: f32,
        rotation: Rotation,
        spacing: f32,
    ) -> ViewerResult<Self> {
        if dimensions.is_empty() {
            return Err(ViewerError::EmptyDocument);
        }

        let mut layout = Self {
            dimensions,
            scale,
            rotation,
            spacing: spacing.max(0.0),
            sizes_px: Vec::new(),
            tops: Vec::new(),
            total_height: 0.0,
        };
        layout.recompute();
        Ok(layout)
    }

    /// Read page count and every page's dimensions from the backend
    pub fn from_backend(
        backend: &dyn RenderBackend,
        scale: f32,
        rotation: Rotation,
        spacing: f32,
    ) -> ViewerResult<Self> {
        let dimensions = (0..backend.page_count())
            .map(|page_index| backend.page_dimensions(page_index))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(dimensions, scale, rotation, spacing)
    }

    /// Change render parameters, recomputing offsets if either differs
    pub fn relayout(&mut self, scale: f32, rotation: Rotation) -> bool {
        if self.scale == scale && self.rotation == rotation {
            return false;
        }
        self.scale = scale;
        self.rotation = rotation;
        self.recompute();
        true
    }

    fn recompute(&mut self) {
        self.sizes_px = self
            .dimensions
            .iter()
            .map(|dims| dims.scaled(self.scale, self.rotation))
            .collect();

        self.tops.clear();
        let mut cursor = 0.0;
        for (index, &(_, height)) in self.sizes_px.iter().enumerate() {
            if index > 0 {
                cursor += self.spacing;
            }
            self.tops.push(cursor);
            cursor += height as f32;
        }
        self.total_height = cursor;
    }

    pub fn page_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    /// Unscaled dimensions as reported by the backend
    pub fn page_dimensions(&self, page_index: usize) -> Option<PageDimensions> {
        self.dimensions.get(page_index).copied()
    }

    /// Page size in pixels at the current scale and rotation
    pub fn page_size_px(&self, page_index: usize) -> Option<(u32, u32)> {
        self.sizes_px.get(page_index).copied()
    }

    /// Offset of the page's top edge from the top of the document
    pub fn page_top(&self, page_index: usize) -> Option<f32> {
        self.tops.get(page_index).copied()
    }

    /// Offset of the page's bottom edge from the top of the document
    pub fn page_bottom(&self, page_index: usize) -> Option<f32> {
        let top = self.page_top(page_index)?;
        let (_, height) = self.page_size_px(page_index)?;
        Some(top + height as f32)
    }

    /// Height of the whole scrollable column
    pub fn total_height(&self) -> f32 {
        self.total_height
    }

    /// Page under a vertical offset
    ///
    /// Offsets in the gap below a page resolve to the page after it. Offsets
    /// outside the document clamp to the first or last page.
    pub fn page_at_offset(&self, offset: f32) -> usize {
        let at_or_above = self.tops.partition_point(|&top| top <= offset);
        let index = at_or_above.saturating_sub(1);

        match self.page_bottom(index) {
            Some(bottom) if offset > bottom && index + 1 < self.page_count() => index + 1,
            _ => index,
        }
    }

    /// Last page whose top edge lies strictly above `offset`
    ///
    /// Used for the bottom edge of the viewport, where touching a page's top
    /// edge does not make it visible.
    pub(crate) fn last_page_starting_before(&self, offset: f32) -> usize {
        self.tops
            .partition_point(|&top| top < offset)
            .saturating_sub(1)
    }

    /// Widest page width in document units, after rotation
    ///
    /// Fit-width zoom divides the viewport width by this.
    pub fn widest_page(&self) -> f32 {
        self.dimensions
            .iter()
            .map(|dims| {
                if self.rotation.swaps_axes() {
                    dims.height
                } else {
                    dims.width
                }
            })
            .fold(0.0, f32::max)
    }
}
