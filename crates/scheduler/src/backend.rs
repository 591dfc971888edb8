//! Render backend contract
//!
//! The backend is the external collaborator that turns a page index into
//! pixels. It is assumed to be synchronous and potentially slow; the
//! scheduler makes sure only one render call is ever in progress.

use pageport_cache::Rotation;

/// Page size in document units (points for PDF), before scale and rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f32,
    pub height: f32,
}

impl PageDimensions {
    /// Create new page dimensions
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Size in pixels at the given scale and rotation
    ///
    /// Quarter-turn rotations swap width and height. Each side is at least
    /// one pixel.
    pub fn scaled(&self, scale: f32, rotation: Rotation) -> (u32, u32) {
        let (width, height) = if rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };

        (
            (width * scale).round().max(1.0) as u32,
            (height * scale).round().max(1.0) as u32,
        )
    }
}

/// Pixel output of one backend render call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub pixels: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

impl PixelBuffer {
    /// Create a new pixel buffer
    pub fn new(pixels: Vec<u8>, width_px: u32, height_px: u32) -> Self {
        Self {
            pixels,
            width_px,
            height_px,
        }
    }
}

/// Errors a backend can report for a page
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The page could not be produced (corrupt content, decode error)
    #[error("render failed: {0}")]
    Failed(String),

    /// The page uses a feature the backend cannot render
    #[error("unsupported content: {0}")]
    Unsupported(String),

    /// The page index does not exist in the document
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: usize, page_count: usize },
}

/// Produces rendered pages and document metadata
///
/// `render` is only ever called from the scheduler's single worker thread.
/// `page_count` and `page_dimensions` are read once, up front, to lay out
/// the document.
pub trait RenderBackend: Send + Sync {
    /// Total number of pages in the document
    fn page_count(&self) -> usize;

    /// Unscaled page size
    fn page_dimensions(&self, page_index: usize) -> Result<PageDimensions, RenderError>;

    /// Render a page at the given scale and rotation
    fn render(
        &self,
        page_index: usize,
        scale: f32,
        rotation: Rotation,
    ) -> Result<PixelBuffer, RenderError>;
}
