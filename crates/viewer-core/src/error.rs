use crate::config::ConfigError;
use pageport_scheduler::RenderError;

/// Errors returned synchronously by the viewer
///
/// Render failures that happen on the worker are never returned here; they
/// surface as [`crate::ViewerEvent::PageFailed`] notifications.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// Page index at or beyond the end of the document
    #[error("page {page} out of range (page_count={page_count})")]
    OutOfRange { page: usize, page_count: usize },

    /// The backend reported a document without pages
    #[error("document has no pages")]
    EmptyDocument,

    /// Document metadata could not be read from the backend
    #[error("backend error: {0}")]
    Backend(#[from] RenderError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A background thread could not be spawned
    #[error("failed to start worker thread: {0}")]
    Worker(#[from] std::io::Error),
}

pub type ViewerResult<T> = Result<T, ViewerError>;
