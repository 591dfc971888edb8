//! Viewport-driven page viewer core
//!
//! The UI layer reports viewport changes through
//! [`ViewerController::on_viewport_changed`] and asks for page content with
//! [`ViewerController::page_for_display`]. Everything else (which pages stay
//! resident, what gets rendered and when) is decided here.

mod config;
mod controller;
mod debounce;
mod error;
mod layout;
mod tracker;

pub use config::{ConfigError, ViewerConfig, ZoomMode, MAX_SCALE, MIN_SCALE};
pub use controller::{
    DisplayPage, PageContent, PageState, Placeholder, ViewerController, ViewerEvent,
};
pub use debounce::{DebounceGate, Debouncer};
pub use error::{ViewerError, ViewerResult};
pub use layout::DocumentLayout;
pub use tracker::{clamp_scroll, compute_visible_set, ViewportState, VisibleSet};

pub use pageport_cache::{CacheStats, PageKey, RenderedPage, Rotation};
pub use pageport_scheduler::{
    PageDimensions, PixelBuffer, RenderBackend, RenderError, SchedulerStats,
};
