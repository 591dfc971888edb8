//! Pageport Cache Library
//!
//! Bounded store of rendered pages with least-recently-used eviction.

pub mod page;
pub mod page_cache;

pub use page::{PageKey, RenderedPage, Rotation};
pub use page_cache::{CacheStats, PageCache, DEFAULT_MAX_RESIDENT_PAGES};
