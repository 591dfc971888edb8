//! Pageport Scheduler Library
//!
//! Single-worker render scheduler with coalescing and cooperative cancellation.
//!
//! Render requests are keyed by [`pageport_cache::PageKey`] and executed one at
//! a time on a dedicated worker thread, highest [`RenderPriority`] first with
//! FIFO ordering within each priority level. Finished pages are inserted into
//! a shared [`pageport_cache::PageCache`] and announced through a
//! [`RenderEvent`] callback.
//!
//! # Example
//!
//! ```
//! use pageport_cache::{PageCache, PageKey, Rotation};
//! use pageport_scheduler::{
//!     PageDimensions, PixelBuffer, RenderBackend, RenderError, RenderEvent, RenderPriority,
//!     RenderScheduler,
//! };
//! use std::sync::{mpsc, Arc, Mutex};
//! use std::time::Duration;
//!
//! struct Grey;
//!
//! impl RenderBackend for Grey {
//!     fn page_count(&self) -> usize {
//!         3
//!     }
//!
//!     fn page_dimensions(&self, _page: usize) -> Result<PageDimensions, RenderError> {
//!         Ok(PageDimensions::new(8.0, 8.0))
//!     }
//!
//!     fn render(&self, _page: usize, scale: f32, rotation: Rotation) -> Result<PixelBuffer, RenderError> {
//!         let (w, h) = PageDimensions::new(8.0, 8.0).scaled(scale, rotation);
//!         Ok(PixelBuffer::new(vec![0x80; (w * h * 4) as usize], w, h))
//!     }
//! }
//!
//! let (tx, rx) = mpsc::channel();
//! let tx = Mutex::new(tx);
//! let cache = PageCache::new(3);
//! let scheduler = RenderScheduler::start(
//!     Arc::new(Grey),
//!     cache.clone(),
//!     Arc::new(move |event: RenderEvent| {
//!         let _ = tx.lock().unwrap().send(event);
//!     }),
//! )
//! .expect("worker thread");
//!
//! let key = PageKey::new(1, 2.0, Rotation::Deg0);
//! scheduler.submit(key, RenderPriority::Visible);
//!
//! let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(event.key(), key);
//! assert!(cache.contains(&key));
//! ```

mod backend;
mod cancel;
mod queue;
mod scheduler;

// Re-export public API
pub use backend::{PageDimensions, PixelBuffer, RenderBackend, RenderError};
pub use cancel::{CancellationToken, RequestStatus};
pub use queue::RenderPriority;
pub use scheduler::{EventSink, RenderEvent, RenderScheduler, RequestHandle, SchedulerStats};
