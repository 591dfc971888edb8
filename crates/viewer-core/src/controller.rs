//! Viewer controller
//!
//! Composes layout, tracker, debounce gate, page cache and render scheduler
//! behind the two calls the UI layer makes: viewport changes in, page
//! content out.

use crate::config::{ConfigError, ViewerConfig, ZoomMode};
use crate::debounce::DebounceGate;
use crate::error::{ViewerError, ViewerResult};
use crate::layout::DocumentLayout;
use crate::tracker::{compute_visible_set, ViewportState, VisibleSet};
use pageport_cache::{CacheStats, PageCache, PageKey, RenderedPage, Rotation};
use pageport_scheduler::{
    RenderBackend, RenderEvent, RenderPriority, RenderScheduler, SchedulerStats,
};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

/// Notification for the UI layer to redraw a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    /// The page's rendered content is now in the cache
    PageReady { page_index: usize },

    /// The backend could not render the page
    PageFailed { page_index: usize, reason: String },
}

impl ViewerEvent {
    pub fn page_index(&self) -> usize {
        match self {
            Self::PageReady { page_index } | Self::PageFailed { page_index, .. } => *page_index,
        }
    }
}

/// Lifecycle of one page as observed from outside
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageState {
    /// Not requested, or evicted
    #[default]
    Unrequested,

    /// Submitted to the scheduler, not rendered yet
    Pending,

    /// Rendered and in the cache
    Ready,

    /// The last render attempt failed; retried when the page re-enters view
    Failed { reason: String },
}

/// Sizing-only stand-in for a page that is not rendered yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    pub page_index: usize,
    pub width_px: u32,
    pub height_px: u32,
}

/// Borrowed page content, valid only inside the display callback
#[derive(Debug)]
pub enum DisplayPage<'a> {
    Rendered(&'a RenderedPage),
    Placeholder(Placeholder),
}

impl DisplayPage<'_> {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }

    /// Size in pixels, whichever variant this is
    pub fn size_px(&self) -> (u32, u32) {
        match self {
            Self::Rendered(page) => (page.width_px, page.height_px),
            Self::Placeholder(placeholder) => (placeholder.width_px, placeholder.height_px),
        }
    }

    /// Detach from the cache with a defensive copy of any pixels
    pub fn to_owned(&self) -> PageContent {
        match self {
            Self::Rendered(page) => PageContent::Rendered((*page).clone()),
            Self::Placeholder(placeholder) => PageContent::Placeholder(*placeholder),
        }
    }
}

/// Owned page content
#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Rendered(RenderedPage),
    Placeholder(Placeholder),
}

impl PageContent {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    Pending,
    Ready,
    Failed(String),
}

/// Tracked page: the key it was requested with and the request sequence
#[derive(Debug, Clone)]
struct PageSlot {
    key: PageKey,
    sequence: u64,
    state: SlotState,
}

struct ViewState {
    layout: DocumentLayout,
    zoom: ZoomMode,
    rotation: Rotation,
    viewport: Option<ViewportState>,
    visible: Option<VisibleSet>,
}

impl ViewState {
    fn key_for(&self, page_index: usize) -> PageKey {
        PageKey::new(page_index, self.layout.scale(), self.layout.rotation())
    }
}

struct ControllerShared {
    config: ViewerConfig,
    view: Mutex<ViewState>,
    pages: Mutex<HashMap<usize, PageSlot>>,
    subscribers: Mutex<Vec<Sender<ViewerEvent>>>,
    cache: PageCache,
    scheduler: RenderScheduler,
}

impl ControllerShared {
    fn lock_view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pages(&self) -> MutexGuard<'_, HashMap<usize, PageSlot>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn page_count(&self) -> usize {
        self.lock_view().layout.page_count()
    }

    fn check_index(&self, page_index: usize) -> ViewerResult<()> {
        let page_count = self.page_count();
        if page_index >= page_count {
            return Err(ViewerError::OutOfRange {
                page: page_index,
                page_count,
            });
        }
        Ok(())
    }

    /// Bring cache and scheduler in line with a settled viewport
    ///
    /// Lock order: view, pages, then scheduler and cache.
    fn settle(&self, viewport: ViewportState) {
        let mut view = self.lock_view();

        let resolved = view
            .zoom
            .resolve(viewport.viewport_width, view.layout.widest_page());
        // Every page key is built from the layout scale
        let scale = if resolved.is_finite() && resolved > 0.0 {
            resolved
        } else {
            tracing::warn!(resolved, "ignoring unusable zoom scale");
            view.layout.scale()
        };
        let rotation = view.rotation;
        if view.layout.relayout(scale, rotation) {
            tracing::debug!(scale, %rotation, "layout rebuilt");
        }

        let visible = compute_visible_set(
            &viewport,
            &view.layout,
            self.config.max_resident_pages,
            self.config.prefetch_margin,
        );

        let wanted: HashMap<PageKey, RenderPriority> = visible
            .pages
            .iter()
            .map(|&page_index| (view.key_for(page_index), visible.priority_of(page_index)))
            .collect();

        let mut pages = self.lock_pages();

        let cancelled = self.scheduler.cancel_if(|key| !wanted.contains_key(key));
        let evicted = self.cache.evict_if(|key| !wanted.contains_key(key));
        pages.retain(|_, slot| wanted.contains_key(&slot.key));

        let mut order: Vec<(PageKey, RenderPriority)> =
            wanted.iter().map(|(key, priority)| (*key, *priority)).collect();
        order.sort_by_key(|(key, priority)| {
            (
                std::cmp::Reverse(*priority),
                key.page_index.abs_diff(visible.focal),
                key.page_index,
            )
        });

        let mut submitted = 0;
        for (key, priority) in order {
            let state = pages.get(&key.page_index).map(|slot| slot.state.clone());

            // A finished request is cached before it stops being live, so
            // checking the scheduler first leaves no gap for a double render
            if state == Some(SlotState::Pending) && self.scheduler.reprioritize(&key, priority) {
                continue;
            }

            if self.cache.contains(&key) {
                let slot = pages.entry(key.page_index).or_insert(PageSlot {
                    key,
                    sequence: 0,
                    state: SlotState::Ready,
                });
                // A pending slot flips when its ready event is delivered
                if slot.state != SlotState::Pending {
                    slot.state = SlotState::Ready;
                }
                continue;
            }

            // Failed pages retry only after leaving and re-entering view
            if matches!(state, Some(SlotState::Failed(_))) {
                continue;
            }

            let handle = self.scheduler.submit(key, priority);
            submitted += 1;
            pages.insert(
                key.page_index,
                PageSlot {
                    key,
                    sequence: handle.sequence(),
                    state: SlotState::Pending,
                },
            );
        }
        drop(pages);

        tracing::debug!(
            focal = visible.focal,
            pages = ?visible.pages,
            submitted,
            cancelled,
            evicted = evicted.len(),
            "viewport settled"
        );

        view.viewport = Some(viewport);
        view.visible = Some(visible);
    }

    /// Submit a render for a visible page nobody has requested yet
    fn ensure_requested(&self, page_index: usize) {
        let view = self.lock_view();
        let Some(visible) = view.visible.as_ref() else {
            return;
        };
        if !visible.contains(page_index) {
            return;
        }

        let key = view.key_for(page_index);
        let mut pages = self.lock_pages();
        let needs_request = match pages.get(&page_index) {
            None => true,
            Some(slot) if slot.key != key => true,
            // Evicted by capacity after it was marked ready
            Some(slot) => slot.state == SlotState::Ready && !self.cache.contains(&key),
        };

        if needs_request {
            let handle = self.scheduler.submit(key, visible.priority_of(page_index));
            tracing::trace!(page_index, sequence = handle.sequence(), "requested on display");
            pages.insert(
                page_index,
                PageSlot {
                    key,
                    sequence: handle.sequence(),
                    state: SlotState::Pending,
                },
            );
        }
    }

    /// Apply a scheduler notification to the page lifecycle
    ///
    /// Results for requests that have since been superseded are ignored.
    fn on_render_event(&self, event: RenderEvent) {
        let notification = {
            let mut pages = self.lock_pages();

            match event {
                RenderEvent::Ready {
                    key,
                    sequence,
                    evicted,
                } => {
                    for evicted_key in &evicted {
                        let stale = pages
                            .get(&evicted_key.page_index)
                            .is_some_and(|slot| slot.key == *evicted_key && slot.state == SlotState::Ready);
                        if stale {
                            pages.remove(&evicted_key.page_index);
                        }
                    }

                    match pages.get_mut(&key.page_index) {
                        Some(slot)
                            if slot.key == key
                                && slot.sequence == sequence
                                && slot.state == SlotState::Pending =>
                        {
                            slot.state = SlotState::Ready;
                            Some(ViewerEvent::PageReady {
                                page_index: key.page_index,
                            })
                        }
                        _ => {
                            tracing::trace!(%key, sequence, "ignoring stale render result");
                            None
                        }
                    }
                }
                RenderEvent::Failed {
                    key,
                    sequence,
                    error,
                } => match pages.get_mut(&key.page_index) {
                    Some(slot) if slot.key == key && slot.sequence == sequence => {
                        let reason = error.to_string();
                        slot.state = SlotState::Failed(reason.clone());
                        Some(ViewerEvent::PageFailed {
                            page_index: key.page_index,
                            reason,
                        })
                    }
                    _ => None,
                },
            }
        };

        if let Some(notification) = notification {
            self.publish(notification);
        }
    }

    fn publish(&self, event: ViewerEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Entry point for the UI layer
///
/// `on_viewport_changed` and the display calls never wait for rendering;
/// results arrive later as [`ViewerEvent`]s.
///
/// # Example
///
/// ```
/// use pageport_cache::Rotation;
/// use pageport_scheduler::{PageDimensions, PixelBuffer, RenderBackend, RenderError};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use viewer_core::{PageContent, ViewerConfig, ViewerController, ViewerEvent};
///
/// struct Blank;
///
/// impl RenderBackend for Blank {
///     fn page_count(&self) -> usize {
///         100
///     }
///
///     fn page_dimensions(&self, _page: usize) -> Result<PageDimensions, RenderError> {
///         Ok(PageDimensions::new(600.0, 800.0))
///     }
///
///     fn render(&self, _page: usize, scale: f32, rotation: Rotation) -> Result<PixelBuffer, RenderError> {
///         let (w, h) = PageDimensions::new(600.0, 800.0).scaled(scale, rotation);
///         Ok(PixelBuffer::new(Vec::new(), w, h))
///     }
/// }
///
/// let viewer = ViewerController::new(Arc::new(Blank), ViewerConfig::default()).unwrap();
/// let events = viewer.subscribe();
///
/// viewer.on_viewport_changed(0.0, 600.0, 800.0);
/// let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
/// assert!(matches!(first, ViewerEvent::PageReady { .. }));
///
/// let content = viewer.page_for_display(first.page_index()).unwrap();
/// assert!(matches!(content, PageContent::Rendered(_)));
/// ```
pub struct ViewerController {
    shared: Arc<ControllerShared>,
    gate: DebounceGate<ViewportState>,
}

impl ViewerController {
    /// Create a controller for the backend's document
    ///
    /// Reads the page count and every page's dimensions once, and starts the
    /// render worker and debounce threads.
    pub fn new(backend: Arc<dyn RenderBackend>, config: ViewerConfig) -> ViewerResult<Self> {
        config.validate()?;

        let scale = match config.zoom {
            ZoomMode::Scale(scale) => scale,
            // Resolved against the first viewport
            ZoomMode::FitWidth => 1.0,
        };
        let layout =
            DocumentLayout::from_backend(backend.as_ref(), scale, config.rotation, config.page_spacing)?;

        let cache = PageCache::new(config.max_resident_pages);

        let link: Arc<OnceLock<Weak<ControllerShared>>> = Arc::new(OnceLock::new());
        let sink_link = Arc::clone(&link);
        let scheduler = RenderScheduler::start(
            backend,
            cache.clone(),
            Arc::new(move |event: RenderEvent| {
                if let Some(shared) = sink_link.get().and_then(Weak::upgrade) {
                    shared.on_render_event(event);
                }
            }),
        )?;

        tracing::debug!(
            page_count = layout.page_count(),
            max_resident_pages = config.max_resident_pages,
            debounce_ms = config.debounce_delay_ms,
            "viewer created"
        );

        let shared = Arc::new(ControllerShared {
            view: Mutex::new(ViewState {
                layout,
                zoom: config.zoom,
                rotation: config.rotation,
                viewport: None,
                visible: None,
            }),
            config,
            pages: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            cache,
            scheduler,
        });
        let _ = link.set(Arc::downgrade(&shared));

        let gate_shared = Arc::downgrade(&shared);
        let gate = DebounceGate::spawn(shared.config.debounce_delay(), move |viewport: ViewportState| {
            if let Some(shared) = gate_shared.upgrade() {
                shared.settle(viewport);
            }
        })?;

        Ok(Self { shared, gate })
    }

    /// Report a viewport change
    ///
    /// Returns immediately. Render work starts once the viewport has been
    /// quiet for the debounce delay.
    pub fn on_viewport_changed(&self, scroll_offset: f32, viewport_width: f32, viewport_height: f32) {
        self.gate.notify(ViewportState::new(
            scroll_offset,
            viewport_width,
            viewport_height,
        ));
    }

    /// Run the settle logic for `viewport` now, bypassing the debounce gate
    pub fn apply_viewport(&self, viewport: ViewportState) {
        self.shared.settle(viewport);
    }

    /// Run `f` with the page's content, rendered or placeholder
    ///
    /// A rendered page is borrowed from the cache and only valid inside `f`;
    /// `f` must not call back into the controller. On a miss for a page in
    /// the current visible set, a render is requested.
    pub fn with_page_for_display<R>(
        &self,
        page_index: usize,
        f: impl FnOnce(DisplayPage<'_>) -> R,
    ) -> ViewerResult<R> {
        self.shared.check_index(page_index)?;

        let (key, placeholder) = {
            let view = self.shared.lock_view();
            let (width_px, height_px) = view.layout.page_size_px(page_index).unwrap_or((1, 1));
            (
                view.key_for(page_index),
                Placeholder {
                    page_index,
                    width_px,
                    height_px,
                },
            )
        };

        let (output, hit) = self.shared.cache.lookup(&key, |page| match page {
            Some(page) => (f(DisplayPage::Rendered(page)), true),
            None => (f(DisplayPage::Placeholder(placeholder)), false),
        });

        if !hit {
            self.shared.ensure_requested(page_index);
        }
        Ok(output)
    }

    /// The page's content as an owned value
    ///
    /// Rendered pixels are copied out of the cache.
    pub fn page_for_display(&self, page_index: usize) -> ViewerResult<PageContent> {
        self.with_page_for_display(page_index, |page| page.to_owned())
    }

    /// Receive every [`ViewerEvent`] raised from now on
    pub fn subscribe(&self) -> Receiver<ViewerEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Lifecycle state of a page
    ///
    /// Indices beyond the document report [`PageState::Unrequested`].
    pub fn page_state(&self, page_index: usize) -> PageState {
        let pages = self.shared.lock_pages();
        match pages.get(&page_index).map(|slot| &slot.state) {
            None => PageState::Unrequested,
            Some(SlotState::Pending) => PageState::Pending,
            Some(SlotState::Ready) => PageState::Ready,
            Some(SlotState::Failed(reason)) => PageState::Failed {
                reason: reason.clone(),
            },
        }
    }

    /// The visible set of the last settled viewport
    pub fn visible_set(&self) -> Option<VisibleSet> {
        self.shared.lock_view().visible.clone()
    }

    /// The last settled viewport
    pub fn last_viewport(&self) -> Option<ViewportState> {
        self.shared.lock_view().viewport
    }

    /// Change the zoom mode and re-settle the last viewport
    pub fn set_zoom(&self, zoom: ZoomMode) -> ViewerResult<()> {
        if let ZoomMode::Scale(scale) = zoom {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "zoom",
                    value: scale.to_string(),
                }
                .into());
            }
        }

        let viewport = {
            let mut view = self.shared.lock_view();
            view.zoom = zoom;
            if let ZoomMode::Scale(scale) = zoom {
                let rotation = view.rotation;
                view.layout.relayout(scale, rotation);
            }
            view.viewport
        };

        if let Some(viewport) = viewport {
            self.shared.settle(viewport);
        }
        Ok(())
    }

    /// Change page rotation and re-settle the last viewport
    pub fn set_rotation(&self, rotation: Rotation) {
        let viewport = {
            let mut view = self.shared.lock_view();
            view.rotation = rotation;
            let scale = view.layout.scale();
            view.layout.relayout(scale, rotation);
            view.viewport
        };

        if let Some(viewport) = viewport {
            self.shared.settle(viewport);
        }
    }

    pub fn zoom(&self) -> ZoomMode {
        self.shared.lock_view().zoom
    }

    pub fn rotation(&self) -> Rotation {
        self.shared.lock_view().rotation
    }

    /// Render scale currently in effect
    pub fn current_scale(&self) -> f32 {
        self.shared.lock_view().layout.scale()
    }

    /// Scroll offset that puts the top of `page_index` at the top of the viewport
    pub fn scroll_to_page(&self, page_index: usize) -> ViewerResult<f32> {
        let view = self.shared.lock_view();
        let page_count = view.layout.page_count();
        view.layout
            .page_top(page_index)
            .ok_or(ViewerError::OutOfRange {
                page: page_index,
                page_count,
            })
    }

    /// Height of the scrollable document at the current scale
    pub fn total_height(&self) -> f32 {
        self.shared.lock_view().layout.total_height()
    }

    pub fn page_count(&self) -> usize {
        self.shared.page_count()
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.shared.config
    }

    /// Page indices currently held in the cache, least recently used first
    pub fn resident_pages(&self) -> Vec<usize> {
        self.shared
            .cache
            .keys()
            .iter()
            .map(|key| key.page_index)
            .collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.shared.scheduler.stats()
    }

    /// Whether a viewport change is waiting out the debounce delay
    pub fn is_settling(&self) -> bool {
        self.gate.is_pending()
    }

    /// Block until no viewport change is pending and the worker is idle
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.gate.is_pending() {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        self.shared.scheduler.wait_idle(remaining)
    }

    /// Stop the debounce and render threads
    ///
    /// Pending viewport changes and queued renders are discarded. Blocks
    /// until a running backend call returns.
    pub fn shutdown(&mut self) {
        self.gate.stop();
        self.shared.scheduler.shutdown();
    }
}
