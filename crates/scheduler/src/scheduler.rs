//! Single-worker render scheduler
//!
//! All backend render calls run on one dedicated worker thread, one request
//! at a time, which caps peak memory from concurrent decode/render work.
//! Requests for the same [`PageKey`] are coalesced, and superseded requests
//! are cancelled by flag so they never reach the page cache.

use crate::backend::{RenderBackend, RenderError};
use crate::cancel::{RequestShared, RequestStatus};
use crate::queue::{PendingRequest, RenderPriority, RequestQueue};
use pageport_cache::{PageCache, PageKey, RenderedPage};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Notification raised by the worker when a request finishes
///
/// Cancelled requests raise nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// The page was rendered and inserted into the page cache
    Ready {
        key: PageKey,
        sequence: u64,
        /// Keys pushed out of the cache by this insertion
        evicted: Vec<PageKey>,
    },

    /// The backend could not render the page
    Failed {
        key: PageKey,
        sequence: u64,
        error: RenderError,
    },
}

impl RenderEvent {
    /// Key of the finished request
    pub fn key(&self) -> PageKey {
        match self {
            Self::Ready { key, .. } | Self::Failed { key, .. } => *key,
        }
    }

    /// Sequence number of the finished request
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Ready { sequence, .. } | Self::Failed { sequence, .. } => *sequence,
        }
    }
}

/// Callback receiving [`RenderEvent`]s on the worker thread
pub type EventSink = Arc<dyn Fn(RenderEvent) + Send + Sync>;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Requests accepted as new work
    pub submitted: u64,

    /// Submits folded into an existing request for the same key
    pub coalesced: u64,

    /// Requests rendered and inserted into the cache
    pub completed: u64,

    /// Requests the backend failed
    pub failed: u64,

    /// Requests cancelled before their result was published
    pub cancelled: u64,

    /// Number of backend render calls made
    pub backend_calls: u64,

    /// Requests currently queued
    pub queue_len: usize,

    /// Whether a backend call is in progress
    pub in_flight: bool,
}

/// Handle to a submitted render request
///
/// Coalesced submits receive handles to the same underlying request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    key: PageKey,
    sequence: u64,
    shared: Arc<RequestShared>,
}

impl RequestHandle {
    fn new(request: &PendingRequest) -> Self {
        Self {
            key: request.key,
            sequence: request.sequence,
            shared: Arc::clone(&request.shared),
        }
    }

    /// Key this request renders
    pub fn key(&self) -> PageKey {
        self.key
    }

    /// Scheduler sequence number of the request
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Current status
    pub fn status(&self) -> RequestStatus {
        self.shared.status()
    }

    /// Whether the request has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Cancel the request
    ///
    /// A queued request is dropped without calling the backend. A running
    /// request finishes but its result is discarded.
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    /// Whether both handles refer to the same request
    pub fn same_request(&self, other: &RequestHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

struct SchedulerState {
    queue: RequestQueue,
    in_flight: Option<PendingRequest>,
    next_sequence: u64,
    stats: SchedulerStats,
    shutdown: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    work_available: Condvar,
    idle: Condvar,
    cache: PageCache,
    backend: Arc<dyn RenderBackend>,
    sink: EventSink,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Render scheduler with exactly one worker
///
/// # Example
///
/// ```
/// use pageport_cache::{PageCache, PageKey, Rotation};
/// use pageport_scheduler::{
///     PageDimensions, PixelBuffer, RenderBackend, RenderError, RenderEvent, RenderPriority,
///     RenderScheduler,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Blank;
///
/// impl RenderBackend for Blank {
///     fn page_count(&self) -> usize {
///         10
///     }
///
///     fn page_dimensions(&self, _page: usize) -> Result<PageDimensions, RenderError> {
///         Ok(PageDimensions::new(10.0, 10.0))
///     }
///
///     fn render(&self, _page: usize, _scale: f32, _rotation: Rotation) -> Result<PixelBuffer, RenderError> {
///         Ok(PixelBuffer::new(vec![0u8; 400], 10, 10))
///     }
/// }
///
/// let cache = PageCache::new(3);
/// let scheduler = RenderScheduler::start(Arc::new(Blank), cache.clone(), Arc::new(|_: RenderEvent| {}))
///     .expect("worker thread");
///
/// let key = PageKey::new(0, 1.0, Rotation::Deg0);
/// scheduler.submit(key, RenderPriority::Focal);
///
/// assert!(scheduler.wait_idle(Duration::from_secs(5)));
/// assert!(cache.contains(&key));
/// ```
pub struct RenderScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RenderScheduler {
    /// Start a scheduler and its worker thread
    ///
    /// Completed renders are inserted into `cache`; `sink` is called on the
    /// worker thread for every completed or failed request.
    pub fn start(
        backend: Arc<dyn RenderBackend>,
        cache: PageCache,
        sink: EventSink,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                queue: RequestQueue::new(),
                in_flight: None,
                next_sequence: 1,
                stats: SchedulerStats::default(),
                shutdown: false,
            }),
            work_available: Condvar::new(),
            idle: Condvar::new(),
            cache,
            backend,
            sink,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("pageport-render-worker".to_string())
            .spawn(move || run_worker(worker_shared))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Submit a render request
    ///
    /// If a live request for the same key is queued or running, its handle
    /// is returned instead of creating new work; a queued request is raised
    /// to `priority` if that is higher.
    pub fn submit(&self, key: PageKey, priority: RenderPriority) -> RequestHandle {
        let mut state = self.shared.lock();

        if let Some(running) = state.in_flight.as_ref() {
            if running.key == key && running.shared.is_live() {
                let handle = RequestHandle::new(running);
                state.stats.coalesced += 1;
                tracing::trace!(%key, sequence = handle.sequence, "coalesced onto running request");
                return handle;
            }
        }

        if let Some(queued) = state.queue.get(&key) {
            if queued.shared.is_live() {
                let handle = RequestHandle::new(queued);
                state.queue.upgrade(&key, priority);
                state.stats.coalesced += 1;
                tracing::trace!(%key, sequence = handle.sequence, "coalesced onto queued request");
                return handle;
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let request = PendingRequest::new(key, sequence, priority);
        let handle = RequestHandle::new(&request);

        if state.shutdown {
            request.shared.mark_cancelled();
            return handle;
        }

        state.queue.push(request);
        state.stats.submitted += 1;
        drop(state);

        tracing::trace!(%key, sequence, ?priority, "queued render request");
        self.shared.work_available.notify_one();
        handle
    }

    /// Raise the priority of a live request without ever creating one
    ///
    /// Returns `false` if no live request for `key` is queued or running.
    pub fn reprioritize(&self, key: &PageKey, priority: RenderPriority) -> bool {
        let mut state = self.shared.lock();

        let running = state
            .in_flight
            .as_ref()
            .is_some_and(|r| r.key == *key && r.shared.is_live());
        let queued = state.queue.get(key).is_some_and(|r| r.shared.is_live());

        if queued {
            state.queue.upgrade(key, priority);
        }
        if running || queued {
            state.stats.coalesced += 1;
        }
        running || queued
    }

    /// Cancel any queued or running request for `key`
    ///
    /// A queued request is removed and will never reach the backend. A
    /// running request finishes, but its result is discarded. Returns `true`
    /// if a live request was found.
    pub fn cancel(&self, key: &PageKey) -> bool {
        self.cancel_if(|candidate| candidate == key) > 0
    }

    /// Cancel every queued or running request whose key matches `predicate`
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&PageKey) -> bool,
    {
        let mut state = self.shared.lock();
        let mut cancelled = 0;

        for request in state.queue.remove_if(&predicate) {
            if request.shared.mark_cancelled() {
                cancelled += 1;
                tracing::trace!(key = %request.key, sequence = request.sequence, "cancelled queued request");
            }
        }
        state.stats.cancelled += cancelled as u64;

        // The worker counts the running request when it sees the flag
        if let Some(running) = state.in_flight.as_ref() {
            if predicate(&running.key) && running.shared.is_live() {
                running.shared.token.cancel();
                cancelled += 1;
                tracing::trace!(key = %running.key, sequence = running.sequence, "cancelled running request");
            }
        }

        if state.queue.is_empty() && state.in_flight.is_none() {
            self.shared.idle.notify_all();
        }

        cancelled
    }

    /// Whether a live request for `key` is queued or running
    pub fn is_pending(&self, key: &PageKey) -> bool {
        let state = self.shared.lock();
        let queued = state
            .queue
            .get(key)
            .is_some_and(|r| r.shared.is_live());
        let running = state
            .in_flight
            .as_ref()
            .is_some_and(|r| r.key == *key && r.shared.is_live());
        queued || running
    }

    /// Keys of all queued or running requests
    pub fn pending_keys(&self) -> Vec<PageKey> {
        let state = self.shared.lock();
        let mut keys = state.queue.keys();
        if let Some(running) = state.in_flight.as_ref().filter(|r| r.shared.is_live()) {
            keys.push(running.key);
        }
        keys
    }

    /// Number of queued requests, excluding the running one
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.lock();
        let mut stats = state.stats.clone();
        stats.queue_len = state.queue.len();
        stats.in_flight = state.in_flight.is_some();
        stats
    }

    /// The cache completed renders are inserted into
    pub fn cache(&self) -> &PageCache {
        &self.shared.cache
    }

    /// Block until the queue is empty and no request is running
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        loop {
            if state.queue.is_empty() && state.in_flight.is_none() {
                return true;
            }
            if state.shutdown {
                return state.in_flight.is_none();
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            state = self
                .shared
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Whether the scheduler has been shut down
    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Queued requests are cancelled. A running backend call is allowed to
    /// finish and its result is discarded; this blocks until it does.
    pub fn shutdown(&self) {
        self.signal_shutdown();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                tracing::warn!("render worker exited with a panic");
            }
        }
    }

    fn signal_shutdown(&self) {
        let mut state = self.shared.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;

        let mut cancelled = 0;
        for request in state.queue.drain() {
            if request.shared.mark_cancelled() {
                cancelled += 1;
            }
        }
        state.stats.cancelled += cancelled;
        if let Some(running) = state.in_flight.as_ref() {
            running.shared.token.cancel();
        }
        drop(state);

        tracing::debug!(cancelled, "render scheduler shutting down");
        self.shared.work_available.notify_all();
        self.shared.idle.notify_all();
    }
}

impl Drop for RenderScheduler {
    /// Signals the worker to stop without waiting for a running backend call
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

/// Main worker loop
///
/// Pulls one request at a time, skips cancelled ones without touching the
/// backend, and publishes results into the cache under the scheduler lock
/// so a concurrent cancel either discards the result or sees it cached.
fn run_worker(shared: Arc<Shared>) {
    loop {
        let request = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }

                if let Some(request) = state.queue.pop() {
                    if request.shared.token.is_cancelled() {
                        if request.shared.mark_cancelled() {
                            state.stats.cancelled += 1;
                        }
                        tracing::trace!(key = %request.key, "dropped cancelled request");
                        continue;
                    }

                    request.shared.set_status(RequestStatus::Running);
                    state.stats.backend_calls += 1;
                    state.in_flight = Some(request.clone());
                    break request;
                }

                shared.idle.notify_all();
                state = shared
                    .work_available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let key = request.key;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            shared
                .backend
                .render(key.page_index, key.scale(), key.rotation)
        }))
        .unwrap_or_else(|_| Err(RenderError::Failed("render backend panicked".to_string())));

        let event = {
            let mut state = shared.lock();

            if request.shared.token.is_cancelled() {
                if request.shared.mark_cancelled() {
                    state.stats.cancelled += 1;
                }
                tracing::trace!(%key, "discarded result of cancelled request");
                None
            } else {
                match result {
                    Ok(buffer) => {
                        let page = RenderedPage::new(
                            key,
                            buffer.pixels,
                            buffer.width_px,
                            buffer.height_px,
                            request.sequence,
                        );
                        let evicted = shared.cache.put(page);
                        request.shared.set_status(RequestStatus::Completed);
                        state.stats.completed += 1;
                        tracing::debug!(%key, sequence = request.sequence, "page rendered");
                        Some(RenderEvent::Ready {
                            key,
                            sequence: request.sequence,
                            evicted,
                        })
                    }
                    Err(error) => {
                        request.shared.set_status(RequestStatus::Failed);
                        state.stats.failed += 1;
                        tracing::warn!(%key, %error, "page render failed");
                        Some(RenderEvent::Failed {
                            key,
                            sequence: request.sequence,
                            error,
                        })
                    }
                }
            }
        };

        if let Some(event) = event {
            if panic::catch_unwind(AssertUnwindSafe(|| (shared.sink)(event))).is_err() {
                tracing::warn!(%key, "render event sink panicked");
            }
        }

        // Idle only once observers have seen the result
        shared.lock().in_flight = None;
    }
}
