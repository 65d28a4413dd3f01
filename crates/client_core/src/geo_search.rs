use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::domain::GeoPoint;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, Notice, NoticeSource},
    fetcher::ResourceFetcher,
    list_controller::{LoadOutcome, DEFAULT_FETCH_TIMEOUT},
    page::FilterSet,
    timer::{ScheduledTask, Timer, TokioTimer},
};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1000);
pub const DEFAULT_TOLERANCE_DEG: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoSearchOptions {
    pub quiet_period: Duration,
    /// Degrees on either axis under which a move counts as jitter.
    pub tolerance: f64,
    pub fetch_timeout: Duration,
}

impl Default for GeoSearchOptions {
    fn default() -> Self {
        Self {
            quiet_period: DEFAULT_QUIET_PERIOD,
            tolerance: DEFAULT_TOLERANCE_DEG,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoSearchState<T> {
    pub markers: Vec<T>,
    pub loading: bool,
    /// Dismissible failure message; markers are kept when it is set.
    pub notice: Option<String>,
    pub last_center: Option<GeoPoint>,
    last_filters: Option<FilterSet>,
    generation: u64,
}

impl<T> Default for GeoSearchState<T> {
    fn default() -> Self {
        Self {
            markers: Vec::new(),
            loading: false,
            notice: None,
            last_center: None,
            last_filters: None,
            generation: 0,
        }
    }
}

struct PendingSearch {
    seq: u64,
    task: Box<dyn ScheduledTask>,
    center: GeoPoint,
    filters: FilterSet,
}

struct GeoSearchCore<T> {
    fetcher: Arc<dyn ResourceFetcher<T>>,
    options: GeoSearchOptions,
    state: watch::Sender<GeoSearchState<T>>,
    notices: broadcast::Sender<Notice>,
    pending: Mutex<Option<PendingSearch>>,
    scheduled: Mutex<u64>,
}

pub struct GeoSearchDebouncer<T> {
    core: Arc<GeoSearchCore<T>>,
    timer: Arc<dyn Timer>,
}

impl<T> GeoSearchDebouncer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: Arc<dyn ResourceFetcher<T>>) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self::new_with_dependencies(
            fetcher,
            Arc::new(TokioTimer),
            GeoSearchOptions::default(),
            notices,
        )
    }

    pub fn new_with_dependencies(
        fetcher: Arc<dyn ResourceFetcher<T>>,
        timer: Arc<dyn Timer>,
        options: GeoSearchOptions,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        let (state, _) = watch::channel(GeoSearchState::default());
        Self {
            core: Arc::new(GeoSearchCore {
                fetcher,
                options,
                state,
                notices,
                pending: Mutex::new(None),
                scheduled: Mutex::new(0),
            }),
            timer,
        }
    }

    pub fn snapshot(&self) -> GeoSearchState<T> {
        self.core.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GeoSearchState<T>> {
        self.core.state.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.core.notices.subscribe()
    }

    /// Restarts the quiet period; the search runs once it elapses without
    /// another viewport change.
    pub fn on_viewport_changed(&self, center: GeoPoint, filters: FilterSet) {
        let seq = {
            let mut scheduled = lock(&self.core.scheduled);
            *scheduled += 1;
            *scheduled
        };

        let core = Arc::clone(&self.core);
        let (fire_center, fire_filters) = (center, filters.clone());

        // Held while scheduling so the callback never observes the previous entry.
        let mut pending = lock(&self.core.pending);
        let task = self.timer.schedule(
            self.core.options.quiet_period,
            Box::pin(async move {
                if core.take_pending(Some(seq)).is_some() {
                    core.execute(fire_center, fire_filters).await;
                }
            }),
        );
        if let Some(previous) = pending.replace(PendingSearch {
            seq,
            task,
            center,
            filters,
        }) {
            previous.task.cancel();
        }
    }

    pub async fn flush(&self) -> LoadOutcome {
        match self.core.take_pending(None) {
            Some(pending) => {
                pending.task.cancel();
                self.core.execute(pending.center, pending.filters).await
            }
            None => LoadOutcome::Skipped,
        }
    }

    pub fn cancel(&self) {
        if let Some(pending) = self.core.take_pending(None) {
            pending.task.cancel();
        }
    }

    pub fn dismiss_notice(&self) {
        self.core
            .state
            .send_if_modified(|state| state.notice.take().is_some());
    }
}

impl<T> Drop for GeoSearchDebouncer<T> {
    fn drop(&mut self) {
        if let Some(pending) = lock(&self.core.pending).take() {
            pending.task.cancel();
        }
    }
}

impl<T> GeoSearchCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn take_pending(&self, seq: Option<u64>) -> Option<PendingSearch> {
        let mut pending = lock(&self.pending);
        match (pending.as_ref(), seq) {
            (Some(current), Some(seq)) if current.seq != seq => None,
            _ => pending.take(),
        }
    }

    async fn execute(&self, center: GeoPoint, filters: FilterSet) -> LoadOutcome {
        let tolerance = self.options.tolerance;
        let mut issued = None;
        self.state.send_if_modified(|state| {
            let unchanged = match (&state.last_center, &state.last_filters) {
                (Some(last_center), Some(last_filters)) => {
                    last_center.is_near(&center, tolerance) && *last_filters == filters
                }
                _ => false,
            };
            if unchanged {
                return false;
            }
            state.generation += 1;
            state.loading = true;
            state.last_center = Some(center);
            state.last_filters = Some(filters.clone());
            issued = Some(state.generation);
            true
        });
        let Some(generation) = issued else {
            debug!(
                latitude = center.latitude,
                longitude = center.longitude,
                "geo search skipped, viewport unchanged"
            );
            return LoadOutcome::Skipped;
        };

        let query = filters.merged(
            &FilterSet::new()
                .with("latitude", center.latitude)
                .with("longitude", center.longitude),
        );
        let timeout = self.options.fetch_timeout;
        let result = match tokio::time::timeout(timeout, self.fetcher.fetch(None, &query)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(timeout)),
        };

        let failure = result.as_ref().err().cloned();
        let applied = self.state.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            state.loading = false;
            match result {
                Ok(page) => {
                    state.markers = page.items;
                    state.notice = None;
                }
                Err(err) => {
                    // Forget the failed center so the same viewport can retry.
                    state.last_center = None;
                    state.last_filters = None;
                    state.notice = Some(err.to_string());
                }
            }
            true
        });

        match (applied, failure) {
            (false, _) => {
                debug!(generation, "stale geo search result discarded");
                LoadOutcome::Discarded
            }
            (true, Some(err)) => {
                warn!(generation, "geo search failed: {err}");
                let _ = self
                    .notices
                    .send(Notice::new(NoticeSource::GeoSearch, err.to_string()));
                LoadOutcome::Failed(err)
            }
            (true, None) => {
                info!(
                    generation,
                    markers = self.state.borrow().markers.len(),
                    latitude = center.latitude,
                    longitude = center.longitude,
                    "geo search applied"
                );
                LoadOutcome::Applied
            }
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/geo_search_tests.rs"]
mod tests;
