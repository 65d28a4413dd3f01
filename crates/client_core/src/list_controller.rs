use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    fetcher::ResourceFetcher,
    page::{Cursor, CursorPage, FilterSet, Identified},
};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    #[default]
    Idle,
    Loading,
    Refreshing,
    LoadingMore,
}

#[derive(Debug, Clone)]
pub struct ListState<T> {
    pub items: Vec<T>,
    pub activity: Activity,
    pub error: Option<ClientError>,
    pub cursor: Option<Cursor>,
    pub filters: FilterSet,
    generation: u64,
}

impl<T> ListState<T> {
    fn new(filters: FilterSet) -> Self {
        Self {
            items: Vec::new(),
            activity: Activity::Idle,
            error: None,
            cursor: None,
            filters,
            generation: 0,
        }
    }

    pub fn loading(&self) -> bool {
        self.activity == Activity::Loading
    }

    pub fn refreshing(&self) -> bool {
        self.activity == Activity::Refreshing
    }

    pub fn loading_more(&self) -> bool {
        self.activity == Activity::LoadingMore
    }

    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    Skipped,
    Discarded,
    Failed(ClientError),
}

pub struct ListController<T: Identified> {
    label: String,
    fetcher: Arc<dyn ResourceFetcher<T>>,
    fetch_timeout: Duration,
    state: watch::Sender<ListState<T>>,
}

impl<T> ListController<T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, fetcher: Arc<dyn ResourceFetcher<T>>) -> Self {
        let (state, _) = watch::channel(ListState::new(FilterSet::new()));
        Self {
            label: label.into(),
            fetcher,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            state,
        }
    }

    pub fn with_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_filters(self, filters: FilterSet) -> Self {
        self.state.send_modify(|state| state.filters = filters);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn snapshot(&self) -> ListState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<T>> {
        self.state.subscribe()
    }

    pub fn updates(&self) -> WatchStream<ListState<T>> {
        WatchStream::new(self.subscribe())
    }

    pub fn item(&self, id: &T::Id) -> Option<T> {
        self.state
            .borrow()
            .items
            .iter()
            .find(|item| &item.id() == id)
            .cloned()
    }

    /// First page, only from an idle controller. A second call while the
    /// first is still in flight is skipped. On failure the list is left empty,
    /// even if an earlier load had populated it.
    pub async fn initial_load(&self) -> LoadOutcome {
        self.run(Activity::Loading).await
    }

    pub async fn refresh(&self) -> LoadOutcome {
        self.run(Activity::Refreshing).await
    }

    /// Appends the next page. Silently skipped when the list is exhausted or
    /// any load is already running.
    pub async fn load_more(&self) -> LoadOutcome {
        self.run(Activity::LoadingMore).await
    }

    pub async fn set_filters(&self, filters: FilterSet) -> LoadOutcome {
        self.state.send_modify(|state| state.filters = filters);
        self.refresh().await
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.state.borrow().items.iter().any(|item| &item.id() == id)
    }

    pub fn update_item(&self, id: &T::Id, edit: impl FnOnce(&mut T)) -> bool {
        self.state.send_if_modified(|state| {
            match state.items.iter_mut().find(|item| &item.id() == id) {
                Some(item) => {
                    edit(item);
                    true
                }
                None => false,
            }
        })
    }

    pub fn prepend(&self, item: T) -> bool {
        self.state.send_if_modified(|state| {
            let id = item.id();
            if state.items.iter().any(|existing| existing.id() == id) {
                return false;
            }
            state.items.insert(0, item);
            true
        })
    }

    pub fn remove_item(&self, id: &T::Id) -> bool {
        self.state.send_if_modified(|state| {
            let before = state.items.len();
            state.items.retain(|item| &item.id() != id);
            state.items.len() != before
        })
    }

    async fn run(&self, activity: Activity) -> LoadOutcome {
        let Some((in_flight, cursor, filters)) = self.begin(activity) else {
            debug!(list = %self.label, ?activity, "list command skipped");
            return LoadOutcome::Skipped;
        };
        let generation = in_flight.generation;

        let result = self.fetch_page(cursor.as_ref(), &filters).await;

        let failure = result.as_ref().err().cloned();
        let applied = in_flight.complete(|state| match result {
            Ok(page) => {
                let count = page.items.len();
                if activity == Activity::LoadingMore {
                    let added = append_unique(&mut state.items, page.items);
                    if added < count {
                        debug!(
                            list = %self.label,
                            dropped = count - added,
                            "dropped items already listed"
                        );
                    }
                } else {
                    state.items.clear();
                    append_unique(&mut state.items, page.items);
                }
                state.cursor = page.next;
                state.error = None;
                info!(
                    list = %self.label,
                    ?activity,
                    generation,
                    items = state.items.len(),
                    has_more = state.cursor.is_some(),
                    "list page applied"
                );
            }
            Err(err) => {
                warn!(list = %self.label, ?activity, generation, "list fetch failed: {err}");
                if activity == Activity::Loading {
                    state.items.clear();
                    state.cursor = None;
                }
                state.error = Some(err);
            }
        });

        match (applied, failure) {
            (false, _) => {
                debug!(list = %self.label, ?activity, generation, "stale list result discarded");
                LoadOutcome::Discarded
            }
            (true, Some(err)) => LoadOutcome::Failed(err),
            (true, None) => LoadOutcome::Applied,
        }
    }

    fn begin(&self, activity: Activity) -> Option<(InFlight<'_, T>, Option<Cursor>, FilterSet)> {
        let mut ticket = None;
        self.state.send_if_modified(|state| {
            let cursor = match activity {
                Activity::Loading if state.activity != Activity::Idle => return false,
                Activity::LoadingMore if state.activity != Activity::Idle => return false,
                Activity::LoadingMore => match &state.cursor {
                    Some(cursor) => Some(cursor.clone()),
                    None => return false,
                },
                _ => None,
            };
            state.generation += 1;
            state.activity = activity;
            ticket = Some((state.generation, cursor, state.filters.clone()));
            true
        });

        ticket.map(|(generation, cursor, filters)| {
            (
                InFlight {
                    state: &self.state,
                    generation,
                    finished: false,
                },
                cursor,
                filters,
            )
        })
    }

    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        filters: &FilterSet,
    ) -> Result<CursorPage<T>, ClientError> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(cursor, filters)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.fetch_timeout)),
        }
    }
}

/// Ownership of the activity flag for one issued fetch. The flag returns to
/// idle on every exit path, including the fetch future being dropped, unless
/// a newer operation has taken it over.
struct InFlight<'a, T> {
    state: &'a watch::Sender<ListState<T>>,
    generation: u64,
    finished: bool,
}

impl<T> InFlight<'_, T> {
    fn complete(mut self, apply: impl FnOnce(&mut ListState<T>)) -> bool {
        self.finished = true;
        let generation = self.generation;
        self.state.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            apply(state);
            state.activity = Activity::Idle;
            true
        })
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let generation = self.generation;
        self.state.send_if_modified(|state| {
            if state.generation != generation || state.activity == Activity::Idle {
                return false;
            }
            state.activity = Activity::Idle;
            true
        });
    }
}

fn append_unique<T: Identified>(items: &mut Vec<T>, incoming: Vec<T>) -> usize {
    let mut seen: HashSet<T::Id> = items.iter().map(Identified::id).collect();
    let before = items.len();
    items.extend(incoming.into_iter().filter(|item| seen.insert(item.id())));
    items.len() - before
}

#[cfg(test)]
#[path = "tests/list_controller_tests.rs"]
mod tests;
