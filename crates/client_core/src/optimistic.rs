use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    error::{ClientError, Notice, NoticeSource},
    fetcher::MutationCaller,
    interaction::Interaction,
    list_controller::ListController,
    page::Identified,
};

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionState<V> {
    pub committed: V,
    pub pending: V,
    pub in_flight: bool,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<V> {
    Committed(V),
    RolledBack(ClientError),
    Superseded,
    NotFound,
}

pub struct OptimisticMutator<T: Identified, V> {
    label: String,
    list: Arc<ListController<T>>,
    read: fn(&T) -> V,
    write: fn(&mut T, V),
    records: Mutex<HashMap<T::Id, InteractionState<V>>>,
    notices: broadcast::Sender<Notice>,
}

impl<T, V> OptimisticMutator<T, V>
where
    T: Identified + Clone + Send + Sync + 'static,
    V: Interaction,
{
    pub fn new(
        label: impl Into<String>,
        list: Arc<ListController<T>>,
        read: fn(&T) -> V,
        write: fn(&mut T, V),
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            label: label.into(),
            list,
            read,
            write,
            records: Mutex::new(HashMap::new()),
            notices,
        }
    }

    pub fn with_notice_sender(mut self, notices: broadcast::Sender<Notice>) -> Self {
        self.notices = notices;
        self
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn list(&self) -> &Arc<ListController<T>> {
        &self.list
    }

    pub fn interaction_state(&self, id: &T::Id) -> Option<InteractionState<V>> {
        self.records().get(id).cloned()
    }

    /// Displays the predicted value immediately, then reconciles with the
    /// value `remote` resolves to, or rolls back when it fails.
    ///
    /// `remote` receives the resolved action: proposing the action already
    /// in effect sends the neutral one.
    pub async fn apply<F, Fut>(&self, id: T::Id, proposed: V::Action, remote: F) -> MutationOutcome<V>
    where
        F: FnOnce(V::Action) -> Fut,
        Fut: Future<Output = Result<V, ClientError>>,
    {
        let (action, generation) = {
            let mut records = self.records();
            let Some(item) = self.list.item(&id) else {
                debug!(mutation = %self.label, ?id, "interaction on unlisted item ignored");
                return MutationOutcome::NotFound;
            };
            records.retain(|listed, record| record.in_flight || self.list.contains(listed));
            let displayed = (self.read)(&item);
            let action = displayed.resolve(proposed);
            let predicted = displayed.predict(&action);

            let record = records
                .entry(id.clone())
                .or_insert_with(|| InteractionState {
                    committed: displayed.clone(),
                    pending: displayed.clone(),
                    in_flight: false,
                    generation: 0,
                });
            if !record.in_flight {
                record.committed = displayed;
            }
            record.pending = predicted.clone();
            record.in_flight = true;
            record.generation += 1;
            let generation = record.generation;

            self.display(&id, predicted);
            (action, generation)
        };

        let result = remote(action).await;

        let mut records = self.records();
        let Some(record) = records.get_mut(&id) else {
            return MutationOutcome::Superseded;
        };
        if record.generation != generation {
            if let (Ok(canonical), true) = (&result, record.in_flight) {
                record.committed = canonical.clone();
            }
            debug!(mutation = %self.label, ?id, generation, "superseded interaction result dropped");
            return MutationOutcome::Superseded;
        }

        record.in_flight = false;
        match result {
            Ok(canonical) => {
                record.committed = canonical.clone();
                record.pending = canonical.clone();
                self.display(&id, canonical.clone());
                MutationOutcome::Committed(canonical)
            }
            Err(err) => {
                match self.list.item(&id).map(|item| (self.read)(&item)) {
                    // A reload replaced the prediction; keep the newer value.
                    Some(shown) if shown != record.pending => {
                        record.committed = shown.clone();
                        record.pending = shown;
                    }
                    _ => {
                        let committed = record.committed.clone();
                        record.pending = committed.clone();
                        self.display(&id, committed);
                    }
                }
                warn!(mutation = %self.label, ?id, "interaction rolled back: {err}");
                let _ = self.notices.send(Notice::new(
                    NoticeSource::Mutation,
                    format!("{} failed: {err}", self.label),
                ));
                MutationOutcome::RolledBack(err)
            }
        }
    }

    pub async fn apply_with(
        &self,
        id: T::Id,
        proposed: V::Action,
        caller: &dyn MutationCaller<T::Id, V::Action, V>,
    ) -> MutationOutcome<V> {
        let target = id.clone();
        self.apply(id, proposed, |action| async move { caller.call(&target, &action).await })
            .await
    }

    fn display(&self, id: &T::Id, value: V) {
        let write = self.write;
        self.list.update_item(id, |item| write(item, value));
    }

    fn records(&self) -> MutexGuard<'_, HashMap<T::Id, InteractionState<V>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/optimistic_tests.rs"]
mod tests;
