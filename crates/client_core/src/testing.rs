use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::ClientError,
    fetcher::ResourceFetcher,
    page::{Cursor, CursorPage, FilterSet, Identified},
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Item {
    pub id: u32,
    pub label: String,
}

impl Identified for Item {
    type Id = u32;

    fn id(&self) -> u32 {
        self.id
    }
}

pub(crate) fn item(id: u32) -> Item {
    Item {
        id,
        label: format!("item-{id}"),
    }
}

pub(crate) fn page(ids: &[u32], next: Option<&str>) -> Result<CursorPage<Item>, ClientError> {
    Ok(CursorPage::new(
        ids.iter().copied().map(item).collect(),
        next.map(Cursor::new),
    ))
}

pub(crate) fn ids(items: &[Item]) -> Vec<u32> {
    items.iter().map(|item| item.id).collect()
}

pub(crate) struct PendingFetch<T> {
    pub cursor: Option<Cursor>,
    pub filters: FilterSet,
    reply: oneshot::Sender<Result<CursorPage<T>, ClientError>>,
}

impl<T> PendingFetch<T> {
    pub fn respond(self, result: Result<CursorPage<T>, ClientError>) {
        let _ = self.reply.send(result);
    }
}

/// Answers from a queue of scripted replies; once the queue is empty every
/// fetch parks until the test picks it up with [`ScriptedFetcher::next_request`].
pub(crate) struct ScriptedFetcher<T> {
    scripted: Mutex<VecDeque<Result<CursorPage<T>, ClientError>>>,
    calls: Mutex<Vec<(Option<Cursor>, FilterSet)>>,
    requests: mpsc::UnboundedSender<PendingFetch<T>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<PendingFetch<T>>>,
}

impl<T> ScriptedFetcher<T> {
    pub fn gated() -> Self {
        let (requests, incoming) = mpsc::unbounded_channel();
        Self {
            scripted: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            requests,
            incoming: tokio::sync::Mutex::new(incoming),
        }
    }

    pub fn replying(replies: Vec<Result<CursorPage<T>, ClientError>>) -> Self {
        let fetcher = Self::gated();
        fetcher.scripted.lock().expect("scripted").extend(replies);
        fetcher
    }

    pub fn push_reply(&self, reply: Result<CursorPage<T>, ClientError>) {
        self.scripted.lock().expect("scripted").push_back(reply);
    }

    pub fn calls(&self) -> Vec<(Option<Cursor>, FilterSet)> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls").len()
    }

    pub async fn next_request(&self) -> PendingFetch<T> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .expect("a fetch should have been issued")
    }
}

#[async_trait]
impl<T: Send + Sync> ResourceFetcher<T> for ScriptedFetcher<T> {
    async fn fetch(
        &self,
        cursor: Option<&Cursor>,
        filters: &FilterSet,
    ) -> Result<CursorPage<T>, ClientError> {
        self.calls
            .lock()
            .expect("calls")
            .push((cursor.cloned(), filters.clone()));

        let scripted = self.scripted.lock().expect("scripted").pop_front();
        if let Some(reply) = scripted {
            return reply;
        }

        let (reply, response) = oneshot::channel();
        let _ = self.requests.send(PendingFetch {
            cursor: cursor.cloned(),
            filters: filters.clone(),
            reply,
        });
        response
            .await
            .unwrap_or_else(|_| Err(ClientError::Network("fetch abandoned".into())))
    }
}
