use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use client_core::{
    Activity, ClientError, Cursor, CursorPage, FilterSet, GeoSearchDebouncer, Identified,
    ListController, LoadOutcome, MutationOutcome, NoticeSource, OptimisticMutator,
    ResourceFetcher,
};
use shared::{
    domain::{GeoPoint, ReactionKind},
    protocol::Reaction,
};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
struct Listing {
    id: u64,
    reaction: Reaction,
}

impl Identified for Listing {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }
}

type PageKey = Option<String>;

/// In-memory paginated catalog keyed by cursor.
#[derive(Default)]
struct Catalog {
    pages: HashMap<PageKey, (Vec<u64>, Option<String>)>,
    delays: Mutex<HashMap<PageKey, Duration>>,
    fail_once: Mutex<HashSet<PageKey>>,
    calls: Mutex<Vec<(PageKey, FilterSet)>>,
}

impl Catalog {
    fn page(mut self, cursor: Option<&str>, ids: &[u64], next: Option<&str>) -> Self {
        self.pages.insert(
            cursor.map(str::to_string),
            (ids.to_vec(), next.map(str::to_string)),
        );
        self
    }

    fn delay(&self, cursor: Option<&str>, delay: Duration) {
        self.delays
            .lock()
            .expect("delays")
            .insert(cursor.map(str::to_string), delay);
    }

    fn fail_once(&self, cursor: Option<&str>) {
        self.fail_once
            .lock()
            .expect("failures")
            .insert(cursor.map(str::to_string));
    }

    fn calls(&self) -> Vec<(PageKey, FilterSet)> {
        self.calls.lock().expect("calls").clone()
    }
}

#[async_trait]
impl ResourceFetcher<Listing> for Catalog {
    async fn fetch(
        &self,
        cursor: Option<&Cursor>,
        filters: &FilterSet,
    ) -> Result<CursorPage<Listing>, ClientError> {
        let key = cursor.map(|cursor| cursor.as_str().to_string());
        self.calls
            .lock()
            .expect("calls")
            .push((key.clone(), filters.clone()));

        let delay = self.delays.lock().expect("delays").get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_once.lock().expect("failures").remove(&key) {
            return Err(ClientError::Network("connection reset".into()));
        }

        let (ids, next) = self.pages.get(&key).cloned().unwrap_or_default();
        let items = ids
            .into_iter()
            .map(|id| Listing {
                id,
                reaction: Reaction::default(),
            })
            .collect();
        Ok(CursorPage::new(items, next.map(Cursor::new)))
    }
}

fn three_page_catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::default()
            .page(None, &[1, 2, 3], Some("p2"))
            .page(Some("p2"), &[3, 4, 5], Some("p3"))
            .page(Some("p3"), &[6], None),
    )
}

fn listings(catalog: &Arc<Catalog>) -> Arc<ListController<Listing>> {
    Arc::new(ListController::new(
        "listings",
        catalog.clone() as Arc<dyn ResourceFetcher<Listing>>,
    ))
}

fn ids(list: &ListController<Listing>) -> Vec<u64> {
    list.snapshot().items.iter().map(|item| item.id).collect()
}

#[tokio::test]
async fn paging_through_overlapping_pages_lists_each_item_once() {
    let catalog = three_page_catalog();
    let list = listings(&catalog);

    assert_eq!(list.initial_load().await, LoadOutcome::Applied);
    assert_eq!(list.load_more().await, LoadOutcome::Applied);
    assert_eq!(ids(&list), vec![1, 2, 3, 4, 5]);
    assert_eq!(list.load_more().await, LoadOutcome::Applied);
    assert_eq!(ids(&list), vec![1, 2, 3, 4, 5, 6]);

    let state = list.snapshot();
    assert!(!state.has_more());
    assert_eq!(state.activity, Activity::Idle);

    assert_eq!(list.load_more().await, LoadOutcome::Skipped);
    assert_eq!(catalog.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn refresh_during_slow_load_more_wins() {
    let catalog = three_page_catalog();
    let list = listings(&catalog);
    list.initial_load().await;

    catalog.delay(Some("p2"), Duration::from_millis(500));
    catalog.delay(None, Duration::from_millis(100));

    let more = tokio::spawn({
        let list = Arc::clone(&list);
        async move { list.load_more().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(list.snapshot().activity, Activity::LoadingMore);

    let refresh = tokio::spawn({
        let list = Arc::clone(&list);
        async move { list.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let state = list.snapshot();
    assert!(state.refreshing());
    assert!(!state.loading_more());

    assert_eq!(refresh.await.expect("refresh task"), LoadOutcome::Applied);
    assert_eq!(more.await.expect("load_more task"), LoadOutcome::Discarded);

    let state = list.snapshot();
    assert_eq!(ids(&list), vec![1, 2, 3]);
    assert_eq!(state.activity, Activity::Idle);
    assert_eq!(state.cursor, Some(Cursor::new("p2")));
}

#[tokio::test]
async fn failed_page_is_retried_without_losing_progress() {
    let catalog = three_page_catalog();
    let list = listings(&catalog);
    list.initial_load().await;
    catalog.fail_once(Some("p2"));

    let outcome = list.load_more().await;
    assert_eq!(
        outcome,
        LoadOutcome::Failed(ClientError::Network("connection reset".into()))
    );
    let state = list.snapshot();
    assert_eq!(ids(&list), vec![1, 2, 3]);
    assert!(state.error.is_some());
    assert_eq!(state.cursor, Some(Cursor::new("p2")));
    assert_eq!(state.activity, Activity::Idle);

    assert_eq!(list.load_more().await, LoadOutcome::Applied);
    assert_eq!(ids(&list), vec![1, 2, 3, 4, 5]);
    assert!(list.snapshot().error.is_none());
}

#[tokio::test]
async fn filter_change_restarts_from_first_page() {
    let catalog = three_page_catalog();
    let list = listings(&catalog);
    list.initial_load().await;
    list.load_more().await;

    let outcome = list
        .set_filters(FilterSet::new().with("city", "Nantes").with("rooms", 2))
        .await;
    assert_eq!(outcome, LoadOutcome::Applied);
    assert_eq!(ids(&list), vec![1, 2, 3]);

    let (cursor, filters) = catalog.calls().pop().expect("refetch");
    assert_eq!(cursor, None);
    assert_eq!(filters.get("city"), Some("Nantes"));
    assert_eq!(filters.get("rooms"), Some("2"));
}

#[tokio::test]
async fn failed_reaction_is_shown_then_rolled_back() {
    let catalog = three_page_catalog();
    let list = listings(&catalog);
    list.initial_load().await;

    let reactions = OptimisticMutator::new(
        "reaction",
        Arc::clone(&list),
        |item: &Listing| item.reaction.clone(),
        |item: &mut Listing, reaction| item.reaction = reaction,
    );
    let mut notices = reactions.subscribe_notices();

    let (release, gate) = oneshot::channel::<Result<Reaction, ClientError>>();
    let pending = reactions.apply(2, ReactionKind::Like, |action| async move {
        assert_eq!(action, ReactionKind::Like);
        gate.await.expect("gate")
    });
    tokio::pin!(pending);

    tokio::select! {
        _ = &mut pending => panic!("resolved before the server answered"),
        _ = tokio::task::yield_now() => {}
    }
    let shown = list.item(&2).expect("item 2");
    assert_eq!(shown.reaction.kind, ReactionKind::Like);
    assert_eq!(shown.reaction.likes, 1);

    release
        .send(Err(ClientError::Server {
            status: 500,
            message: "boom".into(),
        }))
        .expect("release");
    assert!(matches!(pending.await, MutationOutcome::RolledBack(_)));

    assert_eq!(list.item(&2).expect("item 2").reaction, Reaction::default());
    let notice = notices.recv().await.expect("notice");
    assert_eq!(notice.source, NoticeSource::Mutation);
}

#[tokio::test(start_paused = true)]
async fn map_panning_burst_issues_a_single_search() {
    let catalog = Arc::new(Catalog::default().page(None, &[7, 8], None));
    let geo = GeoSearchDebouncer::new(catalog.clone() as Arc<dyn ResourceFetcher<Listing>>);

    for step in 0..4 {
        geo.on_viewport_changed(
            GeoPoint::new(48.85 + f64::from(step) * 0.1, 2.35),
            FilterSet::new(),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(catalog.calls().is_empty());

    let mut rx = geo.subscribe();
    rx.wait_for(|state| !state.markers.is_empty())
        .await
        .expect("markers");

    let calls = catalog.calls();
    assert_eq!(calls.len(), 1);
    let latitude: f64 = calls[0]
        .1
        .get("latitude")
        .and_then(|raw| raw.parse().ok())
        .expect("latitude");
    assert!((latitude - 49.15).abs() < 1e-9);

    // Same center again is within tolerance and not searched.
    geo.on_viewport_changed(GeoPoint::new(latitude, 2.35), FilterSet::new());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(catalog.calls().len(), 1);
}
