use super::*;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use shared::{
    domain::{PostId, ReactionKind},
    protocol::{ReadMark, Reaction},
};
use std::collections::HashMap;
use tokio::net::TcpListener;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Listing {
    id: u32,
    title: String,
}

fn listings(ids: &[u32]) -> Vec<Listing> {
    ids.iter()
        .map(|id| Listing {
            id: *id,
            title: format!("listing {id}"),
        })
        .collect()
}

#[derive(Clone)]
struct ServerState {
    base: String,
}

async fn posts(
    State(state): State<ServerState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    match query.get("cursor").map(String::as_str) {
        None => Json(json!({
            "results": listings(&[1, 2]),
            "next": format!("{}/api/posts/?cursor=abc", state.base),
        })),
        Some("abc") => Json(json!({ "results": listings(&[3]), "next": null })),
        Some(_) => Json(json!({ "results": [], "next": null })),
    }
}

async fn houses(Query(query): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    let page: u32 = query
        .get("page")
        .and_then(|page| page.parse().ok())
        .unwrap_or(1);
    let city = query.get("city").cloned().unwrap_or_default();
    match page {
        1 => Json(json!({
            "items": [{ "id": 10, "title": city }],
            "next": "/api/houses/?page=2",
            "count": 2
        })),
        _ => Json(json!({ "items": [{ "id": 11, "title": city }], "next": null })),
    }
}

async fn chats(headers: HeaderMap) -> impl IntoResponse {
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some("Bearer t0k");
    if authorized {
        (
            StatusCode::OK,
            Json(json!({ "results": listings(&[5]), "next": null })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Authentication credentials were not provided." })),
        )
    }
}

async fn broken() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, "upstream down")
}

async fn malformed() -> Json<serde_json::Value> {
    Json(json!({ "unexpected": true }))
}

#[derive(Deserialize)]
struct ActionBody {
    action: ReactionKind,
}

async fn react(Path(id): Path<i64>, Json(body): Json<ActionBody>) -> impl IntoResponse {
    if id == 13 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "reactions are closed" })),
        )
            .into_response();
    }
    let likes = if body.action == ReactionKind::Like { 42 } else { 41 };
    Json(Reaction {
        kind: body.action,
        likes,
        dislikes: 0,
    })
    .into_response()
}

async fn mark_read(mut multipart: Multipart) -> Json<ReadMark> {
    let mut read = false;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("action") {
            read = field.text().await.map(|text| text == "true").unwrap_or(false);
        }
    }
    Json(ReadMark { read })
}

async fn spawn_api_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let base = format!("http://{addr}");
    let app = Router::new()
        .route("/api/posts/", get(posts))
        .route("/api/houses/", get(houses))
        .route("/api/chats/", get(chats))
        .route("/api/broken/", get(broken))
        .route("/api/malformed/", get(malformed))
        .route("/api/posts/:id/reaction/", post(react))
        .route("/api/notices/:id/read/", post(mark_read))
        .with_state(ServerState { base: base.clone() });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("{base}/api")
}

#[tokio::test]
async fn next_url_cursor_is_followed_verbatim() {
    let base = spawn_api_server().await;
    let client = RestClient::new(&base).expect("client");
    let fetcher = RestResourceFetcher::<Listing>::new(client, "posts/", CursorStyle::NextUrl);

    let first = fetcher.fetch(None, &FilterSet::new()).await.expect("page 1");
    assert_eq!(first.items, listings(&[1, 2]));
    let cursor = first.next.expect("more pages");
    assert!(cursor.as_str().ends_with("/api/posts/?cursor=abc"));

    let second = fetcher
        .fetch(Some(&cursor), &FilterSet::new())
        .await
        .expect("page 2");
    assert_eq!(second.items, listings(&[3]));
    assert!(second.next.is_none());
}

#[tokio::test]
async fn page_number_cursor_keeps_filters() {
    let base = spawn_api_server().await;
    let client = RestClient::new(&base).expect("client");
    let fetcher = RestResourceFetcher::<Listing>::new(client, "houses/", CursorStyle::PageNumber);
    let filters = FilterSet::new().with("city", "Lyon");

    let first = fetcher.fetch(None, &filters).await.expect("page 1");
    assert_eq!(first.items[0].title, "Lyon");
    assert_eq!(first.next, Some(Cursor::new("2")));

    let second = fetcher
        .fetch(first.next.as_ref(), &filters)
        .await
        .expect("page 2");
    assert_eq!(second.items[0].id, 11);
    assert_eq!(second.items[0].title, "Lyon");
    assert!(second.next.is_none());
}

#[tokio::test]
async fn bearer_token_is_sent_and_401_maps_to_server_error() {
    let base = spawn_api_server().await;

    let anonymous = RestResourceFetcher::<Listing>::new(
        RestClient::new(&base).expect("client"),
        "chats/",
        CursorStyle::NextUrl,
    );
    let err = anonymous
        .fetch(None, &FilterSet::new())
        .await
        .expect_err("must be rejected");
    assert_eq!(
        err,
        ClientError::Server {
            status: 401,
            message: "Authentication credentials were not provided.".into(),
        }
    );

    let signed_in = RestResourceFetcher::<Listing>::new(
        RestClient::new(&base).expect("client").with_auth_token("t0k"),
        "chats/",
        CursorStyle::NextUrl,
    );
    let page = signed_in
        .fetch(None, &FilterSet::new())
        .await
        .expect("authorized");
    assert_eq!(page.items, listings(&[5]));
}

#[tokio::test]
async fn non_json_error_and_bad_payload_are_distinguished() {
    let base = spawn_api_server().await;
    let client = RestClient::new(&base).expect("client");

    let err = RestResourceFetcher::<Listing>::new(client.clone(), "broken/", CursorStyle::NextUrl)
        .fetch(None, &FilterSet::new())
        .await
        .expect_err("502");
    assert!(matches!(err, ClientError::Server { status: 502, .. }));
    assert!(err.is_retryable());

    let err = RestResourceFetcher::<Listing>::new(client, "malformed/", CursorStyle::NextUrl)
        .fetch(None, &FilterSet::new())
        .await
        .expect_err("missing results");
    assert!(matches!(err, ClientError::InvalidPayload(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = RestClient::new(&format!("http://{addr}/api")).expect("client");
    let err = RestResourceFetcher::<Listing>::new(client, "posts/", CursorStyle::NextUrl)
        .fetch(None, &FilterSet::new())
        .await
        .expect_err("nothing listening");
    assert!(matches!(err, ClientError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn json_mutation_returns_canonical_value() {
    let base = spawn_api_server().await;
    let caller = RestMutationCaller::<Reaction>::new(
        RestClient::new(&base).expect("client"),
        "posts/{id}/reaction/",
        BodyEncoding::Json,
    );

    let value = caller
        .call(&PostId(7), &ReactionKind::Like)
        .await
        .expect("reaction");
    assert_eq!(value.kind, ReactionKind::Like);
    assert_eq!(value.likes, 42);

    let err = caller
        .call(&PostId(13), &ReactionKind::Like)
        .await
        .expect_err("closed");
    assert_eq!(err, ClientError::Validation("reactions are closed".into()));
}

#[tokio::test]
async fn multipart_mutation_sends_action_as_form_field() {
    let base = spawn_api_server().await;
    let caller = RestMutationCaller::<ReadMark>::new(
        RestClient::new(&base).expect("client"),
        "notices/{id}/read/",
        BodyEncoding::Multipart,
    );

    let value = caller.call(&3_i64, &true).await.expect("read mark");
    assert_eq!(value, ReadMark { read: true });
}

#[test]
fn base_url_without_trailing_slash_keeps_its_path() {
    let client = RestClient::new("http://example.test/api").expect("client");
    assert_eq!(
        client.endpoint("/houses/").expect("endpoint").as_str(),
        "http://example.test/api/houses/"
    );
}
