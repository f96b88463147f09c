use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use shelfmates::{
    app,
    auth::{Claims, IdentityProvider},
    books::catalog::{Catalog, CatalogError, Volume, VolumeInfo},
    config::CatalogSettings,
    db,
    realtime::Realtime,
    AppError, AppResult, AppState,
};
use tower::ServiceExt;

#[derive(Default)]
struct FakeCatalog {
    hits: Vec<Volume>,
    down: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn search(&self, _query: &str, max_results: u32) -> Result<Vec<Volume>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".into()));
        }
        Ok(self.hits.iter().take(max_results as usize).cloned().collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Volume, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".into()));
        }
        self.hits
            .iter()
            .find(|volume| volume.id == id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_owned()))
    }
}

/// Accepts `token-<name>` as the identity `<name>`.
struct FakeIdentity;

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn verify(&self, token: &str) -> AppResult<Claims> {
        let name = token
            .strip_prefix("token-")
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;
        Ok(Claims {
            subject: format!("kp_{name}"),
            email: Some(format!("{name}@example.com")),
            name: Some(name.to_owned()),
            avatar_url: None,
        })
    }
}

fn volume(id: &str, title: &str, published: &str) -> Volume {
    Volume {
        id: id.to_owned(),
        volume_info: VolumeInfo {
            title: Some(title.to_owned()),
            authors: Some(vec!["Frank Herbert".to_owned()]),
            published_date: Some(published.to_owned()),
            ..Default::default()
        },
    }
}

fn dune_hits() -> Vec<Volume> {
    vec![
        volume("dune-1", "Dune", "1965-08-01"),
        volume("dune-2", "Dune Messiah", "1969"),
        volume("dune-3", "Children of Dune", "1976-04-01"),
    ]
}

struct Harness {
    app: Router,
    catalog: Arc<FakeCatalog>,
}

async fn harness(hits: Vec<Volume>) -> Harness {
    let catalog = Arc::new(FakeCatalog { hits, ..Default::default() });
    let state = AppState {
        db_pool: db::in_memory().await.unwrap(),
        catalog: catalog.clone(),
        identity: Arc::new(FakeIdentity),
        realtime: Realtime::default(),
        catalog_settings: CatalogSettings::default(),
    };
    Harness { app: app(state), catalog }
}

impl Harness {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header(header::AUTHORIZATION, format!("Bearer token-{user}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body =
            if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, body)
    }

    async fn get(&self, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, user, None).await
    }

    async fn post(&self, uri: &str, user: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(user), Some(body)).await
    }

    fn catalog_calls(&self) -> usize {
        self.catalog.calls.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn one_character_search_is_rejected() {
    let h = harness(dune_hits()).await;

    let (status, body) = h.get("/api/books/search?query=a", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_query");
    assert_eq!(h.catalog_calls(), 0);
}

#[tokio::test]
async fn empty_cache_falls_back_once_then_serves_locally() {
    let h = harness(dune_hits()).await;

    let (status, body) = h.get("/api/books/search?query=dune", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["pagination"]["page"], 1);
    assert_eq!(body["pagination"]["totalPages"], 1);
    assert_eq!(body["pagination"]["hasNext"], false);
    assert_eq!(body["pagination"]["nextCursor"], Value::Null);
    assert_eq!(h.catalog_calls(), 1);

    let books = body["data"].as_array().unwrap();
    let messiah = books.iter().find(|book| book["id"] == "dune-2").unwrap();
    assert_eq!(messiah["published_date"], Value::Null);
    assert_eq!(messiah["author"], "Frank Herbert");
    assert_eq!(messiah["language"], "en");

    let (status, body) = h.get("/api/books/search?query=dune", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(h.catalog_calls(), 1);
}

#[tokio::test]
async fn catalog_outage_is_a_503() {
    let h = harness(dune_hits()).await;
    h.catalog.down.store(true, Ordering::SeqCst);

    let (status, body) = h.get("/api/books/search?query=dune", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "external_service_unavailable");
}

#[tokio::test]
async fn malformed_cursor_is_a_client_error() {
    let h = harness(dune_hits()).await;

    let (status, body) =
        h.get("/api/books/search?query=dune&cursor=not*base64&direction=next", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_cursor");
    assert_eq!(h.catalog_calls(), 0);
}

#[tokio::test]
async fn cursor_search_walks_the_cached_books() {
    let h = harness(dune_hits()).await;
    h.get("/api/books/search?query=dune", None).await;

    let (status, first) = h.get("/api/books/search/next?query=dune&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"].as_array().unwrap().len(), 2);
    assert_eq!(first["pagination"]["page"], Value::Null);
    assert_eq!(first["pagination"]["total"], Value::Null);

    let cursor = first["pagination"]["nextCursor"].as_str().unwrap().to_owned();
    let (_, second) =
        h.get(&format!("/api/books/search/next?query=dune&limit=2&cursor={cursor}"), None).await;
    let rest = second["data"].as_array().unwrap();
    assert_eq!(rest.len(), 1);
    assert!(first["data"].as_array().unwrap().iter().all(|book| book["id"] != rest[0]["id"]));
    assert_eq!(h.catalog_calls(), 1);
}

#[tokio::test]
async fn mixing_page_and_cursor_is_rejected() {
    let h = harness(vec![]).await;

    let (status, body) = h.get("/api/books/search?query=dune&page=2&direction=next", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "mixed_pagination");
}

#[tokio::test]
async fn book_details_are_fetched_and_cached() {
    let h = harness(dune_hits()).await;

    let (status, book) = h.get("/api/books/dune-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(book["title"], "Dune");

    let (status, _) = h.get("/api/books/dune-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.catalog_calls(), 1);

    let (status, body) = h.get("/api/books/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "book_not_found");
}

#[tokio::test]
async fn private_groups_need_the_invite_code() {
    let h = harness(vec![]).await;

    let (status, group) = h
        .post(
            "/api/groups",
            "ann",
            json!({ "name": "Dune readers", "is_public": false, "topic_tags": ["sci-fi"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(group["my_role"], "admin");
    assert_eq!(group["participant_count"], 1);
    let id = group["id"].as_str().unwrap().to_owned();
    let code = group["invite_code"].as_str().unwrap().to_owned();

    let (_, seen_by_bob) = h.get(&format!("/api/groups/{id}"), Some("bob")).await;
    assert_eq!(seen_by_bob["invite_code"], Value::Null);

    let (status, body) = h.post(&format!("/api/groups/{id}/join"), "bob", json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_invite_code");

    let (status, member) =
        h.post(&format!("/api/groups/{id}/join"), "bob", json!({ "invite_code": code })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(member["role"], "member");

    let (status, body) =
        h.post(&format!("/api/groups/{id}/join"), "bob", json!({ "invite_code": code })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_member");

    let (status, body) = h.post(&format!("/api/groups/{id}/leave"), "ann", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "last_admin");

    let (status, list) = h.get("/api/groups?topic_tags=sci-fi", Some("ann")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
    assert_eq!(list["data"][0]["invite_code"], Value::Null);
}

#[tokio::test]
async fn full_groups_refuse_new_members() {
    let h = harness(vec![]).await;
    let (_, group) =
        h.post("/api/groups", "ann", json!({ "name": "Tiny", "member_limit": 1 })).await;
    let id = group["id"].as_str().unwrap();

    let (status, body) = h.post(&format!("/api/groups/{id}/join"), "bob", json!({})).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "group_full");
}

#[tokio::test]
async fn messages_are_for_participants() {
    let h = harness(vec![]).await;
    let (_, group) = h.post("/api/groups", "ann", json!({ "name": "Club" })).await;
    let group_id = group["id"].as_str().unwrap().to_owned();

    let (status, _) =
        h.post("/api/messages", "eve", json!({ "group_id": group_id, "content": "hi" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, message) =
        h.post("/api/messages", "ann", json!({ "group_id": group_id, "content": "hello" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = message["id"].as_str().unwrap().to_owned();

    let (status, reply) = h
        .post(
            "/api/messages",
            "ann",
            json!({ "group_id": group_id, "content": "again", "reply_to_id": message_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["reply_to_id"], message_id.as_str());

    let (_, thread) = h
        .get(&format!("/api/messages/group/{group_id}?reply_to_id={message_id}"), Some("ann"))
        .await;
    assert_eq!(thread["data"].as_array().unwrap().len(), 1);

    let (_, all) = h.get(&format!("/api/messages/group/{group_id}"), Some("ann")).await;
    assert_eq!(all["pagination"]["total"], 2);
    assert_eq!(all["data"][0]["content"], "again");

    h.post(&format!("/api/messages/{message_id}/read"), "ann", json!({})).await;
    let (status, read) =
        h.post(&format!("/api/messages/{message_id}/read"), "ann", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["read_by"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn one_review_per_book() {
    let h = harness(dune_hits()).await;

    let (status, review) =
        h.post("/api/reviews", "ann", json!({ "book_id": "dune-1", "rating": 5 })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(review["rating"], 5);

    let (status, body) =
        h.post("/api/reviews", "ann", json!({ "book_id": "dune-1", "rating": 4 })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_reviewed");

    let (status, body) =
        h.post("/api/reviews", "bob", json!({ "book_id": "dune-1", "rating": 9 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_rating");

    let (_, list) = h.get("/api/reviews/book/dune-1?min_rating=4", None).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn library_upserts_by_book() {
    let h = harness(dune_hits()).await;

    let (status, item) = h.post("/api/library", "ann", json!({ "book_id": "dune-3" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["status"], "want_to_read");
    assert_eq!(item["book"]["title"], "Children of Dune");

    let (_, item) = h
        .post(
            "/api/library",
            "ann",
            json!({ "book_id": "dune-3", "status": "completed", "rating": 4 }),
        )
        .await;
    assert_eq!(item["status"], "completed");

    let (_, list) = h.get("/api/library?status=completed", Some("ann")).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
    assert_eq!(list["data"][0]["book"]["id"], "dune-3");

    let (status, _) = h.get("/api/library/dune-1", Some("ann")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let h = harness(vec![]).await;

    let (status, body) = h.get("/api/groups", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = h.get("/api/groups", Some("ann")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_checks_the_database() {
    let h = harness(vec![]).await;
    let (status, body) = h.get("/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn featured_books_are_cached_for_search() {
    let h = harness(dune_hits()).await;

    let (status, body) = h.get("/api/books/featured?query=herbert&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = h.get("/api/books/featured?limit=21", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, search) = h.get("/api/books/search?query=dune", None).await;
    assert_eq!(search["pagination"]["total"], 2);
    assert_eq!(h.catalog_calls(), 1);
}

#[tokio::test]
async fn advanced_search_paths_share_the_search_handlers() {
    let h = harness(dune_hits()).await;

    let (status, body) = h.get("/api/books/search/advanced?query=dune&author=herbert", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, body) = h.get("/api/books/search/advanced/next?query=dune&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = h.get("/api/books/search/advanced/prev?query=dune&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn public_groups_can_be_joined_without_a_body() {
    let h = harness(vec![]).await;
    let (_, group) = h.post("/api/groups", "ann", json!({ "name": "Open shelf" })).await;
    let id = group["id"].as_str().unwrap();

    let (status, member) =
        h.call(Method::POST, &format!("/api/groups/{id}/join"), Some("bob"), None).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(member["role"], "member");
}

#[tokio::test]
async fn camel_case_request_fields_are_accepted() {
    let h = harness(dune_hits()).await;

    let (status, item) = h
        .post(
            "/api/library",
            "ann",
            json!({ "bookId": "dune-3", "status": null, "rating": 4, "notes": "reread" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["book"]["id"], "dune-3");
    assert_eq!(item["rating"], 4);

    let (status, review) =
        h.post("/api/reviews", "ann", json!({ "bookId": "dune-1", "rating": 5 })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(review["book_id"], "dune-1");

    let (_, group) = h.post("/api/groups", "ann", json!({ "name": "Club" })).await;
    let group_id = group["id"].as_str().unwrap().to_owned();
    let (status, first) =
        h.post("/api/messages", "ann", json!({ "groupId": group_id, "content": "hello" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let first_id = first["id"].as_str().unwrap().to_owned();

    let (status, reply) = h
        .post(
            "/api/messages",
            "ann",
            json!({ "groupId": group_id, "content": "again", "replyToId": first_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["reply_to_id"], first_id.as_str());

    let (_, thread) =
        h.get(&format!("/api/messages/group/{group_id}?replyToId={first_id}"), Some("ann")).await;
    assert_eq!(thread["data"].as_array().unwrap().len(), 1);
}
