//! Router tests against an in-memory engine.

use std::sync::Arc;

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
  response::Response,
};
use serde_json::{Value, json};
use tally_core::{Materializer, memory::MemoryStore};
use tower::ServiceExt as _;
use uuid::Uuid;

use crate::api_router;

fn engine() -> Arc<Materializer<MemoryStore>> { Arc::new(Materializer::new(MemoryStore::new())) }

async fn send(
  engine: &Arc<Materializer<MemoryStore>>,
  method: &str,
  uri: &str,
  body: Option<Value>,
) -> Response {
  let builder = Request::builder().method(method).uri(uri);
  let req = match body {
    Some(json) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(json.to_string())),
    None => builder.body(Body::empty()),
  }
  .unwrap();
  api_router(Arc::clone(engine)).oneshot(req).await.unwrap()
}

async fn json_body(resp: Response) -> Value {
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

async fn create_entity(engine: &Arc<Materializer<MemoryStore>>, name: &str, email: &str) -> String {
  let resp = send(
    engine,
    "POST",
    "/entities",
    Some(json!({ "display_name": name, "email": email })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  json_body(resp).await["entity_id"].as_str().unwrap().to_owned()
}

// ── Entities ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_fetch_entity() {
  let e = engine();
  let id = create_entity(&e, " Ada ", "Ada@Example.com").await;

  let resp = send(&e, "GET", &format!("/entities/{id}"), None).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["display_name"], "Ada");
  assert_eq!(body["email"], "ada@example.com");
}

#[tokio::test]
async fn invalid_email_is_unprocessable() {
  let e = engine();
  let resp = send(
    &e,
    "POST",
    "/entities",
    Some(json!({ "display_name": "Ada", "email": "not-an-email" })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(json_body(resp).await["kind"], "validation_failed");

  let list = json_body(send(&e, "GET", "/entities", None).await).await;
  assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn patch_can_clear_email() {
  let e = engine();
  let id = create_entity(&e, "Ada", "ada@example.com").await;
  let resp = send(&e, "PATCH", &format!("/entities/{id}"), Some(json!({ "email": null }))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["email"], Value::Null);
  assert_eq!(body["display_name"], "Ada");
}

#[tokio::test]
async fn unknown_entity_is_404() {
  let e = engine();
  let resp = send(&e, "GET", &format!("/entities/{}/summary", Uuid::new_v4()), None).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  assert_eq!(json_body(resp).await["kind"], "entity_not_found");
}

// ── Records and summary ──────────────────────────────────────────────────────

#[tokio::test]
async fn records_drive_summary() {
  let e = engine();
  let id = create_entity(&e, "Ada", "ada@example.com").await;
  let r1 = Uuid::new_v4();
  let r2 = Uuid::new_v4();

  let resp = send(
    &e,
    "PUT",
    &format!("/entities/{id}/records/{r1}"),
    Some(json!({ "score": 80, "weight": 1 })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  send(
    &e,
    "PUT",
    &format!("/entities/{id}/records/{r2}"),
    Some(json!({ "score": 100, "weight": 3 })),
  )
  .await;

  let summary = json_body(send(&e, "GET", &format!("/entities/{id}/summary"), None).await).await;
  assert_eq!(summary["weighted_average"], json!({ "state": "value", "value": 95.0 }));
  assert_eq!(summary["record_count"], 2);

  let records = json_body(send(&e, "GET", &format!("/entities/{id}/records"), None).await).await;
  assert_eq!(records.as_array().unwrap().len(), 2);

  send(&e, "DELETE", &format!("/entities/{id}/records/{r1}"), None).await;
  let resp = send(&e, "DELETE", &format!("/entities/{id}/records/{r2}"), None).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await["weighted_average"], json!({ "state": "no_data" }));

  let resp = send(&e, "GET", &format!("/entities/{id}/summary"), None).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  assert_eq!(json_body(resp).await["kind"], "no_data");
}

#[tokio::test]
async fn zero_weight_is_unprocessable() {
  let e = engine();
  let id = create_entity(&e, "Ada", "ada@example.com").await;
  let resp = send(
    &e,
    "PUT",
    &format!("/entities/{id}/records/{}", Uuid::new_v4()),
    Some(json!({ "score": 50, "weight": 0 })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(json_body(resp).await["kind"], "invalid_weight");
}

// ── Indexes ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn index_lifecycle() {
  let e = engine();
  let ada = create_entity(&e, "Ada", "ada@example.com").await;
  create_entity(&e, "Bob", "bob@example.com").await;

  let resp = send(
    &e,
    "POST",
    "/indexes",
    Some(json!({ "name": "by_email", "attributes": ["email"] })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  assert_eq!(json_body(resp).await["entries"], 2);

  let resp = send(
    &e,
    "POST",
    "/indexes/by_email/lookup",
    Some(json!({ "key": ["ADA@example.com"] })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await, json!([ada]));

  let resp = send(
    &e,
    "POST",
    "/indexes/by_email/lookup",
    Some(json!({ "from": ["b"] })),
  )
  .await;
  assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);

  let resp = send(&e, "POST", "/indexes/by_email/lookup", Some(json!({}))).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let resp = send(&e, "DELETE", "/indexes/by_email", None).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);

  let resp = send(
    &e,
    "POST",
    "/indexes/by_email/lookup",
    Some(json!({ "key": ["ada@example.com"] })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  assert_eq!(json_body(resp).await["kind"], "index_not_found");
}
