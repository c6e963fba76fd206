//! Handlers for `/entities` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/entities` | All entities |
//! | `POST`   | `/entities` | Body: [`NewEntity`]; 201 + stored entity |
//! | `GET`    | `/entities/:id` | 404 if not found |
//! | `PATCH`  | `/entities/:id` | Body: [`EntityPatch`] |
//! | `DELETE` | `/entities/:id` | 204; cascades to records and summary |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use tally_core::{
  Materializer,
  entity::{Entity, EntityPatch, NewEntity},
  store::ScoreStore,
};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /entities`
pub async fn list<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
) -> Result<Json<Vec<Entity>>, ApiError> {
  Ok(Json(engine.entities().await?))
}

/// `POST /entities` — body: `{"display_name":"Ada","email":"ada@example.com"}`
pub async fn create<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Json(body): Json<NewEntity>,
) -> Result<impl IntoResponse, ApiError> {
  let entity = engine.create_entity(body).await?;
  Ok((StatusCode::CREATED, Json(entity)))
}

/// `GET /entities/:id`
pub async fn get_one<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Entity>, ApiError> {
  Ok(Json(engine.entity(id).await?))
}

/// `PATCH /entities/:id`. Omitted fields are left unchanged; `"email": null`
/// clears the address.
pub async fn update<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path(id): Path<Uuid>,
  Json(patch): Json<EntityPatch>,
) -> Result<Json<Entity>, ApiError> {
  Ok(Json(engine.update_entity(id, patch).await?))
}

/// `DELETE /entities/:id`
pub async fn remove<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  engine.remove_entity(id).await?;
  Ok(StatusCode::NO_CONTENT)
}
