//! Handlers for score records and the derived summary.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/entities/:id/records` | Current records |
//! | `PUT`    | `/entities/:id/records/:record_id` | Body: `{"score":80,"weight":1}`; returns the new summary |
//! | `DELETE` | `/entities/:id/records/:record_id` | Returns the new summary |
//! | `GET`    | `/entities/:id/summary` | 404 with `kind: "no_data"` when the entity has no records |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;
use tally_core::{
  Materializer,
  record::{ScoreRecord, UpsertRecord},
  store::ScoreStore,
  summary::DerivedSummary,
};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /entities/:id/records`
pub async fn list<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<ScoreRecord>>, ApiError> {
  Ok(Json(engine.records(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RecordBody {
  pub score:  f64,
  pub weight: f64,
}

/// `PUT /entities/:id/records/:record_id`
pub async fn upsert<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path((entity_id, record_id)): Path<(Uuid, Uuid)>,
  Json(body): Json<RecordBody>,
) -> Result<Json<DerivedSummary>, ApiError> {
  let input = UpsertRecord {
    record_id,
    entity_id,
    score: body.score,
    weight: body.weight,
  };
  Ok(Json(engine.record_upserted(input).await?))
}

/// `DELETE /entities/:id/records/:record_id`
pub async fn remove<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path((entity_id, record_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DerivedSummary>, ApiError> {
  Ok(Json(engine.record_deleted(entity_id, record_id).await?))
}

/// `GET /entities/:id/summary`
pub async fn summary<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<DerivedSummary>, ApiError> {
  Ok(Json(engine.get(id).await?))
}
