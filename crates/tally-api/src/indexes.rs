//! Handlers for `/indexes` endpoints.
//!
//! Keys travel as arrays of strings, one per indexed attribute; timestamps
//! use RFC 3339.
//!
//! ```json
//! POST /indexes/by_email/lookup
//! {"key": ["ada@example.com"]}
//!
//! POST /indexes/by_created/lookup
//! {"from": ["2024-01-01T00:00:00Z"], "to": ["2025-01-01T00:00:00Z"]}
//! ```

use std::{ops::Bound, sync::Arc};

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tally_core::{
  Materializer,
  index::{IndexDescriptor, IndexKey},
  store::ScoreStore,
};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /indexes`
pub async fn list<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
) -> Json<Vec<IndexDescriptor>> {
  Json(engine.indexes())
}

#[derive(Debug, Serialize)]
pub struct Created {
  pub name:    String,
  pub entries: usize,
}

/// `POST /indexes` — body: `{"name":"by_email","attributes":["email"]}`
pub async fn create<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Json(descriptor): Json<IndexDescriptor>,
) -> Result<impl IntoResponse, ApiError> {
  let name = descriptor.name.clone();
  let entries = engine.create_index(descriptor).await?;
  Ok((StatusCode::CREATED, Json(Created { name, entries })))
}

/// `DELETE /indexes/:name`
pub async fn drop_one<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
  engine.drop_index(&name)?;
  Ok(StatusCode::NO_CONTENT)
}

/// Either an exact `key`, or a `from`/`to` range (each side optional).
#[derive(Debug, Default, Deserialize)]
pub struct LookupBody {
  pub key:          Option<Vec<String>>,
  pub from:         Option<Vec<String>>,
  pub to:           Option<Vec<String>>,
  /// Include `to` itself in the range. `from` is always inclusive.
  #[serde(default)]
  pub to_inclusive: bool,
}

/// `POST /indexes/:name/lookup`: returns matching entity ids.
pub async fn lookup<S: ScoreStore>(
  State(engine): State<Arc<Materializer<S>>>,
  Path(name): Path<String>,
  Json(body): Json<LookupBody>,
) -> Result<Json<Vec<Uuid>>, ApiError> {
  if let Some(key) = &body.key {
    if body.from.is_some() || body.to.is_some() {
      return Err(ApiError::BadRequest(
        "`key` cannot be combined with `from`/`to`".into(),
      ));
    }
    let key = engine.parse_key(&name, key.as_slice())?;
    return Ok(Json(engine.lookup(&name, &key)?));
  }

  let parse = |values: &Option<Vec<String>>| -> Result<Option<IndexKey>, ApiError> {
    values
      .as_deref()
      .map(|v| engine.parse_key(&name, v))
      .transpose()
      .map_err(ApiError::from)
  };
  let from = parse(&body.from)?;
  let to = parse(&body.to)?;
  if from.is_none() && to.is_none() {
    return Err(ApiError::BadRequest("one of `key`, `from` or `to` is required".into()));
  }

  let lower = from.as_ref().map_or(Bound::Unbounded, Bound::Included);
  let upper = match &to {
    None => Bound::Unbounded,
    Some(k) if body.to_inclusive => Bound::Included(k),
    Some(k) => Bound::Excluded(k),
  };
  Ok(Json(engine.lookup_range(&name, lower, upper)?))
}
