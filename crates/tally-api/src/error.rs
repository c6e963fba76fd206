//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Core(#[from] tally_core::Error),

  #[error("bad request: {0}")]
  BadRequest(String),
}

impl ApiError {
  fn status_and_kind(&self) -> (StatusCode, &'static str) {
    use tally_core::Error as E;
    match self {
      ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
      ApiError::Core(e) => {
        let status = match e {
          E::InvalidWeight(_) | E::ValidationFailed { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
          }
          E::EntityNotFound(_)
          | E::NoData(_)
          | E::RecordNotFound { .. }
          | E::IndexNotFound(_) => StatusCode::NOT_FOUND,
          E::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, e.kind())
      }
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, kind) = self.status_and_kind();
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    let message = self.to_string();
    (status, Json(json!({ "error": message, "kind": kind }))).into_response()
  }
}
