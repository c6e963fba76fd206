//! Error types for `tally-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid weight {0}: weight must be a finite number greater than zero")]
  InvalidWeight(f64),

  #[error("entity not found: {0}")]
  EntityNotFound(Uuid),

  /// The entity exists but currently owns no score records, so its weighted
  /// average is undefined.
  #[error("entity {0} has no score records")]
  NoData(Uuid),

  #[error("score record {record_id} not found for entity {entity_id}")]
  RecordNotFound { entity_id: Uuid, record_id: Uuid },

  #[error("validation failed on `{field}`: {reason}")]
  ValidationFailed { field: &'static str, reason: String },

  #[error("index not found: {0:?}")]
  IndexNotFound(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
    Self::ValidationFailed { field, reason: reason.into() }
  }

  /// Wrap a backend error from a [`ScoreStore`](crate::store::ScoreStore).
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  /// Stable snake_case name of the variant, for machine-readable responses.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::InvalidWeight(_) => "invalid_weight",
      Self::EntityNotFound(_) => "entity_not_found",
      Self::NoData(_) => "no_data",
      Self::RecordNotFound { .. } => "record_not_found",
      Self::ValidationFailed { .. } => "validation_failed",
      Self::IndexNotFound(_) => "index_not_found",
      Self::Store(_) => "store",
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
