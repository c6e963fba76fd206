//! Error type for `tally-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(#[from] chrono::ParseError),

  /// A stored value is out of range for its domain type.
  #[error("corrupt column {column}: {reason}")]
  Decode { column: &'static str, reason: String },

  #[error("entity not found: {0}")]
  EntityNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
