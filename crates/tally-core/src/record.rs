//! Score records: weighted observations that belong to an entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// One weighted observation. `weight` is always finite and strictly positive
/// once a record has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
  pub record_id:   Uuid,
  pub entity_id:   Uuid,
  pub score:       f64,
  pub weight:      f64,
  /// Server-assigned; refreshed every time the record is replaced.
  pub recorded_at: DateTime<Utc>,
}

/// Input to [`crate::engine::Materializer::record_upserted`].
///
/// A `record_id` that already exists replaces that record; otherwise the
/// record is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct UpsertRecord {
  pub record_id: Uuid,
  pub entity_id: Uuid,
  pub score:     f64,
  pub weight:    f64,
}

impl UpsertRecord {
  /// A new record with a freshly generated id.
  pub fn new(entity_id: Uuid, score: f64, weight: f64) -> Self {
    Self { record_id: Uuid::new_v4(), entity_id, score, weight }
  }

  /// Reject inputs that would make the weighted average undefined or
  /// misleading.
  pub fn validate(&self) -> Result<()> {
    if !(self.weight.is_finite() && self.weight > 0.0) {
      return Err(Error::InvalidWeight(self.weight));
    }
    if !self.score.is_finite() {
      return Err(Error::validation("score", "score must be a finite number"));
    }
    Ok(())
  }

  pub(crate) fn into_record(self, recorded_at: DateTime<Utc>) -> ScoreRecord {
    ScoreRecord {
      record_id: self.record_id,
      entity_id: self.entity_id,
      score: self.score,
      weight: self.weight,
      recorded_at,
    }
  }
}

/// A single change to an entity's record set, committed to the store together
/// with the recomputed summary.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordMutation {
  Upsert(ScoreRecord),
  Delete { entity_id: Uuid, record_id: Uuid },
}

impl RecordMutation {
  pub fn entity_id(&self) -> Uuid {
    match self {
      Self::Upsert(record) => record.entity_id,
      Self::Delete { entity_id, .. } => *entity_id,
    }
  }
}
