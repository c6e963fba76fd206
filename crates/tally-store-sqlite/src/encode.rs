//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings and UUIDs as hyphenated
//! lowercase strings. Counters are stored as `INTEGER`, which SQLite reads
//! back as `i64`.

use chrono::{DateTime, Utc};
use tally_core::{
  entity::Entity,
  record::ScoreRecord,
  summary::{DerivedSummary, WeightedAverage},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(Error::from)
}

// ─── Counters ─────────────────────────────────────────────────────────────────

fn decode_count<T: TryFrom<i64>>(column: &'static str, n: i64) -> Result<T> {
  T::try_from(n).map_err(|_| Error::Decode {
    column,
    reason: format!("{n} is out of range"),
  })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from an `entities` row.
pub struct RawEntity {
  pub entity_id:    String,
  pub display_name: String,
  pub email:        Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawEntity {
  pub const COLUMNS: &'static str =
    "entity_id, display_name, email, created_at, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entity_id:    row.get(0)?,
      display_name: row.get(1)?,
      email:        row.get(2)?,
      created_at:   row.get(3)?,
      updated_at:   row.get(4)?,
    })
  }

  pub fn into_entity(self) -> Result<Entity> {
    Ok(Entity {
      entity_id:    decode_uuid(&self.entity_id)?,
      display_name: self.display_name,
      email:        self.email,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read directly from a `score_records` row.
pub struct RawRecord {
  pub record_id:   String,
  pub entity_id:   String,
  pub score:       f64,
  pub weight:      f64,
  pub recorded_at: String,
}

impl RawRecord {
  pub const COLUMNS: &'static str = "record_id, entity_id, score, weight, recorded_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:   row.get(0)?,
      entity_id:   row.get(1)?,
      score:       row.get(2)?,
      weight:      row.get(3)?,
      recorded_at: row.get(4)?,
    })
  }

  pub fn into_record(self) -> Result<ScoreRecord> {
    Ok(ScoreRecord {
      record_id:   decode_uuid(&self.record_id)?,
      entity_id:   decode_uuid(&self.entity_id)?,
      score:       self.score,
      weight:      self.weight,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

/// Raw values read directly from a `derived_summaries` row.
pub struct RawSummary {
  pub entity_id:        String,
  pub record_count:     i64,
  pub score_weight_sum: f64,
  pub weight_sum:       f64,
  pub weighted_average: Option<f64>,
  pub version:          i64,
  pub computed_at:      String,
}

impl RawSummary {
  pub const COLUMNS: &'static str = "entity_id, record_count, score_weight_sum, \
                                     weight_sum, weighted_average, version, computed_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entity_id:        row.get(0)?,
      record_count:     row.get(1)?,
      score_weight_sum: row.get(2)?,
      weight_sum:       row.get(3)?,
      weighted_average: row.get(4)?,
      version:          row.get(5)?,
      computed_at:      row.get(6)?,
    })
  }

  /// Flatten a summary into column values.
  pub fn encode(summary: &DerivedSummary) -> Self {
    Self {
      entity_id:        encode_uuid(summary.entity_id),
      record_count:     summary.record_count as i64,
      score_weight_sum: summary.score_weight_sum,
      weight_sum:       summary.weight_sum,
      weighted_average: summary.weighted_average.value(),
      version:          summary.version as i64,
      computed_at:      encode_dt(summary.computed_at),
    }
  }

  pub fn into_summary(self) -> Result<DerivedSummary> {
    let weighted_average = match self.weighted_average {
      Some(v) => WeightedAverage::Value(v),
      None => WeightedAverage::NoData,
    };
    Ok(DerivedSummary {
      entity_id: decode_uuid(&self.entity_id)?,
      record_count: decode_count("record_count", self.record_count)?,
      score_weight_sum: self.score_weight_sum,
      weight_sum: self.weight_sum,
      weighted_average,
      version: decode_count("version", self.version)?,
      computed_at: decode_dt(&self.computed_at)?,
    })
  }
}
