//! The derived summary, a materialised weighted average per entity.
//!
//! Summaries are never patched incrementally. Every mutation recomputes
//! `Σ(score·weight)` and `Σ(weight)` from the entity's full record set and
//! divides once, so the stored value depends only on the current records and
//! never on the order of the writes that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::ScoreRecord;

// ─── Weighted average ────────────────────────────────────────────────────────

/// The weighted average of an entity's records.
///
/// An entity with no records has no average. That state is represented
/// explicitly and is never coerced to `0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum WeightedAverage {
  Value(f64),
  NoData,
}

impl WeightedAverage {
  pub fn value(&self) -> Option<f64> {
    match self {
      Self::Value(v) => Some(*v),
      Self::NoData => None,
    }
  }

  pub fn is_no_data(&self) -> bool { matches!(self, Self::NoData) }
}

// ─── Accumulation ────────────────────────────────────────────────────────────

/// Neumaier-compensated running sum.
#[derive(Debug, Clone, Copy, Default)]
struct CompensatedSum {
  sum:          f64,
  compensation: f64,
}

impl CompensatedSum {
  fn add(&mut self, x: f64) {
    let t = self.sum + x;
    if self.sum.abs() >= x.abs() {
      self.compensation += (self.sum - t) + x;
    } else {
      self.compensation += (x - t) + self.sum;
    }
    self.sum = t;
  }

  fn total(&self) -> f64 { self.sum + self.compensation }
}

/// Accumulates the two sums a weighted average needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
  score_weight: CompensatedSum,
  weight:       CompensatedSum,
  count:        usize,
}

impl Accumulator {
  pub fn push(&mut self, score: f64, weight: f64) {
    self.score_weight.add(score * weight);
    self.weight.add(weight);
    self.count += 1;
  }

  pub fn count(&self) -> usize { self.count }

  pub fn score_weight_sum(&self) -> f64 { self.score_weight.total() }

  pub fn weight_sum(&self) -> f64 { self.weight.total() }

  /// `NoData` for an empty set, and also when either sum has left the finite
  /// range, so a non-finite average is never reported.
  pub fn average(&self) -> WeightedAverage {
    let weight = self.weight_sum();
    let score_weight = self.score_weight_sum();
    if self.count == 0 || !(weight.is_finite() && weight > 0.0) || !score_weight.is_finite() {
      return WeightedAverage::NoData;
    }
    let average = score_weight / weight;
    if !average.is_finite() {
      return WeightedAverage::NoData;
    }
    WeightedAverage::Value(average)
  }

  /// Whether both sums are finite.
  pub fn is_finite(&self) -> bool {
    self.score_weight_sum().is_finite() && self.weight_sum().is_finite()
  }
}

/// Compute the weighted average of `records` from scratch.
///
/// Records are folded in ascending `record_id` order, so any permutation of
/// the same set yields a bit-identical result.
pub fn weighted_average<'a>(
  records: impl IntoIterator<Item = &'a ScoreRecord>,
) -> Accumulator {
  let mut ordered: Vec<&ScoreRecord> = records.into_iter().collect();
  ordered.sort_by_key(|r| r.record_id);

  let mut acc = Accumulator::default();
  for record in ordered {
    acc.push(record.score, record.weight);
  }
  acc
}

// ─── DerivedSummary ──────────────────────────────────────────────────────────

/// The materialised view row for one entity. Owned and written exclusively by
/// the [`Materializer`](crate::engine::Materializer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSummary {
  pub entity_id:        Uuid,
  pub record_count:     usize,
  pub score_weight_sum: f64,
  pub weight_sum:       f64,
  pub weighted_average: WeightedAverage,
  /// Incremented on every mutation of the entity's record set.
  pub version:          u64,
  pub computed_at:      DateTime<Utc>,
}

impl DerivedSummary {
  /// Recompute the summary for `entity_id` over its complete record set.
  pub fn compute<'a>(
    entity_id: Uuid,
    records: impl IntoIterator<Item = &'a ScoreRecord>,
    version: u64,
    computed_at: DateTime<Utc>,
  ) -> Self {
    let acc = weighted_average(records);
    Self {
      entity_id,
      record_count: acc.count(),
      score_weight_sum: acc.score_weight_sum(),
      weight_sum: acc.weight_sum(),
      weighted_average: acc.average(),
      version,
      computed_at,
    }
  }
}
