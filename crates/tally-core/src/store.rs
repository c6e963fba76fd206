//! The `ScoreStore` trait — the durable record store the engine writes
//! through.
//!
//! The trait is implemented by storage backends (e.g. `tally-store-sqlite`,
//! or [`MemoryStore`](crate::memory::MemoryStore) for tests and embedded use).
//! The [`Materializer`](crate::engine::Materializer) depends on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  entity::Entity,
  record::{RecordMutation, ScoreRecord},
  summary::DerivedSummary,
};

/// Result of [`ScoreStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
  /// The mutation and the summary were both written.
  Applied,
  /// The upserted record id already belongs to `owner`. Nothing was written.
  RecordOwnedBy(Uuid),
}

/// Abstraction over a Tally storage backend.
///
/// Backends only need atomic single-row writes, with one exception:
/// [`ScoreStore::commit`] must apply the record mutation and the summary row
/// together or not at all.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ScoreStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Entities ──────────────────────────────────────────────────────────

  /// Persist a new entity. Fails if the id is already taken.
  fn insert_entity(
    &self,
    entity: Entity,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Overwrite an existing entity row. Returns `false` if no row matched.
  fn replace_entity(
    &self,
    entity: Entity,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Delete an entity together with its records and summary. Returns `false`
  /// if the entity did not exist.
  fn delete_entity(
    &self,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_entity(
    &self,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Option<Entity>, Self::Error>> + Send + '_;

  fn list_entities(
    &self,
  ) -> impl Future<Output = Result<Vec<Entity>, Self::Error>> + Send + '_;

  // ── Score records ─────────────────────────────────────────────────────

  /// Look up a record by id regardless of owning entity.
  fn get_record(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Option<ScoreRecord>, Self::Error>> + Send + '_;

  /// All current records of an entity.
  fn list_records(
    &self,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ScoreRecord>, Self::Error>> + Send + '_;

  /// Atomically apply `mutation` and write `summary` as the entity's new
  /// summary row.
  ///
  /// Record ownership is re-checked inside the same atomic unit: an upsert of
  /// a record id held by a different entity writes nothing and reports
  /// [`CommitOutcome::RecordOwnedBy`].
  fn commit(
    &self,
    mutation: RecordMutation,
    summary: DerivedSummary,
  ) -> impl Future<Output = Result<CommitOutcome, Self::Error>> + Send + '_;

  // ── Summaries ─────────────────────────────────────────────────────────

  fn get_summary(
    &self,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Option<DerivedSummary>, Self::Error>> + Send + '_;
}
