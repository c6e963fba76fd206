//! [`Materializer`] keeps every entity's [`DerivedSummary`] consistent with
//! its score records, runs write hooks on entity writes, and maintains the
//! registered lookup indexes.
//!
//! # Consistency
//!
//! Writes to one entity are serialised by a per-entity async mutex. Inside
//! that critical section the engine reads the entity's full record set,
//! recomputes the summary from scratch and hands the record mutation and the
//! new summary to [`ScoreStore::commit`] as a single atomic unit. A reader of
//! the summary row therefore sees either the state before or after a write,
//! never a half-applied one. Different entities never contend.

use std::{
  collections::{BTreeMap, HashMap},
  ops::Bound,
  sync::{Arc, Mutex, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
  Error, Result,
  entity::{Entity, EntityPatch, NewEntity},
  index::{IndexDescriptor, IndexKey, LookupIndex},
  record::{RecordMutation, ScoreRecord, UpsertRecord},
  store::{CommitOutcome, ScoreStore},
  summary::DerivedSummary,
  trigger::{TriggerChain, WriteContext},
};

// ─── Per-entity locks ────────────────────────────────────────────────────────

type LockTable = HashMap<Uuid, Arc<AsyncMutex<()>>>;

/// Lazily created per-entity write locks. An entry lives only while some task
/// holds or waits for it.
#[derive(Default)]
struct EntityLocks {
  table: Mutex<LockTable>,
}

impl EntityLocks {
  /// Acquire the write lock for `entity_id`, waiting behind any in-flight
  /// writer of the same entity.
  async fn acquire(&self, entity_id: Uuid) -> EntityGuard<'_> {
    let lock = {
      let mut table = self.table();
      Arc::clone(table.entry(entity_id).or_default())
    };
    EntityGuard {
      locks: self,
      entity_id,
      guard: Some(lock.lock_owned().await),
    }
  }

  fn table(&self) -> std::sync::MutexGuard<'_, LockTable> {
    self.table.lock().unwrap_or_else(PoisonError::into_inner)
  }

  #[cfg(test)]
  fn len(&self) -> usize { self.table().len() }
}

/// Holds an entity's write lock and removes the table entry on release when
/// no other task is holding or waiting on it.
struct EntityGuard<'a> {
  locks:     &'a EntityLocks,
  entity_id: Uuid,
  guard:     Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard<'_> {
  fn drop(&mut self) {
    let Some(guard) = self.guard.take() else { return };
    // New handles are only cloned out while the table is locked, so the
    // strong count cannot grow underneath us here.
    let mut table = self.locks.table();
    let lock = Arc::clone(OwnedMutexGuard::mutex(&guard));
    drop(guard);
    // One handle in the table, one in `lock`.
    if Arc::strong_count(&lock) == 2
      && table.get(&self.entity_id).is_some_and(|l| Arc::ptr_eq(l, &lock))
    {
      table.remove(&self.entity_id);
    }
  }
}

// ─── Materializer ────────────────────────────────────────────────────────────

pub struct Materializer<S> {
  store:    S,
  triggers: TriggerChain,
  locks:    EntityLocks,
  indexes:  RwLock<BTreeMap<String, LookupIndex>>,
}

impl<S: ScoreStore> Materializer<S> {
  /// An engine over `store` with [`TriggerChain::standard`] installed.
  pub fn new(store: S) -> Self { Self::with_triggers(store, TriggerChain::standard()) }

  pub fn with_triggers(store: S, triggers: TriggerChain) -> Self {
    Self {
      store,
      triggers,
      locks: EntityLocks::default(),
      indexes: RwLock::new(BTreeMap::new()),
    }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn triggers(&self) -> &TriggerChain { &self.triggers }

  /// Number of live entries in the per-entity lock table.
  #[cfg(test)]
  pub(crate) fn lock_entries(&self) -> usize { self.locks.len() }

  // ── Entities ──────────────────────────────────────────────────────────────

  /// Create an entity. The candidate row passes through the trigger chain
  /// before anything is written.
  pub async fn create_entity(&self, input: NewEntity) -> Result<Entity> {
    let ctx = WriteContext::new(Utc::now());
    let entity_id = input.entity_id.unwrap_or_else(Uuid::new_v4);
    let _guard = self.locks.acquire(entity_id).await;

    if self.fetch_entity(entity_id).await?.is_some() {
      return Err(Error::validation(
        "entity_id",
        format!("entity {entity_id} already exists"),
      ));
    }

    let candidate = Entity {
      entity_id,
      display_name: input.display_name,
      email: input.email,
      created_at: ctx.now,
      updated_at: ctx.now,
    };
    let entity = self.triggers.run(&ctx, None, candidate)?;
    ensure_same_id(entity_id, &entity)?;

    self.store.insert_entity(entity.clone()).await.map_err(Error::store)?;
    self.reindex(|index| index.on_entity_changed(&entity));
    Ok(entity)
  }

  /// Apply `patch` to an existing entity. A trigger rejection leaves the
  /// stored row and every index untouched.
  pub async fn update_entity(&self, entity_id: Uuid, patch: EntityPatch) -> Result<Entity> {
    let ctx = WriteContext::new(Utc::now());
    let _guard = self.locks.acquire(entity_id).await;

    let old = self.require_entity(entity_id).await?;
    let candidate = patch.apply(&old);
    let entity = self.triggers.run(&ctx, Some(&old), candidate)?;
    ensure_same_id(entity_id, &entity)?;

    if !self.store.replace_entity(entity.clone()).await.map_err(Error::store)? {
      return Err(Error::EntityNotFound(entity_id));
    }
    self.reindex(|index| index.on_entity_changed(&entity));
    Ok(entity)
  }

  /// Remove an entity along with its records and summary.
  pub async fn remove_entity(&self, entity_id: Uuid) -> Result<()> {
    let _guard = self.locks.acquire(entity_id).await;
    if !self.store.delete_entity(entity_id).await.map_err(Error::store)? {
      return Err(Error::EntityNotFound(entity_id));
    }
    self.reindex(|index| index.on_entity_removed(entity_id));
    tracing::debug!(%entity_id, "entity removed");
    Ok(())
  }

  pub async fn entity(&self, entity_id: Uuid) -> Result<Entity> {
    self.require_entity(entity_id).await
  }

  pub async fn entities(&self) -> Result<Vec<Entity>> {
    self.store.list_entities().await.map_err(Error::store)
  }

  // ── Score records ─────────────────────────────────────────────────────────

  /// Insert or replace a score record and return the recomputed summary.
  ///
  /// The summary is committed before this returns; there is no window in
  /// which a reader can observe the new record with the old average.
  pub async fn record_upserted(&self, input: UpsertRecord) -> Result<DerivedSummary> {
    input.validate()?;
    let entity_id = input.entity_id;
    let _guard = self.locks.acquire(entity_id).await;

    self.require_entity(entity_id).await?;
    if let Some(existing) =
      self.store.get_record(input.record_id).await.map_err(Error::store)?
      && existing.entity_id != entity_id
    {
      return Err(record_owned_by(input.record_id, existing.entity_id));
    }

    let now = Utc::now();
    let record = input.into_record(now);
    let mut records = self.store.list_records(entity_id).await.map_err(Error::store)?;
    records.retain(|r| r.record_id != record.record_id);
    records.push(record.clone());

    let summary = self.recompute(entity_id, &records, now).await?;
    let outcome = self
      .store
      .commit(RecordMutation::Upsert(record), summary.clone())
      .await
      .map_err(Error::store)?;
    if let CommitOutcome::RecordOwnedBy(owner) = outcome {
      tracing::warn!(
        %entity_id,
        record_id = %input.record_id,
        %owner,
        "record id claimed by another entity"
      );
      return Err(record_owned_by(input.record_id, owner));
    }
    Ok(summary)
  }

  /// Remove a score record and return the recomputed summary. Removing the
  /// last record leaves a summary in the `NoData` state.
  pub async fn record_deleted(
    &self,
    entity_id: Uuid,
    record_id: Uuid,
  ) -> Result<DerivedSummary> {
    let _guard = self.locks.acquire(entity_id).await;

    self.require_entity(entity_id).await?;
    let mut records = self.store.list_records(entity_id).await.map_err(Error::store)?;
    let before = records.len();
    records.retain(|r| r.record_id != record_id);
    if records.len() == before {
      return Err(Error::RecordNotFound { entity_id, record_id });
    }

    let summary = self.recompute(entity_id, &records, Utc::now()).await?;
    let outcome = self
      .store
      .commit(RecordMutation::Delete { entity_id, record_id }, summary.clone())
      .await
      .map_err(Error::store)?;
    if let CommitOutcome::RecordOwnedBy(owner) = outcome {
      return Err(record_owned_by(record_id, owner));
    }
    Ok(summary)
  }

  pub async fn records(&self, entity_id: Uuid) -> Result<Vec<ScoreRecord>> {
    self.require_entity(entity_id).await?;
    self.store.list_records(entity_id).await.map_err(Error::store)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// The entity's current summary.
  ///
  /// Fails with [`Error::NoData`] when the entity exists but has no records,
  /// and with [`Error::EntityNotFound`] when it does not exist at all.
  pub async fn get(&self, entity_id: Uuid) -> Result<DerivedSummary> {
    match self.store.get_summary(entity_id).await.map_err(Error::store)? {
      Some(summary) if summary.weighted_average.is_no_data() => {
        Err(Error::NoData(entity_id))
      }
      Some(summary) => Ok(summary),
      None => {
        self.require_entity(entity_id).await?;
        Err(Error::NoData(entity_id))
      }
    }
  }

  /// The raw summary row, including the `NoData` state. `None` if the entity
  /// has never had a record.
  pub async fn summary(&self, entity_id: Uuid) -> Result<Option<DerivedSummary>> {
    self.require_entity(entity_id).await?;
    self.store.get_summary(entity_id).await.map_err(Error::store)
  }

  // ── Indexes ───────────────────────────────────────────────────────────────

  /// Register and build a new index. Returns the number of entities indexed.
  ///
  /// The index is registered before the backfill so concurrent entity writes
  /// maintain it; each backfilled entity is re-read under its write lock.
  pub async fn create_index(&self, descriptor: IndexDescriptor) -> Result<usize> {
    descriptor.validate()?;
    let name = descriptor.name.clone();
    {
      let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
      if indexes.contains_key(&name) {
        return Err(Error::validation(
          "name",
          format!("index {name:?} already exists"),
        ));
      }
      indexes.insert(name.clone(), LookupIndex::build(descriptor, std::iter::empty()));
    }

    let listed = match self.store.list_entities().await {
      Ok(listed) => listed,
      Err(e) => {
        self.unregister_index(&name);
        return Err(Error::store(e));
      }
    };
    for listed_entity in listed {
      let entity_id = listed_entity.entity_id;
      let _guard = self.locks.acquire(entity_id).await;
      let current = match self.store.get_entity(entity_id).await {
        Ok(current) => current,
        Err(e) => {
          self.unregister_index(&name);
          return Err(Error::store(e));
        }
      };
      if let Some(entity) = current {
        self.with_index_mut(&name, |index| index.on_entity_changed(&entity));
      }
    }

    let entries = self.with_index(&name, LookupIndex::len)?;
    tracing::info!(index = %name, entries, "index created");
    Ok(entries)
  }

  pub fn drop_index(&self, name: &str) -> Result<()> {
    if self.unregister_index(name) {
      tracing::info!(index = %name, "index dropped");
      Ok(())
    } else {
      Err(Error::IndexNotFound(name.to_owned()))
    }
  }

  pub fn indexes(&self) -> Vec<IndexDescriptor> {
    let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
    indexes.values().map(|i| i.descriptor().clone()).collect()
  }

  /// Parse raw caller strings into a typed key for the named index.
  pub fn parse_key<K: AsRef<str>>(&self, name: &str, values: &[K]) -> Result<IndexKey> {
    self.with_index(name, |index| index.descriptor().parse_key(values))?
  }

  pub fn lookup(&self, name: &str, key: &IndexKey) -> Result<Vec<Uuid>> {
    self.with_index(name, |index| index.lookup(key))
  }

  pub fn lookup_range(
    &self,
    name: &str,
    from: Bound<&IndexKey>,
    to: Bound<&IndexKey>,
  ) -> Result<Vec<Uuid>> {
    self.with_index(name, |index| index.range(from, to))
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  async fn fetch_entity(&self, entity_id: Uuid) -> Result<Option<Entity>> {
    self.store.get_entity(entity_id).await.map_err(Error::store)
  }

  async fn require_entity(&self, entity_id: Uuid) -> Result<Entity> {
    self
      .fetch_entity(entity_id)
      .await?
      .ok_or(Error::EntityNotFound(entity_id))
  }

  async fn recompute(
    &self,
    entity_id: Uuid,
    records: &[ScoreRecord],
    now: DateTime<Utc>,
  ) -> Result<DerivedSummary> {
    let previous = self.store.get_summary(entity_id).await.map_err(Error::store)?;
    let version = previous.map_or(0, |s| s.version) + 1;
    let summary = DerivedSummary::compute(entity_id, records, version, now);
    if !(summary.score_weight_sum.is_finite() && summary.weight_sum.is_finite()) {
      return Err(Error::validation(
        "weight",
        "the entity's weighted sums overflow the representable range",
      ));
    }
    tracing::debug!(
      %entity_id,
      version,
      record_count = summary.record_count,
      average = ?summary.weighted_average,
      "summary recomputed"
    );
    Ok(summary)
  }

  fn reindex(&self, mut f: impl FnMut(&mut LookupIndex)) {
    let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
    for index in indexes.values_mut() {
      f(index);
    }
  }

  fn with_index<T>(&self, name: &str, f: impl FnOnce(&LookupIndex) -> T) -> Result<T> {
    let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
    indexes
      .get(name)
      .map(f)
      .ok_or_else(|| Error::IndexNotFound(name.to_owned()))
  }

  fn with_index_mut(&self, name: &str, f: impl FnOnce(&mut LookupIndex)) {
    let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(index) = indexes.get_mut(name) {
      f(index);
    }
  }

  fn unregister_index(&self, name: &str) -> bool {
    let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
    indexes.remove(name).is_some()
  }
}

fn record_owned_by(record_id: Uuid, owner: Uuid) -> Error {
  Error::validation("record_id", format!("record {record_id} belongs to entity {owner}"))
}

fn ensure_same_id(expected: Uuid, entity: &Entity) -> Result<()> {
  if entity.entity_id != expected {
    return Err(Error::validation("entity_id", "entity ids are immutable"));
  }
  Ok(())
}
