//! [`MemoryStore`] — a process-local [`ScoreStore`].
//!
//! All state sits behind one `RwLock`, so every method (including
//! [`ScoreStore::commit`]) is trivially atomic.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, PoisonError, RwLock},
};

use thiserror::Error;
use uuid::Uuid;

use crate::{
  entity::Entity,
  record::{RecordMutation, ScoreRecord},
  store::{CommitOutcome, ScoreStore},
  summary::DerivedSummary,
};

#[derive(Debug, Error)]
pub enum MemoryStoreError {
  #[error("entity {0} already exists")]
  DuplicateEntity(Uuid),

  #[error("entity not found: {0}")]
  MissingEntity(Uuid),
}

#[derive(Default)]
struct Tables {
  entities:  HashMap<Uuid, Entity>,
  /// Keyed by entity, then record, so an entity's records come out in a
  /// stable order.
  records:   HashMap<Uuid, BTreeMap<Uuid, ScoreRecord>>,
  /// record_id → owning entity_id.
  owners:    HashMap<Uuid, Uuid>,
  summaries: HashMap<Uuid, DerivedSummary>,
}

/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
  tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
    let guard = self.tables.read().unwrap_or_else(PoisonError::into_inner);
    f(&guard)
  }

  fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
    let mut guard = self.tables.write().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
  }
}

impl ScoreStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn insert_entity(&self, entity: Entity) -> Result<(), Self::Error> {
    self.write(|t| {
      if t.entities.contains_key(&entity.entity_id) {
        return Err(MemoryStoreError::DuplicateEntity(entity.entity_id));
      }
      t.entities.insert(entity.entity_id, entity);
      Ok(())
    })
  }

  async fn replace_entity(&self, entity: Entity) -> Result<bool, Self::Error> {
    Ok(self.write(|t| match t.entities.get_mut(&entity.entity_id) {
      Some(slot) => {
        *slot = entity;
        true
      }
      None => false,
    }))
  }

  async fn delete_entity(&self, entity_id: Uuid) -> Result<bool, Self::Error> {
    Ok(self.write(|t| {
      if t.entities.remove(&entity_id).is_none() {
        return false;
      }
      if let Some(records) = t.records.remove(&entity_id) {
        for record_id in records.keys() {
          t.owners.remove(record_id);
        }
      }
      t.summaries.remove(&entity_id);
      true
    }))
  }

  async fn get_entity(&self, entity_id: Uuid) -> Result<Option<Entity>, Self::Error> {
    Ok(self.read(|t| t.entities.get(&entity_id).cloned()))
  }

  async fn list_entities(&self) -> Result<Vec<Entity>, Self::Error> {
    let mut all: Vec<Entity> = self.read(|t| t.entities.values().cloned().collect());
    all.sort_by_key(|e| (e.created_at, e.entity_id));
    Ok(all)
  }

  async fn get_record(&self, record_id: Uuid) -> Result<Option<ScoreRecord>, Self::Error> {
    Ok(self.read(|t| {
      let owner = t.owners.get(&record_id)?;
      t.records.get(owner)?.get(&record_id).cloned()
    }))
  }

  async fn list_records(&self, entity_id: Uuid) -> Result<Vec<ScoreRecord>, Self::Error> {
    Ok(self.read(|t| {
      t.records
        .get(&entity_id)
        .map(|rs| rs.values().cloned().collect())
        .unwrap_or_default()
    }))
  }

  async fn commit(
    &self,
    mutation: RecordMutation,
    summary: DerivedSummary,
  ) -> Result<CommitOutcome, Self::Error> {
    self.write(|t| {
      let entity_id = mutation.entity_id();
      if !t.entities.contains_key(&entity_id) {
        return Err(MemoryStoreError::MissingEntity(entity_id));
      }
      match mutation {
        RecordMutation::Upsert(record) => {
          if let Some(&owner) = t.owners.get(&record.record_id)
            && owner != entity_id
          {
            return Ok(CommitOutcome::RecordOwnedBy(owner));
          }
          t.owners.insert(record.record_id, entity_id);
          t.records
            .entry(entity_id)
            .or_default()
            .insert(record.record_id, record);
        }
        RecordMutation::Delete { record_id, .. } => {
          t.owners.remove(&record_id);
          if let Some(rs) = t.records.get_mut(&entity_id) {
            rs.remove(&record_id);
          }
        }
      }
      t.summaries.insert(entity_id, summary);
      Ok(CommitOutcome::Applied)
    })
  }

  async fn get_summary(&self, entity_id: Uuid) -> Result<Option<DerivedSummary>, Self::Error> {
    Ok(self.read(|t| t.summaries.get(&entity_id).cloned()))
  }
}
