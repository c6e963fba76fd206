//! [`SqliteStore`] — the SQLite implementation of [`ScoreStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tally_core::{
  entity::Entity,
  record::{RecordMutation, ScoreRecord},
  store::{CommitOutcome, ScoreStore},
  summary::DerivedSummary,
};

use crate::{
  Error, Result,
  encode::{RawEntity, RawRecord, RawSummary, decode_uuid, encode_dt, encode_uuid},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// What the commit transaction did, before ids are decoded.
enum TxOutcome {
  Applied,
  MissingEntity,
  /// Raw `entity_id` of the record's current owner.
  Conflict(String),
}

/// A Tally score store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "opening sqlite store");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Write an entity row; `replace` selects UPDATE over INSERT.
  async fn write_entity(&self, entity: Entity, replace: bool) -> Result<usize> {
    let id_str      = encode_uuid(entity.entity_id);
    let created_str = encode_dt(entity.created_at);
    let updated_str = encode_dt(entity.updated_at);
    let name        = entity.display_name;
    let email       = entity.email;

    let sql = if replace {
      "UPDATE entities
         SET display_name = ?2, email = ?3, created_at = ?4, updated_at = ?5
       WHERE entity_id = ?1"
    } else {
      "INSERT INTO entities (entity_id, display_name, email, created_at, updated_at)
       VALUES (?1, ?2, ?3, ?4, ?5)"
    };

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          sql,
          rusqlite::params![id_str, name, email, created_str, updated_str],
        )?)
      })
      .await?;
    Ok(changed)
  }
}

// ─── ScoreStore impl ─────────────────────────────────────────────────────────

impl ScoreStore for SqliteStore {
  type Error = Error;

  // ── Entities ──────────────────────────────────────────────────────────────

  async fn insert_entity(&self, entity: Entity) -> Result<()> {
    self.write_entity(entity, false).await?;
    Ok(())
  }

  async fn replace_entity(&self, entity: Entity) -> Result<bool> {
    Ok(self.write_entity(entity, true).await? > 0)
  }

  async fn delete_entity(&self, entity_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(entity_id);

    // Records and the summary row go with it via ON DELETE CASCADE.
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM entities WHERE entity_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn get_entity(&self, entity_id: Uuid) -> Result<Option<Entity>> {
    let id_str = encode_uuid(entity_id);

    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM entities WHERE entity_id = ?1", RawEntity::COLUMNS),
            rusqlite::params![id_str],
            RawEntity::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawEntity::into_entity).transpose()
  }

  async fn list_entities(&self) -> Result<Vec<Entity>> {
    let raws: Vec<RawEntity> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM entities ORDER BY created_at, entity_id",
          RawEntity::COLUMNS
        ))?;
        let rows = stmt
          .query_map([], RawEntity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEntity::into_entity).collect()
  }

  // ── Score records ─────────────────────────────────────────────────────────

  async fn get_record(&self, record_id: Uuid) -> Result<Option<ScoreRecord>> {
    let id_str = encode_uuid(record_id);

    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM score_records WHERE record_id = ?1", RawRecord::COLUMNS),
            rusqlite::params![id_str],
            RawRecord::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRecord::into_record).transpose()
  }

  async fn list_records(&self, entity_id: Uuid) -> Result<Vec<ScoreRecord>> {
    let id_str = encode_uuid(entity_id);

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM score_records WHERE entity_id = ?1 ORDER BY record_id",
          RawRecord::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn commit(
    &self,
    mutation: RecordMutation,
    summary: DerivedSummary,
  ) -> Result<CommitOutcome> {
    let entity_id = mutation.entity_id();
    let entity_str = encode_uuid(entity_id);
    let row = RawSummary::encode(&summary);

    let record_row = match &mutation {
      RecordMutation::Upsert(r) => Some((
        encode_uuid(r.record_id),
        r.score,
        r.weight,
        encode_dt(r.recorded_at),
      )),
      RecordMutation::Delete { .. } => None,
    };
    let delete_id = match &mutation {
      RecordMutation::Delete { record_id, .. } => Some(encode_uuid(*record_id)),
      RecordMutation::Upsert(_) => None,
    };

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let exists = tx
          .query_row(
            "SELECT 1 FROM entities WHERE entity_id = ?1",
            rusqlite::params![entity_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if !exists {
          return Ok(TxOutcome::MissingEntity);
        }

        if let Some((record_id, score, weight, recorded_at)) = record_row {
          let changed = tx.execute(
            "INSERT INTO score_records (record_id, entity_id, score, weight, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (record_id) DO UPDATE SET
               score       = excluded.score,
               weight      = excluded.weight,
               recorded_at = excluded.recorded_at
             WHERE score_records.entity_id = excluded.entity_id",
            rusqlite::params![record_id, entity_str, score, weight, recorded_at],
          )?;
          if changed == 0 {
            // Held by another entity; dropping `tx` rolls back.
            let owner: String = tx.query_row(
              "SELECT entity_id FROM score_records WHERE record_id = ?1",
              rusqlite::params![record_id],
              |row| row.get(0),
            )?;
            return Ok(TxOutcome::Conflict(owner));
          }
        }
        if let Some(record_id) = delete_id {
          tx.execute(
            "DELETE FROM score_records WHERE record_id = ?1 AND entity_id = ?2",
            rusqlite::params![record_id, entity_str],
          )?;
        }

        tx.execute(
          "INSERT INTO derived_summaries (
             entity_id, record_count, score_weight_sum, weight_sum,
             weighted_average, version, computed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (entity_id) DO UPDATE SET
             record_count     = excluded.record_count,
             score_weight_sum = excluded.score_weight_sum,
             weight_sum       = excluded.weight_sum,
             weighted_average = excluded.weighted_average,
             version          = excluded.version,
             computed_at      = excluded.computed_at",
          rusqlite::params![
            row.entity_id,
            row.record_count,
            row.score_weight_sum,
            row.weight_sum,
            row.weighted_average,
            row.version,
            row.computed_at,
          ],
        )?;

        tx.commit()?;
        Ok(TxOutcome::Applied)
      })
      .await?;

    match outcome {
      TxOutcome::Applied => Ok(CommitOutcome::Applied),
      TxOutcome::MissingEntity => Err(Error::EntityNotFound(entity_id)),
      TxOutcome::Conflict(owner) => Ok(CommitOutcome::RecordOwnedBy(decode_uuid(&owner)?)),
    }
  }

  // ── Summaries ─────────────────────────────────────────────────────────────

  async fn get_summary(&self, entity_id: Uuid) -> Result<Option<DerivedSummary>> {
    let id_str = encode_uuid(entity_id);

    let raw: Option<RawSummary> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {} FROM derived_summaries WHERE entity_id = ?1",
              RawSummary::COLUMNS
            ),
            rusqlite::params![id_str],
            RawSummary::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSummary::into_summary).transpose()
  }
}
