//! Integration tests for `SqliteStore` against an in-memory database.

use std::{error::Error as _, sync::Arc};

use chrono::{TimeZone, Utc};
use tally_core::{
  Materializer,
  entity::{Entity, NewEntity},
  record::{RecordMutation, ScoreRecord, UpsertRecord},
  store::{CommitOutcome, ScoreStore},
  summary::{DerivedSummary, WeightedAverage, weighted_average},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn entity(name: &str) -> Entity {
  let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
  Entity {
    entity_id:    Uuid::new_v4(),
    display_name: name.into(),
    email:        Some(format!("{}@example.com", name.to_lowercase())),
    created_at:   ts,
    updated_at:   ts,
  }
}

fn record(entity_id: Uuid, score: f64, weight: f64) -> ScoreRecord {
  ScoreRecord {
    record_id: Uuid::new_v4(),
    entity_id,
    score,
    weight,
    recorded_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
  }
}

fn summary_over(entity_id: Uuid, records: &[ScoreRecord], version: u64) -> DerivedSummary {
  DerivedSummary::compute(
    entity_id,
    records,
    version,
    Utc.timestamp_opt(1_700_000_200, 0).unwrap(),
  )
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_entity() {
  let s = store().await;
  let ada = entity("Ada");
  s.insert_entity(ada.clone()).await.unwrap();

  let fetched = s.get_entity(ada.entity_id).await.unwrap();
  assert_eq!(fetched, Some(ada));
}

#[tokio::test]
async fn get_entity_missing_returns_none() {
  let s = store().await;
  assert!(s.get_entity(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_entity_insert_fails() {
  let s = store().await;
  let ada = entity("Ada");
  s.insert_entity(ada.clone()).await.unwrap();
  let err = s.insert_entity(ada).await.unwrap_err();
  assert!(matches!(err, crate::Error::Database(_)));
}

#[tokio::test]
async fn replace_entity_reports_missing_rows() {
  let s = store().await;
  let mut ada = entity("Ada");
  assert!(!s.replace_entity(ada.clone()).await.unwrap());

  s.insert_entity(ada.clone()).await.unwrap();
  ada.email = None;
  assert!(s.replace_entity(ada.clone()).await.unwrap());
  assert_eq!(s.get_entity(ada.entity_id).await.unwrap(), Some(ada));
}

#[tokio::test]
async fn list_entities_returns_all() {
  let s = store().await;
  for name in ["Ada", "Bob", "Cy"] {
    s.insert_entity(entity(name)).await.unwrap();
  }
  assert_eq!(s.list_entities().await.unwrap().len(), 3);
}

// ─── Commit ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn commit_upsert_writes_record_and_summary() {
  let s = store().await;
  let ada = entity("Ada");
  s.insert_entity(ada.clone()).await.unwrap();

  let r1 = record(ada.entity_id, 80.0, 1.0);
  let r2 = record(ada.entity_id, 100.0, 3.0);
  s.commit(RecordMutation::Upsert(r1.clone()), summary_over(ada.entity_id, &[r1.clone()], 1))
    .await
    .unwrap();
  let expected = summary_over(ada.entity_id, &[r1.clone(), r2.clone()], 2);
  s.commit(RecordMutation::Upsert(r2.clone()), expected.clone())
    .await
    .unwrap();

  let records = s.list_records(ada.entity_id).await.unwrap();
  assert_eq!(records.len(), 2);
  assert_eq!(s.get_record(r2.record_id).await.unwrap(), Some(r2));

  let stored = s.get_summary(ada.entity_id).await.unwrap().unwrap();
  assert_eq!(stored, expected);
  assert_eq!(stored.weighted_average, WeightedAverage::Value(95.0));
}

#[tokio::test]
async fn commit_upsert_replaces_by_record_id() {
  let s = store().await;
  let ada = entity("Ada");
  s.insert_entity(ada.clone()).await.unwrap();

  let mut r = record(ada.entity_id, 10.0, 1.0);
  s.commit(RecordMutation::Upsert(r.clone()), summary_over(ada.entity_id, &[r.clone()], 1))
    .await
    .unwrap();
  r.score = 20.0;
  s.commit(RecordMutation::Upsert(r.clone()), summary_over(ada.entity_id, &[r.clone()], 2))
    .await
    .unwrap();

  let records = s.list_records(ada.entity_id).await.unwrap();
  assert_eq!(records, vec![r]);
}

#[tokio::test]
async fn no_data_summary_round_trips_as_null() {
  let s = store().await;
  let ada = entity("Ada");
  s.insert_entity(ada.clone()).await.unwrap();

  let r = record(ada.entity_id, 10.0, 1.0);
  s.commit(RecordMutation::Upsert(r.clone()), summary_over(ada.entity_id, &[r.clone()], 1))
    .await
    .unwrap();
  s.commit(
    RecordMutation::Delete { entity_id: ada.entity_id, record_id: r.record_id },
    summary_over(ada.entity_id, &[], 2),
  )
  .await
  .unwrap();

  assert!(s.list_records(ada.entity_id).await.unwrap().is_empty());
  let stored = s.get_summary(ada.entity_id).await.unwrap().unwrap();
  assert_eq!(stored.weighted_average, WeightedAverage::NoData);
  assert_eq!(stored.record_count, 0);
  assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn zero_weight_violates_schema_check_and_rolls_back() {
  let s = store().await;
  let ada = entity("Ada");
  s.insert_entity(ada.clone()).await.unwrap();

  let bad = record(ada.entity_id, 10.0, 0.0);
  let err = s
    .commit(RecordMutation::Upsert(bad.clone()), summary_over(ada.entity_id, &[], 1))
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Database(_)));

  assert!(s.get_record(bad.record_id).await.unwrap().is_none());
  assert!(s.get_summary(ada.entity_id).await.unwrap().is_none());
}

#[tokio::test]
async fn commit_for_unknown_entity_errors() {
  let s = store().await;
  let r = record(Uuid::new_v4(), 1.0, 1.0);
  let err = s
    .commit(RecordMutation::Upsert(r.clone()), summary_over(r.entity_id, &[r.clone()], 1))
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::EntityNotFound(_)));
}

#[tokio::test]
async fn delete_entity_cascades() {
  let s = store().await;
  let ada = entity("Ada");
  s.insert_entity(ada.clone()).await.unwrap();
  let r = record(ada.entity_id, 1.0, 1.0);
  s.commit(RecordMutation::Upsert(r.clone()), summary_over(ada.entity_id, &[r.clone()], 1))
    .await
    .unwrap();

  assert!(s.delete_entity(ada.entity_id).await.unwrap());
  assert!(s.get_record(r.record_id).await.unwrap().is_none());
  assert!(s.get_summary(ada.entity_id).await.unwrap().is_none());
  assert!(!s.delete_entity(ada.entity_id).await.unwrap());
}

#[tokio::test]
async fn commit_refuses_record_owned_by_other_entity() {
  let s = store().await;
  let ada = entity("Ada");
  let bob = entity("Bob");
  s.insert_entity(ada.clone()).await.unwrap();
  s.insert_entity(bob.clone()).await.unwrap();

  let r = record(ada.entity_id, 10.0, 1.0);
  let ada_summary = summary_over(ada.entity_id, &[r.clone()], 1);
  s.commit(RecordMutation::Upsert(r.clone()), ada_summary.clone())
    .await
    .unwrap();

  let stolen = ScoreRecord { entity_id: bob.entity_id, score: 90.0, ..r.clone() };
  let outcome = s
    .commit(
      RecordMutation::Upsert(stolen.clone()),
      summary_over(bob.entity_id, &[stolen], 1),
    )
    .await
    .unwrap();

  assert_eq!(outcome, CommitOutcome::RecordOwnedBy(ada.entity_id));
  assert_eq!(s.get_record(r.record_id).await.unwrap(), Some(r));
  assert_eq!(s.get_summary(ada.entity_id).await.unwrap(), Some(ada_summary));
  assert!(s.get_summary(bob.entity_id).await.unwrap().is_none());
  assert!(s.list_records(bob.entity_id).await.unwrap().is_empty());
}

#[test]
fn date_parse_error_keeps_its_source() {
  let err = crate::encode::decode_dt("not a timestamp").unwrap_err();
  assert!(matches!(err, crate::Error::DateParse(_)));
  assert!(err.source().is_some());
}

// ─── Engine over SQLite ──────────────────────────────────────────────────────

async fn assert_summary_matches_records(m: &Materializer<SqliteStore>, id: Uuid) {
  let records = m.records(id).await.unwrap();
  match m.summary(id).await.unwrap() {
    Some(stored) => {
      assert_eq!(stored.record_count, records.len(), "entity {id}");
      assert_eq!(
        stored.weighted_average,
        weighted_average(&records).average(),
        "entity {id}"
      );
    }
    None => assert!(records.is_empty(), "entity {id} has records but no summary"),
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_upserts_of_one_record_id_keep_summaries_consistent() {
  let m = Arc::new(Materializer::new(store().await));
  for _ in 0..50 {
    let ada = m.create_entity(NewEntity::new("Ada")).await.unwrap().entity_id;
    let bob = m.create_entity(NewEntity::new("Bob")).await.unwrap().entity_id;
    let record_id = Uuid::new_v4();

    let spawn = |entity_id: Uuid, score: f64| {
      let m = Arc::clone(&m);
      tokio::spawn(async move {
        m.record_upserted(UpsertRecord { record_id, entity_id, score, weight: 1.0 })
          .await
      })
    };
    let a = spawn(ada, 10.0);
    let b = spawn(bob, 90.0);
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{results:?}");
    assert!(results.iter().all(|r| match r {
      Ok(_) => true,
      Err(e) => matches!(e, tally_core::Error::ValidationFailed { field: "record_id", .. }),
    }));
    assert_summary_matches_records(&m, ada).await;
    assert_summary_matches_records(&m, bob).await;
  }
}

#[tokio::test]
async fn overflowing_weights_are_rejected_before_commit() {
  let m = Materializer::new(store().await);
  let ada = m.create_entity(NewEntity::new("Ada")).await.unwrap().entity_id;
  let before = m.record_upserted(UpsertRecord::new(ada, 1.0, 1.0e308)).await.unwrap();

  let err = m
    .record_upserted(UpsertRecord::new(ada, 1.0, 1.0e308))
    .await
    .unwrap_err();
  assert!(
    matches!(err, tally_core::Error::ValidationFailed { field: "weight", .. }),
    "{err}"
  );
  assert_eq!(m.get(ada).await.unwrap(), before);
  assert_eq!(m.records(ada).await.unwrap().len(), 1);
}

#[tokio::test]
async fn materializer_end_to_end() {
  let m = Materializer::new(store().await);
  let ada = m.create_entity(NewEntity::new("Ada")).await.unwrap();

  let first = UpsertRecord::new(ada.entity_id, 80.0, 1.0);
  m.record_upserted(first).await.unwrap();
  let summary = m
    .record_upserted(UpsertRecord::new(ada.entity_id, 100.0, 3.0))
    .await
    .unwrap();
  assert_eq!(summary.weighted_average, WeightedAverage::Value(95.0));
  assert_eq!(m.get(ada.entity_id).await.unwrap(), summary);

  let after = m.record_deleted(ada.entity_id, first.record_id).await.unwrap();
  assert_eq!(after.weighted_average, WeightedAverage::Value(100.0));
  assert_eq!(after.version, 3);
}

#[tokio::test]
async fn summary_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("tally.db");

  let entity_id = {
    let m = Materializer::new(SqliteStore::open(&path).await.unwrap());
    let ada = m.create_entity(NewEntity::new("Ada")).await.unwrap();
    m.record_upserted(UpsertRecord::new(ada.entity_id, 42.0, 2.0))
      .await
      .unwrap();
    ada.entity_id
  };

  let m = Materializer::new(SqliteStore::open(&path).await.unwrap());
  let summary = m.get(entity_id).await.unwrap();
  assert_eq!(summary.weighted_average, WeightedAverage::Value(42.0));
  assert_eq!(summary.version, 1);
}
