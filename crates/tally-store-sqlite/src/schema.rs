//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS entities (
    entity_id     TEXT PRIMARY KEY,
    display_name  TEXT NOT NULL,
    email         TEXT,
    created_at    TEXT NOT NULL,   -- RFC 3339 UTC
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS score_records (
    record_id    TEXT PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entities(entity_id) ON DELETE CASCADE,
    score        REAL NOT NULL,
    weight       REAL NOT NULL CHECK (weight > 0),
    recorded_at  TEXT NOT NULL
);

-- One row per entity; written only together with a score_records change.
CREATE TABLE IF NOT EXISTS derived_summaries (
    entity_id         TEXT PRIMARY KEY REFERENCES entities(entity_id) ON DELETE CASCADE,
    record_count      INTEGER NOT NULL CHECK (record_count >= 0),
    score_weight_sum  REAL NOT NULL,
    weight_sum        REAL NOT NULL,
    weighted_average  REAL,            -- NULL when the entity has no records
    version           INTEGER NOT NULL,
    computed_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS score_records_entity_idx ON score_records(entity_id);
CREATE INDEX IF NOT EXISTS entities_email_idx       ON entities(email);

PRAGMA user_version = 1;
";
