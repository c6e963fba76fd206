//! Entity — the subject row that owns zero or more score records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A subject identified by an immutable UUID.
///
/// Timestamps are assigned by the write hooks, never by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub entity_id:    Uuid,
  pub display_name: String,
  pub email:        Option<String>,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

/// Input to [`crate::engine::Materializer::create_entity`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEntity {
  /// Caller-supplied id; a fresh v4 UUID is generated when absent.
  #[serde(default)]
  pub entity_id:    Option<Uuid>,
  pub display_name: String,
  #[serde(default)]
  pub email:        Option<String>,
}

impl NewEntity {
  pub fn new(display_name: impl Into<String>) -> Self {
    Self { entity_id: None, display_name: display_name.into(), email: None }
  }

  pub fn with_email(mut self, email: impl Into<String>) -> Self {
    self.email = Some(email.into());
    self
  }
}

/// A partial update to an existing entity. `None` leaves a field unchanged.
///
/// `email: Some(None)` clears the address.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityPatch {
  #[serde(default)]
  pub display_name: Option<String>,
  #[serde(default, with = "double_option")]
  pub email:        Option<Option<String>>,
}

impl EntityPatch {
  /// Apply the patch on top of `entity`, producing the candidate row that is
  /// handed to the write hooks.
  pub fn apply(self, entity: &Entity) -> Entity {
    let mut next = entity.clone();
    if let Some(name) = self.display_name {
      next.display_name = name;
    }
    if let Some(email) = self.email {
      next.email = email;
    }
    next
  }
}

// Distinguishes an absent `email` key from an explicit `null`.
mod double_option {
  use serde::{Deserialize, Deserializer};

  pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
  where
    D: Deserializer<'de>,
  {
    Option::<String>::deserialize(de).map(Some)
  }
}

/// An attribute of [`Entity`] that a lookup index can be keyed on.
///
/// Parses from and displays as the snake_case attribute path, e.g. `"email"`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityAttribute {
  DisplayName,
  Email,
  CreatedAt,
  UpdatedAt,
}
