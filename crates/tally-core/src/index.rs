//! Ordered secondary indexes over entity attributes.
//!
//! An index maps an [`IndexKey`] (one [`KeyPart`] per indexed attribute) to
//! the set of entity ids holding that key. A reverse map from entity id to its
//! current key makes incremental maintenance O(log n) per change instead of a
//! full rebuild.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  ops::Bound,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  entity::{Entity, EntityAttribute},
};

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// Which entity attributes an index is built over, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
  pub name:       String,
  pub attributes: Vec<EntityAttribute>,
}

impl IndexDescriptor {
  pub fn new(
    name: impl Into<String>,
    attributes: impl IntoIterator<Item = EntityAttribute>,
  ) -> Self {
    Self { name: name.into(), attributes: attributes.into_iter().collect() }
  }

  /// Build a descriptor from dotted attribute paths such as `"email"` or
  /// `"display_name"`.
  pub fn from_paths<'a>(
    name: impl Into<String>,
    paths: impl IntoIterator<Item = &'a str>,
  ) -> Result<Self> {
    let attributes = paths
      .into_iter()
      .map(|p| {
        p.parse::<EntityAttribute>().map_err(|_| {
          Error::validation("attributes", format!("unknown attribute path {p:?}"))
        })
      })
      .collect::<Result<Vec<_>>>()?;
    let descriptor = Self { name: name.into(), attributes };
    descriptor.validate()?;
    Ok(descriptor)
  }

  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::validation("name", "index name must not be empty"));
    }
    if self.attributes.is_empty() {
      return Err(Error::validation(
        "attributes",
        "an index needs at least one attribute",
      ));
    }
    Ok(())
  }

  /// Extract this index's key from `entity`.
  pub fn key_for(&self, entity: &Entity) -> IndexKey {
    IndexKey(
      self
        .attributes
        .iter()
        .map(|attr| KeyPart::extract(*attr, entity))
        .collect(),
    )
  }

  /// Parse caller-supplied strings into a key, one value per attribute.
  ///
  /// Text attributes take the value verbatim (emails are lowercased to match
  /// the stored form); timestamp attributes expect RFC 3339. An empty string
  /// for `email` selects entities without an address.
  pub fn parse_key<S: AsRef<str>>(&self, values: &[S]) -> Result<IndexKey> {
    if values.len() != self.attributes.len() {
      return Err(Error::validation(
        "key",
        format!(
          "index {:?} expects {} key value(s), got {}",
          self.name,
          self.attributes.len(),
          values.len()
        ),
      ));
    }
    self
      .attributes
      .iter()
      .zip(values)
      .map(|(attr, raw)| KeyPart::parse(*attr, raw.as_ref()))
      .collect::<Result<Vec<_>>>()
      .map(IndexKey)
  }
}

// ─── Keys ────────────────────────────────────────────────────────────────────

/// One component of an index key. `Missing` sorts before every value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
  Missing,
  Text(String),
  Timestamp(DateTime<Utc>),
}

impl KeyPart {
  fn extract(attr: EntityAttribute, entity: &Entity) -> Self {
    match attr {
      EntityAttribute::DisplayName => Self::Text(entity.display_name.clone()),
      EntityAttribute::Email => {
        entity.email.clone().map_or(Self::Missing, Self::Text)
      }
      EntityAttribute::CreatedAt => Self::Timestamp(entity.created_at),
      EntityAttribute::UpdatedAt => Self::Timestamp(entity.updated_at),
    }
  }

  fn parse(attr: EntityAttribute, raw: &str) -> Result<Self> {
    match attr {
      EntityAttribute::DisplayName => Ok(Self::Text(raw.to_owned())),
      EntityAttribute::Email if raw.is_empty() => Ok(Self::Missing),
      EntityAttribute::Email => Ok(Self::Text(raw.trim().to_lowercase())),
      EntityAttribute::CreatedAt | EntityAttribute::UpdatedAt => {
        DateTime::parse_from_rfc3339(raw)
          .map(|dt| Self::Timestamp(dt.with_timezone(&Utc)))
          .map_err(|e| Error::validation("key", format!("{attr}: {e}")))
      }
    }
  }
}

/// A composite key, ordered lexicographically by part.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(pub Vec<KeyPart>);

impl IndexKey {
  pub fn text(value: impl Into<String>) -> Self {
    Self(vec![KeyPart::Text(value.into())])
  }
}

// ─── Index ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LookupIndex {
  descriptor: IndexDescriptor,
  entries:    BTreeMap<IndexKey, BTreeSet<Uuid>>,
  keys:       HashMap<Uuid, IndexKey>,
}

impl LookupIndex {
  /// Build the index over every entity in `entities`.
  pub fn build<'a>(
    descriptor: IndexDescriptor,
    entities: impl IntoIterator<Item = &'a Entity>,
  ) -> Self {
    let mut index = Self {
      descriptor,
      entries: BTreeMap::new(),
      keys: HashMap::new(),
    };
    for entity in entities {
      index.on_entity_changed(entity);
    }
    index
  }

  pub fn descriptor(&self) -> &IndexDescriptor { &self.descriptor }

  /// Number of entities currently indexed.
  pub fn len(&self) -> usize { self.keys.len() }

  pub fn is_empty(&self) -> bool { self.keys.is_empty() }

  /// Ids of entities whose key equals `key`, ascending.
  pub fn lookup(&self, key: &IndexKey) -> Vec<Uuid> {
    self
      .entries
      .get(key)
      .map(|ids| ids.iter().copied().collect())
      .unwrap_or_default()
  }

  /// Ids of entities whose key falls within the bounds, ordered by key then
  /// id.
  pub fn range(&self, from: Bound<&IndexKey>, to: Bound<&IndexKey>) -> Vec<Uuid> {
    if let (
      Bound::Included(lo) | Bound::Excluded(lo),
      Bound::Included(hi) | Bound::Excluded(hi),
    ) = (from, to)
    {
      // BTreeMap::range panics on inverted bounds.
      if lo > hi {
        return Vec::new();
      }
      if lo == hi && !matches!((from, to), (Bound::Included(_), Bound::Included(_))) {
        return Vec::new();
      }
    }
    self
      .entries
      .range::<IndexKey, _>((from, to))
      .flat_map(|(_, ids)| ids.iter().copied())
      .collect()
  }

  /// Re-index `entity` after a create or update.
  pub fn on_entity_changed(&mut self, entity: &Entity) {
    let key = self.descriptor.key_for(entity);
    if self.keys.get(&entity.entity_id) == Some(&key) {
      return;
    }
    self.detach(entity.entity_id);
    self.entries.entry(key.clone()).or_default().insert(entity.entity_id);
    self.keys.insert(entity.entity_id, key);
  }

  pub fn on_entity_removed(&mut self, entity_id: Uuid) { self.detach(entity_id); }

  fn detach(&mut self, entity_id: Uuid) {
    let Some(old) = self.keys.remove(&entity_id) else { return };
    if let Some(ids) = self.entries.get_mut(&old) {
      ids.remove(&entity_id);
      if ids.is_empty() {
        self.entries.remove(&old);
      }
    }
  }

  /// Every `(key, ids)` entry in key order; used to compare against a fresh
  /// rebuild.
  pub fn entries(&self) -> impl Iterator<Item = (&IndexKey, &BTreeSet<Uuid>)> {
    self.entries.iter()
  }
}
