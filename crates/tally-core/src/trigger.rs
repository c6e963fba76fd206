//! Write hooks run inline with every entity create and update.
//!
//! A hook receives the stored row (if any) and the candidate row, and returns
//! the row to persist or an error. Hooks must be pure functions of their
//! inputs and the [`WriteContext`]: a retried write sees the same timestamp
//! and therefore produces the same row.

use chrono::{DateTime, Utc};

use crate::{Error, Result, entity::Entity};

/// Per-write context shared by every hook in the chain.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext {
  /// The single timestamp assigned to this write.
  pub now: DateTime<Utc>,
}

impl WriteContext {
  pub fn new(now: DateTime<Utc>) -> Self { Self { now } }
}

pub trait WriteHook: Send + Sync {
  fn name(&self) -> &'static str;

  fn before_write(
    &self,
    ctx: &WriteContext,
    old: Option<&Entity>,
    new: Entity,
  ) -> Result<Entity>;
}

// ─── Built-in hooks ──────────────────────────────────────────────────────────

/// Stamps `created_at` on insert, pins it on update, and refreshes
/// `updated_at` on every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct TouchTimestamps;

impl WriteHook for TouchTimestamps {
  fn name(&self) -> &'static str { "touch_timestamps" }

  fn before_write(
    &self,
    ctx: &WriteContext,
    old: Option<&Entity>,
    mut new: Entity,
  ) -> Result<Entity> {
    new.created_at = old.map_or(ctx.now, |o| o.created_at);
    new.updated_at = ctx.now;
    Ok(new)
  }
}

/// Trims the display name and rejects blank names.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeDisplayName;

impl WriteHook for NormalizeDisplayName {
  fn name(&self) -> &'static str { "normalize_display_name" }

  fn before_write(
    &self,
    _ctx: &WriteContext,
    _old: Option<&Entity>,
    mut new: Entity,
  ) -> Result<Entity> {
    let trimmed = new.display_name.trim();
    if trimmed.is_empty() {
      return Err(Error::validation("display_name", "must not be blank"));
    }
    if trimmed.len() != new.display_name.len() {
      new.display_name = trimmed.to_owned();
    }
    Ok(new)
  }
}

/// Normalises and validates the optional email address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateEmail;

impl WriteHook for ValidateEmail {
  fn name(&self) -> &'static str { "validate_email" }

  fn before_write(
    &self,
    _ctx: &WriteContext,
    _old: Option<&Entity>,
    mut new: Entity,
  ) -> Result<Entity> {
    if let Some(raw) = new.email.take() {
      let address = raw.trim().to_lowercase();
      if !is_plausible_email(&address) {
        return Err(Error::validation(
          "email",
          format!("{raw:?} is not a valid email address"),
        ));
      }
      new.email = Some(address);
    }
    Ok(new)
  }
}

/// `local@domain.tld`: one `@`, no whitespace, a non-empty local part, and a
/// dotted domain without empty labels.
fn is_plausible_email(address: &str) -> bool {
  if address.chars().any(char::is_whitespace) {
    return false;
  }
  let Some((local, domain)) = address.split_once('@') else {
    return false;
  };
  if local.is_empty() || domain.contains('@') || !domain.contains('.') {
    return false;
  }
  domain.split('.').all(|label| {
    !label.is_empty() && !label.starts_with('-') && !label.ends_with('-')
  })
}

// ─── Chain ───────────────────────────────────────────────────────────────────

/// An ordered list of hooks. The first rejection aborts the write.
#[derive(Default)]
pub struct TriggerChain {
  hooks: Vec<Box<dyn WriteHook>>,
}

impl TriggerChain {
  pub fn new() -> Self { Self::default() }

  /// Timestamps, name normalisation and email validation, in that order.
  pub fn standard() -> Self {
    Self::new()
      .with(TouchTimestamps)
      .with(NormalizeDisplayName)
      .with(ValidateEmail)
  }

  pub fn with(mut self, hook: impl WriteHook + 'static) -> Self {
    self.hooks.push(Box::new(hook));
    self
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.hooks.iter().map(|h| h.name()).collect()
  }

  pub fn run(
    &self,
    ctx: &WriteContext,
    old: Option<&Entity>,
    new: Entity,
  ) -> Result<Entity> {
    let entity_id = new.entity_id;
    self.hooks.iter().try_fold(new, |row, hook| {
      hook.before_write(ctx, old, row).inspect_err(|e| {
        tracing::warn!(hook = hook.name(), %entity_id, error = %e, "write rejected");
      })
    })
  }
}

impl std::fmt::Debug for TriggerChain {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list().entries(self.names()).finish()
  }
}
