//! Host application for Tally: configuration, engine bootstrap, and the HTTP
//! router that the `tally-server` binary serves.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::Router;
use serde::Deserialize;
use tally_core::{
  Materializer,
  index::IndexDescriptor,
  store::ScoreStore,
  trigger::{NormalizeDisplayName, TouchTimestamps, TriggerChain, ValidateEmail},
};
use tally_store_sqlite::SqliteStore;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `tally.toml` layered with
/// `TALLY_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:           String,
  #[serde(default = "default_port")]
  pub port:           u16,
  /// SQLite file; `:memory:` keeps everything in process.
  #[serde(default = "default_store_path")]
  pub store_path:     PathBuf,
  /// Install the email-validation write hook.
  #[serde(default = "default_true")]
  pub validate_email: bool,
  /// Indexes built at startup.
  #[serde(default)]
  pub indexes:        Vec<IndexDescriptor>,
}

fn default_host() -> String { "127.0.0.1".to_owned() }

fn default_port() -> u16 { 7878 }

fn default_store_path() -> PathBuf { PathBuf::from("tally.db") }

fn default_true() -> bool { true }

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:           default_host(),
      port:           default_port(),
      store_path:     default_store_path(),
      validate_email: true,
      indexes:        Vec::new(),
    }
  }
}

impl ServerConfig {
  /// Load from an optional TOML file, then override from the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("TALLY"))
      .build()?
      .try_deserialize()
  }

  /// The write hooks this configuration enables, in execution order.
  pub fn triggers(&self) -> TriggerChain {
    let chain = TriggerChain::new()
      .with(TouchTimestamps)
      .with(NormalizeDisplayName);
    if self.validate_email { chain.with(ValidateEmail) } else { chain }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

// ─── Bootstrap ───────────────────────────────────────────────────────────────

/// Open the configured SQLite store. A leading `~` in the path is expanded.
pub async fn open_store(path: &Path) -> tally_store_sqlite::Result<SqliteStore> {
  if path == Path::new(":memory:") {
    return SqliteStore::open_in_memory().await;
  }
  SqliteStore::open(expand_tilde(path)).await
}

/// Build the engine over `store` and create every configured index.
pub async fn bootstrap<S: ScoreStore>(
  store: S,
  config: &ServerConfig,
) -> tally_core::Result<Arc<Materializer<S>>> {
  let engine = Materializer::with_triggers(store, config.triggers());
  for descriptor in &config.indexes {
    engine.create_index(descriptor.clone()).await?;
  }
  tracing::info!(
    hooks = ?engine.triggers().names(),
    indexes = config.indexes.len(),
    "engine ready"
  );
  Ok(Arc::new(engine))
}

/// The full application router: the JSON API under `/api`, with request
/// tracing.
pub fn router<S: ScoreStore + 'static>(engine: Arc<Materializer<S>>) -> Router {
  Router::new()
    .nest("/api", tally_api::api_router(engine))
    .layer(TraceLayer::new_for_http())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
