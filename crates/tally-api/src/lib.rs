//! JSON REST API for Tally.
//!
//! Exposes an axum [`Router`] backed by a [`Materializer`] over any
//! [`ScoreStore`]. Auth, TLS, and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tally_api::api_router(engine.clone()))
//! ```

pub mod entities;
pub mod error;
pub mod indexes;
pub mod records;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, post, put},
};
use tally_core::{Materializer, store::ScoreStore};

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(engine: Arc<Materializer<S>>) -> Router<()>
where
  S: ScoreStore + 'static,
{
  Router::new()
    // Entities
    .route("/entities", get(entities::list::<S>).post(entities::create::<S>))
    .route(
      "/entities/{id}",
      get(entities::get_one::<S>)
        .patch(entities::update::<S>)
        .delete(entities::remove::<S>),
    )
    // Records and summaries
    .route("/entities/{id}/records", get(records::list::<S>))
    .route(
      "/entities/{id}/records/{record_id}",
      put(records::upsert::<S>).delete(records::remove::<S>),
    )
    .route("/entities/{id}/summary", get(records::summary::<S>))
    // Indexes
    .route("/indexes", get(indexes::list::<S>).post(indexes::create::<S>))
    .route("/indexes/{name}", delete(indexes::drop_one::<S>))
    .route("/indexes/{name}/lookup", post(indexes::lookup::<S>))
    .with_state(engine)
}

#[cfg(test)]
mod tests;
