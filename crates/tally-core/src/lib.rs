//! Core types and the materialisation engine for Tally.
//!
//! Tally keeps a weighted-average summary per entity consistent with that
//! entity's score records, validates entity writes through explicit hooks,
//! and maintains ordered lookup indexes over entity attributes.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement [`store::ScoreStore`]; [`memory::MemoryStore`]
//! is the in-process reference backend.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod engine;
pub mod entity;
pub mod error;
pub mod index;
pub mod memory;
pub mod record;
pub mod store;
pub mod summary;
pub mod trigger;

pub use engine::Materializer;
pub use error::{Error, Result};
