//! Core types, collaborator traits and the digest aggregation engine.
//!
//! This crate is deliberately free of database, rendering and transport
//! dependencies. Storage backends implement [`store::SubscriptionStore`] and
//! [`store::EventSource`]; delivery backends implement
//! [`delivery::Renderer`] and [`delivery::Notifier`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod delivery;
pub mod engine;
pub mod error;
pub mod event;
pub mod ordered;
pub mod scheduler;
pub mod store;
pub mod subscription;
pub mod tree;

pub use error::{Error, Result};

#[cfg(test)]
mod testing;
