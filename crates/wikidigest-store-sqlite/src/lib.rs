//! SQLite backend for the wiki digest engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. One [`SqliteStore`] serves as both the
//! subscription store and the event source; [`OutboxNotifier`] delivers
//! digests into an in-app outbox table in the same database.

mod encode;
mod events;
mod outbox;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use outbox::{OutboxMessage, OutboxNotifier};
pub use store::SqliteStore;
