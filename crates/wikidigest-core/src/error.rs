//! Error types for `wikidigest-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A user, container or page vanished while a batch was running.
  #[error("{what} not found: {id}")]
  NotFound { what: &'static str, id: i64 },

  /// A request was rejected before any mutation took place.
  #[error("validation error: {0}")]
  Validation(String),

  #[error("delivery failed: {0}")]
  Delivery(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Storage(Box::new(e))
  }

  pub fn delivery(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Delivery(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
