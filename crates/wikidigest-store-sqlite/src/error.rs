//! Error type for `wikidigest-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] wikidigest_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("timestamp out of range: {0}")]
  Timestamp(i64),

  #[error("unknown {column} discriminant: {value}")]
  UnknownDiscriminant { column: &'static str, value: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
