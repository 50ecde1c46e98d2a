//! Error types for the digest renderer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("formatting failed: {0}")]
  Fmt(#[from] std::fmt::Error),

  #[error("digest for container {0} has no pages")]
  EmptyDigest(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
