//! Markdown rendering of wiki digests.
//!
//! Turns one container's [`ContainerDigest`](wikidigest_core::tree::ContainerDigest)
//! into a [`Payload`](wikidigest_core::delivery::Payload). Pure synchronous;
//! no database or transport dependencies.

pub mod error;
mod markdown;

pub use error::{Error, Result};
pub use markdown::{DEFAULT_SUBJECT, MarkdownRenderer};
