//! Rendering and delivery collaborators.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  subscription::{Container, User},
  tree::ContainerDigest,
};

/// A rendered, human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
  pub subject: String,
  pub body:    String,
}

/// Identifier handed back by a [`Notifier`] for a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl std::fmt::Display for DeliveryId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

/// Turns one container's digest into a message.
pub trait Renderer: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn render(
    &self,
    container: &Container,
    digest: &ContainerDigest,
  ) -> Result<Payload, Self::Error>;
}

/// Delivers a rendered message to a user.
pub trait Notifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn send<'a>(
    &'a self,
    recipient: &'a User,
    payload: &'a Payload,
  ) -> impl Future<Output = Result<DeliveryId, Self::Error>> + Send + 'a;
}

/// Per-subscriber environment (locale, session) set up around each
/// subscriber so nothing bleeds from one subscriber into the next.
pub trait ExecutionContext: Send + Sync {
  fn enter(&self, user: &User);

  fn reset(&self);
}

/// An [`ExecutionContext`] with nothing to set up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopContext;

impl ExecutionContext for NoopContext {
  fn enter(&self, _user: &User) {}

  fn reset(&self) {}
}
