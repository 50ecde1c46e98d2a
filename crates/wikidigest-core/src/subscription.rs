//! Subscriptions and the resource metadata they resolve against.
//!
//! A subscription names a target (a single page, or a whole container) and a
//! kind of activity (comments or edits). Each subscription carries its own
//! watermark: the point in time up to which activity has already been sent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub type UserId = i64;
pub type PageId = i64;
pub type ContainerId = i64;
pub type ContextId = i64;
pub type SubscriptionId = i64;

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// Which kind of activity a subscription asks for.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
  Comment,
  Edit,
}

/// What the `target_id` of a subscription refers to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
  /// A single page.
  Page,
  /// A container; covers every page inside it, including pages created later.
  Container,
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A stored subscription. Unique per `(user_id, kind, target_id, target_kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
  pub subscription_id: SubscriptionId,
  pub user_id:         UserId,
  pub kind:            SubscriptionKind,
  pub target_id:       i64,
  pub target_kind:     TargetKind,
  /// Activity at or before this instant has already been delivered.
  pub watermark:       DateTime<Utc>,
}

/// Input for subscribe / unsubscribe requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
  pub user_id:     UserId,
  pub kind:        SubscriptionKind,
  pub target_id:   i64,
  pub target_kind: TargetKind,
}

impl NewSubscription {
  pub fn page(user_id: UserId, kind: SubscriptionKind, page_id: PageId) -> Self {
    Self { user_id, kind, target_id: page_id, target_kind: TargetKind::Page }
  }

  pub fn container(
    user_id: UserId,
    kind: SubscriptionKind,
    container_id: ContainerId,
  ) -> Self {
    Self {
      user_id,
      kind,
      target_id: container_id,
      target_kind: TargetKind::Container,
    }
  }
}

/// Reject the whole request if any record belongs to someone other than
/// `acting_user`. Nothing may be written when this fails.
pub fn ensure_owned_by(
  acting_user: UserId,
  subscriptions: &[NewSubscription],
) -> Result<()> {
  match subscriptions.iter().find(|s| s.user_id != acting_user) {
    Some(s) => Err(Error::Validation(format!(
      "subscription for user {} submitted by user {acting_user}",
      s.user_id
    ))),
    None => Ok(()),
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub user_id:   UserId,
  pub full_name: String,
  pub deleted:   bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
  pub container_id: ContainerId,
  pub name:         String,
  /// Execution context the container's comments are filed under. Containers
  /// without one cannot be digested.
  pub context_id:   Option<ContextId>,
}

/// A live page together with the container it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
  pub page_id:        PageId,
  pub title:          String,
  pub container_id:   ContainerId,
  pub container_name: String,
}

/// One subscription left-joined against live page metadata.
///
/// A container subscription produces one row per page in the container. A
/// row whose `page` is `None` did not resolve to any live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubscriptionRow {
  pub subscription: Subscription,
  pub page:         Option<PageRef>,
}

// ─── Enabled containers ──────────────────────────────────────────────────────

/// Containers eligible for digesting in a batch, mapped to their execution
/// context. Computed once at batch start and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledContainers(BTreeMap<ContainerId, ContextId>);

impl EnabledContainers {
  pub fn new() -> Self { Self::default() }

  pub fn insert(&mut self, container_id: ContainerId, context_id: ContextId) {
    self.0.insert(container_id, context_id);
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn contains(&self, container_id: ContainerId) -> bool {
    self.0.contains_key(&container_id)
  }

  pub fn container_ids(&self) -> Vec<ContainerId> { self.0.keys().copied().collect() }

  pub fn context_ids(&self) -> Vec<ContextId> { self.0.values().copied().collect() }
}

impl FromIterator<(ContainerId, ContextId)> for EnabledContainers {
  fn from_iter<I: IntoIterator<Item = (ContainerId, ContextId)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}
