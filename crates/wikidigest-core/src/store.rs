//! The `SubscriptionStore` and `EventSource` traits.
//!
//! Both are implemented by storage backends (e.g. `wikidigest-store-sqlite`).
//! The engine and scheduler depend on these abstractions, not on any concrete
//! backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  event::{CommentEvent, PageVersion},
  subscription::{
    Container, ContainerId, ContextId, EnabledContainers, NewSubscription, PageId,
    ResolvedSubscriptionRow, Subscription, SubscriptionId, SubscriptionKind, User, UserId,
  },
};

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// Abstraction over the store holding subscriptions, container enablement
/// and the user/container metadata the scheduler needs.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait SubscriptionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Batch reads ───────────────────────────────────────────────────────

  /// Enabled containers that have an execution context, keyed by id.
  fn enabled_containers(
    &self,
  ) -> impl Future<Output = Result<EnabledContainers, Self::Error>> + Send + '_;

  /// Distinct subscriber ids ordered by their oldest watermark, ties broken
  /// by user id. `limit` of `None` means unbounded.
  fn list_subscriber_ids_by_min_watermark(
    &self,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<UserId>, Self::Error>> + Send + '_;

  /// Left-join every subscription of `user_id` against live page and
  /// container metadata.
  ///
  /// Rows resolving to a page outside `enabled` are omitted; rows resolving
  /// to no page at all are always returned.
  fn resolve<'a>(
    &'a self,
    user_id: UserId,
    enabled: &'a EnabledContainers,
  ) -> impl Future<Output = Result<Vec<ResolvedSubscriptionRow>, Self::Error>> + Send + 'a;

  /// Returns `None` if the user does not exist. Deleted users are returned
  /// with `deleted` set.
  fn get_user(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  fn get_container(
    &self,
    container_id: ContainerId,
  ) -> impl Future<Output = Result<Option<Container>, Self::Error>> + Send + '_;

  // ── Batch writes ──────────────────────────────────────────────────────

  /// Move the watermark of every listed subscription forward to `now`.
  /// A watermark never moves backwards. Returns the number of rows changed.
  fn advance_watermarks(
    &self,
    subscription_ids: Vec<SubscriptionId>,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Delete the page-level subscriptions of `user_id` targeting `page_ids`.
  /// Container-level subscriptions are never touched.
  fn delete_page_subscriptions(
    &self,
    user_id: UserId,
    page_ids: Vec<PageId>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Subscription management ───────────────────────────────────────────

  /// Apply a subscribe/unsubscribe request on behalf of `acting_user`.
  ///
  /// Fails without writing anything if any record belongs to another user.
  /// Subscribing to something already subscribed is a no-op.
  fn save_subscriptions(
    &self,
    acting_user: UserId,
    subscribe: Vec<NewSubscription>,
    unsubscribe: Vec<NewSubscription>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The user's subscriptions to a container and to pages inside it.
  fn subscriptions_for_container(
    &self,
    user_id: UserId,
    container_id: ContainerId,
  ) -> impl Future<Output = Result<Vec<Subscription>, Self::Error>> + Send + '_;

  /// Distinct users subscribed to `kind` activity on a container or any of
  /// its pages.
  fn subscribers_of(
    &self,
    container_id: ContainerId,
    kind: SubscriptionKind,
  ) -> impl Future<Output = Result<Vec<UserId>, Self::Error>> + Send + '_;

  // ── Container enablement ──────────────────────────────────────────────

  fn set_container_enabled(
    &self,
    container_id: ContainerId,
    enabled: bool,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Drop the enablement record of a deleted container.
  fn forget_container(
    &self,
    container_id: ContainerId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Source of raw activity. Every query excludes activity by `exclude_user`
/// and only returns activity strictly after `after`.
pub trait EventSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Comments on `page_ids` filed under `context_ids`, ordered by context,
  /// then page.
  fn query_comments(
    &self,
    context_ids: Vec<ContextId>,
    page_ids: Vec<PageId>,
    after: DateTime<Utc>,
    exclude_user: UserId,
  ) -> impl Future<Output = Result<Vec<CommentEvent>, Self::Error>> + Send + '_;

  /// Version history rows of `page_ids`, ordered by page, then timestamp.
  /// Grouping into edit events happens in the engine.
  fn query_edits(
    &self,
    page_ids: Vec<PageId>,
    after: DateTime<Utc>,
    exclude_user: UserId,
  ) -> impl Future<Output = Result<Vec<PageVersion>, Self::Error>> + Send + '_;
}
