//! The aggregation engine: works out what is new for one subscriber and
//! groups it into a [`DigestTree`].
//!
//! The engine never writes to storage. It reads a snapshot through the
//! collaborator traits and returns the tree together with the subscriptions
//! it considered and the ones found to be stale; committing those is the
//! scheduler's job.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
  Error, Result,
  event::{Event, group_edits},
  ordered::OrderedMap,
  store::{EventSource, SubscriptionStore},
  subscription::{
    ContainerId, EnabledContainers, PageId, PageRef, ResolvedSubscriptionRow,
    SubscriptionId, SubscriptionKind, TargetKind, User,
  },
  tree::{ContainerDigest, DigestTree},
};

// ─── Subscription index ──────────────────────────────────────────────────────

/// The subscription an event on a given page is delivered through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPage {
  pub subscription_id: SubscriptionId,
  /// `None` when the subscribed page no longer exists.
  pub page:            Option<PageRef>,
}

/// Subscribed pages per subscription kind, in resolution order.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionIndex {
  comments: OrderedMap<PageId, IndexedPage>,
  edits:    OrderedMap<PageId, IndexedPage>,
}

impl SubscriptionIndex {
  pub fn bucket(&self, kind: SubscriptionKind) -> &OrderedMap<PageId, IndexedPage> {
    match kind {
      SubscriptionKind::Comment => &self.comments,
      SubscriptionKind::Edit => &self.edits,
    }
  }

  fn bucket_mut(&mut self, kind: SubscriptionKind) -> &mut OrderedMap<PageId, IndexedPage> {
    match kind {
      SubscriptionKind::Comment => &mut self.comments,
      SubscriptionKind::Edit => &mut self.edits,
    }
  }

  /// Later rows for the same page replace earlier ones.
  pub fn insert(&mut self, kind: SubscriptionKind, page_id: PageId, entry: IndexedPage) {
    self.bucket_mut(kind).insert(page_id, entry);
  }

  pub fn lookup(&self, kind: SubscriptionKind, page_id: PageId) -> Option<&IndexedPage> {
    self.bucket(kind).get(&page_id)
  }

  pub fn page_ids(&self, kind: SubscriptionKind) -> Vec<PageId> {
    self.bucket(kind).keys().copied().collect()
  }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Everything the engine derives from a subscriber's resolved subscriptions.
#[derive(Debug, Clone)]
pub struct SubscriberContext {
  /// Oldest watermark across all rows; the single lower bound for queries.
  pub watermark: DateTime<Utc>,
  pub index:     SubscriptionIndex,
  /// Page ids of page-level subscriptions whose page no longer exists.
  pub stale:     BTreeSet<PageId>,
  /// Every subscription considered, with the container it resolved into.
  pub touched:   BTreeMap<SubscriptionId, Option<ContainerId>>,
}

/// Build a [`SubscriberContext`] from resolved rows. Returns `None` when
/// there are no rows, in which case nothing should be sent.
pub fn index_rows(rows: &[ResolvedSubscriptionRow]) -> Option<SubscriberContext> {
  let watermark = rows.iter().map(|r| r.subscription.watermark).min()?;

  let mut index = SubscriptionIndex::default();
  let mut touched: BTreeMap<SubscriptionId, Option<ContainerId>> = BTreeMap::new();

  for row in rows {
    let sub = &row.subscription;
    match &row.page {
      Some(page) => index.insert(sub.kind, page.page_id, IndexedPage {
        subscription_id: sub.subscription_id,
        page:            Some(page.clone()),
      }),
      // Events may still reference the raw id of a deleted page.
      None if sub.target_kind == TargetKind::Page => {
        index.insert(sub.kind, sub.target_id, IndexedPage {
          subscription_id: sub.subscription_id,
          page:            None,
        })
      }
      None => {}
    }

    let slot = touched.entry(sub.subscription_id).or_insert(None);
    if slot.is_none() {
      *slot = row.page.as_ref().map(|p| p.container_id);
    }
  }

  Some(SubscriberContext { watermark, index, stale: classify_stale(rows), touched })
}

/// Page ids of direct page subscriptions that did not resolve to a live
/// page. Container subscriptions are never reported.
pub fn classify_stale(rows: &[ResolvedSubscriptionRow]) -> BTreeSet<PageId> {
  rows
    .iter()
    .filter(|r| r.page.is_none() && r.subscription.target_kind == TargetKind::Page)
    .map(|r| r.subscription.target_id)
    .collect()
}

// ─── Grouping ────────────────────────────────────────────────────────────────

/// Group events into a tree in arrival order. Events without a live indexed
/// page are dropped.
pub fn build_digest_tree(
  events: impl IntoIterator<Item = Event>,
  index: &SubscriptionIndex,
) -> DigestTree {
  let mut tree = DigestTree::new();

  for event in events {
    let Some(page) = index
      .lookup(event.kind(), event.page_id())
      .and_then(|entry| entry.page.as_ref())
    else {
      continue;
    };

    let container = tree.get_or_insert_with(page.container_id, || ContainerDigest {
      container_id: page.container_id,
      name:         page.container_name.clone(),
      pages:        OrderedMap::new(),
    });
    let activity = container.activity_for(page, event.author());

    match event {
      Event::Comment(comment) => activity.push_comment(comment),
      Event::Edit(edit) => activity.push_edit(edit),
    }
  }

  tree
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Result of aggregating one subscriber.
#[derive(Debug, Clone)]
pub struct Aggregation {
  pub tree:      DigestTree,
  pub watermark: DateTime<Utc>,
  pub stale:     BTreeSet<PageId>,
  pub touched:   BTreeMap<SubscriptionId, Option<ContainerId>>,
}

/// Reads subscriptions and events for one subscriber at a time.
pub struct AggregationEngine<'a, S, E> {
  store:  &'a S,
  events: &'a E,
}

impl<'a, S, E> AggregationEngine<'a, S, E>
where
  S: SubscriptionStore,
  E: EventSource,
{
  pub fn new(store: &'a S, events: &'a E) -> Self { Self { store, events } }

  /// Resolve the subscriber's subscriptions into a watermark, an index of
  /// subscribed pages and the set of stale page subscriptions.
  pub async fn resolve_subscriber_context(
    &self,
    user: &User,
    enabled: &EnabledContainers,
  ) -> Result<Option<SubscriberContext>> {
    let rows = self
      .store
      .resolve(user.user_id, enabled)
      .await
      .map_err(Error::storage)?;
    debug!(rows = rows.len(), "resolved subscriptions");
    Ok(index_rows(&rows))
  }

  /// Fetch comments, then edits, newer than the context's watermark. A kind
  /// with no subscribed pages is not queried at all.
  pub async fn fetch_new_events(
    &self,
    context: &SubscriberContext,
    enabled: &EnabledContainers,
    user: &User,
  ) -> Result<Vec<Event>> {
    let mut events = Vec::new();

    let comment_pages = context.index.page_ids(SubscriptionKind::Comment);
    if !comment_pages.is_empty() {
      let comments = self
        .events
        .query_comments(
          enabled.context_ids(),
          comment_pages,
          context.watermark,
          user.user_id,
        )
        .await
        .map_err(Error::storage)?;
      events.extend(comments.into_iter().map(Event::Comment));
    }

    let edit_pages = context.index.page_ids(SubscriptionKind::Edit);
    if !edit_pages.is_empty() {
      let versions = self
        .events
        .query_edits(edit_pages, context.watermark, user.user_id)
        .await
        .map_err(Error::storage)?;
      events.extend(group_edits(versions).into_iter().map(Event::Edit));
    }

    events.retain(|e| e.author().user_id != user.user_id);
    debug!(events = events.len(), since = %context.watermark, "fetched new events");
    Ok(events)
  }

  /// Run resolution, fetching and grouping for one subscriber. Returns
  /// `None` if the subscriber has nothing to resolve.
  pub async fn aggregate(
    &self,
    user: &User,
    enabled: &EnabledContainers,
  ) -> Result<Option<Aggregation>> {
    let Some(context) = self.resolve_subscriber_context(user, enabled).await? else {
      return Ok(None);
    };
    let events = self.fetch_new_events(&context, enabled, user).await?;
    let tree = build_digest_tree(events, &context.index);

    Ok(Some(Aggregation {
      tree,
      watermark: context.watermark,
      stale: context.stale,
      touched: context.touched,
    }))
  }
}
