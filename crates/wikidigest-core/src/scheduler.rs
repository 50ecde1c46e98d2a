//! The digest scheduler: one batch run over every subscriber.
//!
//! Subscribers are processed strictly one after another, oldest watermark
//! first. A failure while processing one subscriber is logged and counted but
//! never stops the batch.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{Instrument as _, debug, error, info, info_span, warn};

use crate::{
  Error, Result,
  delivery::{DeliveryId, ExecutionContext, NoopContext, Notifier, Renderer},
  engine::{Aggregation, AggregationEngine},
  store::{EventSource, SubscriptionStore},
  subscription::{Container, ContainerId, EnabledContainers, User, UserId},
  tree::ContainerDigest,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// What happens to watermarks when a digest could not be delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFailurePolicy {
  /// Subscriptions feeding a failed digest keep their watermark and are
  /// retried next run.
  #[default]
  HoldWatermark,
  /// Every considered subscription advances regardless of delivery.
  Advance,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
  /// Maximum number of subscribers per run; `None` is unbounded.
  pub users_per_run:       Option<usize>,
  pub on_delivery_failure: DeliveryFailurePolicy,
}

// ─── Reporting ───────────────────────────────────────────────────────────────

/// Counters for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
  /// Subscribers fully processed.
  pub processed:         usize,
  /// Subscribers skipped because the user is gone.
  pub skipped:           usize,
  /// Subscribers (or the subscriber listing) that hit a storage error.
  pub failed:            usize,
  pub messages_sent:     usize,
  pub delivery_failures: usize,
}

impl BatchReport {
  pub fn is_success(&self) -> bool { self.failed == 0 && self.delivery_failures == 0 }
}

enum SubscriberOutcome {
  Skipped,
  Processed { sent: usize, failed: usize },
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Per-batch context: the collaborators and settings shared by every
/// subscriber in one run.
pub struct DigestScheduler<'a, S, E, R, N, C = NoopContext> {
  store:    &'a S,
  events:   &'a E,
  renderer: &'a R,
  notifier: &'a N,
  context:  C,
  config:   SchedulerConfig,
}

impl<'a, S, E, R, N> DigestScheduler<'a, S, E, R, N> {
  pub fn new(store: &'a S, events: &'a E, renderer: &'a R, notifier: &'a N) -> Self {
    Self {
      store,
      events,
      renderer,
      notifier,
      context: NoopContext,
      config: SchedulerConfig::default(),
    }
  }
}

impl<'a, S, E, R, N, C> DigestScheduler<'a, S, E, R, N, C> {
  pub fn with_config(mut self, config: SchedulerConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_context<C2>(self, context: C2) -> DigestScheduler<'a, S, E, R, N, C2> {
    DigestScheduler {
      store: self.store,
      events: self.events,
      renderer: self.renderer,
      notifier: self.notifier,
      context,
      config: self.config,
    }
  }
}

impl<S, E, R, N, C> DigestScheduler<'_, S, E, R, N, C>
where
  S: SubscriptionStore,
  E: EventSource,
  R: Renderer,
  N: Notifier,
  C: ExecutionContext,
{
  /// Run one batch. Returns `true` if every subscriber was processed and
  /// every digest delivered.
  pub async fn run(&self, enabled: &EnabledContainers) -> bool {
    self.run_with_report(enabled).await.is_success()
  }

  pub async fn run_with_report(&self, enabled: &EnabledContainers) -> BatchReport {
    let mut report = BatchReport::default();

    if enabled.is_empty() {
      debug!("no containers enabled for digests");
      return report;
    }

    let user_ids = match self
      .store
      .list_subscriber_ids_by_min_watermark(self.config.users_per_run)
      .await
    {
      Ok(ids) => ids,
      Err(e) => {
        error!(error = %e, "failed to list subscribers");
        report.failed += 1;
        return report;
      }
    };

    for user_id in user_ids {
      match self.process_subscriber(user_id, enabled).await {
        Ok(SubscriberOutcome::Skipped) => report.skipped += 1,
        Ok(SubscriberOutcome::Processed { sent, failed }) => {
          report.processed += 1;
          report.messages_sent += sent;
          report.delivery_failures += failed;
        }
        Err(e) => {
          error!(user_id, error = %e, "digest failed for subscriber");
          report.failed += 1;
        }
      }
    }

    info!(
      processed = report.processed,
      skipped = report.skipped,
      failed = report.failed,
      sent = report.messages_sent,
      "digest run finished"
    );
    report
  }

  async fn process_subscriber(
    &self,
    user_id: UserId,
    enabled: &EnabledContainers,
  ) -> Result<SubscriberOutcome> {
    let user = match self.store.get_user(user_id).await.map_err(Error::storage)? {
      Some(user) if !user.deleted => user,
      _ => {
        debug!(user_id, "skipping missing or deleted user");
        return Ok(SubscriberOutcome::Skipped);
      }
    };

    self.context.enter(&user);
    let outcome = self
      .deliver_digest(&user, enabled)
      .instrument(info_span!("subscriber", user_id))
      .await;
    self.context.reset();
    outcome
  }

  async fn deliver_digest(
    &self,
    user: &User,
    enabled: &EnabledContainers,
  ) -> Result<SubscriberOutcome> {
    let engine = AggregationEngine::new(self.store, self.events);
    let Some(aggregation) = engine.aggregate(user, enabled).await? else {
      debug!("no subscriptions in enabled containers");
      return Ok(SubscriberOutcome::Processed { sent: 0, failed: 0 });
    };

    let mut sent = 0;
    let mut failed_containers = BTreeSet::new();

    for (&container_id, digest) in aggregation.tree.iter() {
      let Some(container) = self
        .store
        .get_container(container_id)
        .await
        .map_err(Error::storage)?
      else {
        warn!(container_id, "container vanished; digest dropped");
        continue;
      };

      match self.send_digest(user, &container, digest).await {
        Ok(delivery_id) => {
          info!(
            container_id,
            %delivery_id,
            events = digest.event_count(),
            "digest sent"
          );
          sent += 1;
        }
        Err(e) => {
          warn!(container_id, error = %e, "digest delivery failed");
          failed_containers.insert(container_id);
        }
      }
    }

    self.commit(user, &aggregation, &failed_containers).await?;

    Ok(SubscriberOutcome::Processed { sent, failed: failed_containers.len() })
  }

  async fn send_digest(
    &self,
    user: &User,
    container: &Container,
    digest: &ContainerDigest,
  ) -> Result<DeliveryId> {
    let payload = self
      .renderer
      .render(container, digest)
      .map_err(Error::delivery)?;
    self
      .notifier
      .send(user, &payload)
      .await
      .map_err(Error::delivery)
  }

  /// Prune stale page subscriptions, then advance watermarks of the
  /// considered subscriptions, whether or not anything was sent.
  async fn commit(
    &self,
    user: &User,
    aggregation: &Aggregation,
    failed_containers: &BTreeSet<ContainerId>,
  ) -> Result<()> {
    if !aggregation.stale.is_empty() {
      let removed = self
        .store
        .delete_page_subscriptions(user.user_id, aggregation.stale.iter().copied().collect())
        .await
        .map_err(Error::storage)?;
      info!(removed, "pruned subscriptions to deleted pages");
    }

    let hold = self.config.on_delivery_failure == DeliveryFailurePolicy::HoldWatermark;
    let advance: Vec<_> = aggregation
      .touched
      .iter()
      .filter(|(_, container)| {
        !hold || container.is_none_or(|c| !failed_containers.contains(&c))
      })
      .map(|(&id, _)| id)
      .collect();

    if !advance.is_empty() {
      let advanced = self
        .store
        .advance_watermarks(advance, Utc::now())
        .await
        .map_err(Error::storage)?;
      debug!(advanced, "advanced watermarks");
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    subscription::{SubscriptionKind, TargetKind},
    testing::{MemoryStore, RecordingContext, RecordingNotifier, StubRenderer, at},
  };

  /// A container with two pages, users 1..=3 and an active wiki.
  fn fixture() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_user(1, "Ada");
    store.add_user(2, "Brook");
    store.add_user(3, "Cyd");
    store.add_user(9, "Author");
    store.add_container(100, "Handbook", Some(1000), true);
    store.add_page(1, 100, "Intro");
    store.add_page(2, 100, "Setup");
    store
  }

  #[tokio::test]
  async fn empty_batch_short_circuits() {
    let store = fixture();
    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    assert!(scheduler.run(&EnabledContainers::new()).await);
    assert_eq!(store.list_calls(), 0);
  }

  #[tokio::test]
  async fn subscribers_processed_oldest_watermark_first() {
    let store = fixture();
    store.subscribe(1, SubscriptionKind::Comment, 1, TargetKind::Page, 30);
    store.subscribe(2, SubscriptionKind::Comment, 1, TargetKind::Page, 10);
    store.subscribe(3, SubscriptionKind::Comment, 1, TargetKind::Page, 20);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let context = RecordingContext::default();
    let scheduler =
      DigestScheduler::new(&store, &store, &renderer, &notifier).with_context(&context);

    let enabled = store.enabled_containers().await.unwrap();
    assert!(scheduler.run(&enabled).await);
    assert_eq!(context.entered(), vec![2, 3, 1]);
  }

  #[tokio::test]
  async fn equal_watermarks_fall_back_to_user_id() {
    let store = fixture();
    store.subscribe(3, SubscriptionKind::Edit, 1, TargetKind::Page, 10);
    store.subscribe(1, SubscriptionKind::Edit, 1, TargetKind::Page, 10);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let context = RecordingContext::default();
    let scheduler =
      DigestScheduler::new(&store, &store, &renderer, &notifier).with_context(&context);

    let enabled = store.enabled_containers().await.unwrap();
    scheduler.run(&enabled).await;
    assert_eq!(context.entered(), vec![1, 3]);
  }

  #[tokio::test]
  async fn failing_subscriber_does_not_stop_the_batch() {
    let store = fixture();
    for user in 1..=3 {
      store.subscribe(user, SubscriptionKind::Comment, 1, TargetKind::Page, user * 10);
    }
    store.comment(1000, 1, 9, 100);
    store.break_user(2);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let context = RecordingContext::default();
    let scheduler =
      DigestScheduler::new(&store, &store, &renderer, &notifier).with_context(&context);

    let enabled = store.enabled_containers().await.unwrap();
    let report = scheduler.run_with_report(&enabled).await;

    assert!(!report.is_success());
    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 2);
    let recipients: Vec<_> = notifier.sent().into_iter().map(|(u, _)| u).collect();
    assert_eq!(recipients, vec![1, 3]);
    // The context is reset after the failing subscriber too.
    assert_eq!(context.resets(), 3);
  }

  #[tokio::test]
  async fn one_message_per_container() {
    let store = fixture();
    store.add_container(200, "Recipes", Some(2000), true);
    store.add_page(3, 200, "Bread");
    store.subscribe(1, SubscriptionKind::Comment, 100, TargetKind::Container, 0);
    store.subscribe(1, SubscriptionKind::Comment, 200, TargetKind::Container, 0);
    store.comment(2000, 3, 9, 5);
    store.comment(1000, 1, 9, 6);
    store.comment(1000, 2, 9, 7);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    let enabled = store.enabled_containers().await.unwrap();
    assert!(scheduler.run(&enabled).await);

    let subjects: Vec<_> = notifier.sent().into_iter().map(|(_, p)| p.subject).collect();
    assert_eq!(subjects, vec!["Handbook", "Recipes"]);
  }

  #[tokio::test]
  async fn own_activity_is_never_sent() {
    let store = fixture();
    store.subscribe(1, SubscriptionKind::Comment, 1, TargetKind::Page, 0);
    store.comment(1000, 1, 1, 5);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    let enabled = store.enabled_containers().await.unwrap();
    assert!(scheduler.run(&enabled).await);
    assert!(notifier.sent().is_empty());
  }

  #[tokio::test]
  async fn watermarks_advance_even_without_new_events() {
    let store = fixture();
    let sub = store.subscribe(1, SubscriptionKind::Edit, 100, TargetKind::Container, 50);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    let enabled = store.enabled_containers().await.unwrap();
    assert!(scheduler.run(&enabled).await);

    assert!(notifier.sent().is_empty());
    assert!(store.watermark_of(sub).unwrap() > at(50));
  }

  #[tokio::test]
  async fn stale_pruning_is_page_scoped() {
    let store = fixture();
    store.add_container(300, "Empty", Some(3000), true);
    let page_sub = store.subscribe(1, SubscriptionKind::Comment, 2, TargetKind::Page, 0);
    let empty_sub = store.subscribe(1, SubscriptionKind::Edit, 300, TargetKind::Container, 0);
    store.delete_page(2);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    let enabled = store.enabled_containers().await.unwrap();
    assert!(scheduler.run(&enabled).await);

    assert!(store.watermark_of(page_sub).is_none());
    assert!(store.watermark_of(empty_sub).is_some());
  }

  #[tokio::test]
  async fn failed_delivery_holds_watermark_by_default() {
    let store = fixture();
    let sub = store.subscribe(1, SubscriptionKind::Comment, 1, TargetKind::Page, 0);
    store.comment(1000, 1, 9, 5);

    let renderer = StubRenderer { failing: [100].into() };
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    let enabled = store.enabled_containers().await.unwrap();
    let report = scheduler.run_with_report(&enabled).await;

    assert!(!report.is_success());
    assert_eq!(report.delivery_failures, 1);
    assert_eq!(store.watermark_of(sub), Some(at(0)));
  }

  #[tokio::test]
  async fn failed_delivery_advances_under_advance_policy() {
    let store = fixture();
    let sub = store.subscribe(1, SubscriptionKind::Comment, 1, TargetKind::Page, 0);
    store.comment(1000, 1, 9, 5);

    let renderer = StubRenderer { failing: [100].into() };
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier)
      .with_config(SchedulerConfig {
        users_per_run:       None,
        on_delivery_failure: DeliveryFailurePolicy::Advance,
      });

    let enabled = store.enabled_containers().await.unwrap();
    assert!(!scheduler.run(&enabled).await);
    assert!(store.watermark_of(sub).unwrap() > at(0));
  }

  #[tokio::test]
  async fn missing_and_deleted_users_are_skipped() {
    let store = fixture();
    store.subscribe(2, SubscriptionKind::Comment, 1, TargetKind::Page, 0);
    store.subscribe(77, SubscriptionKind::Comment, 1, TargetKind::Page, 0);
    store.delete_user(2);
    store.comment(1000, 1, 9, 5);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    let enabled = store.enabled_containers().await.unwrap();
    let report = scheduler.run_with_report(&enabled).await;

    assert!(report.is_success());
    assert_eq!(report.skipped, 2);
    assert!(notifier.sent().is_empty());
  }

  #[tokio::test]
  async fn vanished_container_is_skipped_but_watermark_advances() {
    let store = fixture();
    let sub = store.subscribe(1, SubscriptionKind::Comment, 1, TargetKind::Page, 0);
    store.comment(1000, 1, 9, 5);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier);

    let enabled = store.enabled_containers().await.unwrap();
    store.drop_container_record(100);
    assert!(scheduler.run(&enabled).await);

    assert!(notifier.sent().is_empty());
    assert!(store.watermark_of(sub).unwrap() > at(0));
  }

  #[tokio::test]
  async fn users_per_run_limits_the_batch() {
    let store = fixture();
    store.subscribe(1, SubscriptionKind::Comment, 1, TargetKind::Page, 30);
    store.subscribe(2, SubscriptionKind::Comment, 1, TargetKind::Page, 10);

    let renderer = StubRenderer::default();
    let notifier = RecordingNotifier::default();
    let context = RecordingContext::default();
    let scheduler = DigestScheduler::new(&store, &store, &renderer, &notifier)
      .with_config(SchedulerConfig { users_per_run: Some(1), ..Default::default() })
      .with_context(&context);

    let enabled = store.enabled_containers().await.unwrap();
    scheduler.run(&enabled).await;
    assert_eq!(context.entered(), vec![2]);
  }
}
