//! In-memory collaborators for engine and scheduler tests.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{DateTime, TimeZone as _, Utc};
use uuid::Uuid;

use crate::{
  delivery::{DeliveryId, ExecutionContext, Notifier, Payload, Renderer},
  event::{Author, CommentEvent, PageVersion},
  store::{EventSource, SubscriptionStore},
  subscription::{
    Container, ContainerId, ContextId, EnabledContainers, NewSubscription, PageId,
    PageRef, ResolvedSubscriptionRow, Subscription, SubscriptionId, SubscriptionKind,
    TargetKind, User, UserId, ensure_owned_by,
  },
  tree::ContainerDigest,
};

pub fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

#[derive(Debug, thiserror::Error)]
#[error("memory store: {0}")]
pub struct MemoryError(pub String);

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
  users:         BTreeMap<UserId, User>,
  containers:    BTreeMap<ContainerId, (Container, bool)>,
  pages:         BTreeMap<PageId, (ContainerId, String)>,
  subscriptions: Vec<Subscription>,
  comments:      Vec<(ContextId, CommentEvent)>,
  versions:      Vec<PageVersion>,
  broken_users:  BTreeSet<UserId>,
  next_id:       i64,
}

#[derive(Default)]
pub struct MemoryStore {
  state:          Mutex<State>,
  list_calls:     AtomicUsize,
  comment_calls:  AtomicUsize,
  edit_calls:     AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
    f(&mut self.state.lock().unwrap())
  }

  pub fn add_user(&self, user_id: UserId, name: &str) -> User {
    let user = User { user_id, full_name: name.into(), deleted: false };
    self.with(|s| s.users.insert(user_id, user.clone()));
    user
  }

  pub fn delete_user(&self, user_id: UserId) {
    self.with(|s| {
      if let Some(u) = s.users.get_mut(&user_id) {
        u.deleted = true;
      }
    });
  }

  pub fn add_container(
    &self,
    container_id: ContainerId,
    name: &str,
    context_id: Option<ContextId>,
    enabled: bool,
  ) {
    let container = Container { container_id, name: name.into(), context_id };
    self.with(|s| s.containers.insert(container_id, (container, enabled)));
  }

  pub fn drop_container_record(&self, container_id: ContainerId) {
    self.with(|s| s.containers.remove(&container_id));
  }

  pub fn add_page(&self, page_id: PageId, container_id: ContainerId, title: &str) {
    self.with(|s| s.pages.insert(page_id, (container_id, title.into())));
  }

  pub fn delete_page(&self, page_id: PageId) {
    self.with(|s| s.pages.remove(&page_id));
  }

  pub fn subscribe(
    &self,
    user_id: UserId,
    kind: SubscriptionKind,
    target_id: i64,
    target_kind: TargetKind,
    watermark: i64,
  ) -> SubscriptionId {
    self.with(|s| {
      s.next_id += 1;
      let subscription_id = s.next_id;
      s.subscriptions.push(Subscription {
        subscription_id,
        user_id,
        kind,
        target_id,
        target_kind,
        watermark: at(watermark),
      });
      subscription_id
    })
  }

  pub fn comment(&self, context_id: ContextId, page_id: PageId, author: UserId, secs: i64) {
    self.with(|s| {
      s.next_id += 1;
      let comment = CommentEvent {
        comment_id: s.next_id,
        page_id,
        author: author_of(s, author),
        body: format!("comment {}", s.next_id),
        created_at: at(secs),
      };
      s.comments.push((context_id, comment));
    });
  }

  pub fn version(&self, page_id: PageId, version: u32, author: UserId, secs: i64) {
    self.with(|s| {
      let author = author_of(s, author);
      s.versions.push(PageVersion { page_id, version, author, created_at: at(secs) });
    });
  }

  /// Make every resolve for `user_id` fail.
  pub fn break_user(&self, user_id: UserId) {
    self.with(|s| s.broken_users.insert(user_id));
  }

  pub fn watermark_of(&self, subscription_id: SubscriptionId) -> Option<DateTime<Utc>> {
    self.with(|s| {
      s.subscriptions
        .iter()
        .find(|sub| sub.subscription_id == subscription_id)
        .map(|sub| sub.watermark)
    })
  }

  pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }

  pub fn comment_queries(&self) -> usize { self.comment_calls.load(Ordering::SeqCst) }

  pub fn edit_queries(&self) -> usize { self.edit_calls.load(Ordering::SeqCst) }
}

fn author_of(s: &State, user_id: UserId) -> Author {
  let full_name = s
    .users
    .get(&user_id)
    .map(|u| u.full_name.clone())
    .unwrap_or_default();
  Author { user_id, full_name }
}

fn page_ref(s: &State, page_id: PageId) -> Option<PageRef> {
  let (container_id, title) = s.pages.get(&page_id)?;
  let container_name = s
    .containers
    .get(container_id)
    .map(|(c, _)| c.name.clone())
    .unwrap_or_default();
  Some(PageRef {
    page_id,
    title: title.clone(),
    container_id: *container_id,
    container_name,
  })
}

impl SubscriptionStore for MemoryStore {
  type Error = MemoryError;

  async fn enabled_containers(&self) -> Result<EnabledContainers, MemoryError> {
    Ok(self.with(|s| {
      s.containers
        .values()
        .filter(|(_, enabled)| *enabled)
        .filter_map(|(c, _)| c.context_id.map(|ctx| (c.container_id, ctx)))
        .collect()
    }))
  }

  async fn list_subscriber_ids_by_min_watermark(
    &self,
    limit: Option<usize>,
  ) -> Result<Vec<UserId>, MemoryError> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    Ok(self.with(|s| {
      let mut oldest: BTreeMap<UserId, DateTime<Utc>> = BTreeMap::new();
      for sub in &s.subscriptions {
        let w = oldest.entry(sub.user_id).or_insert(sub.watermark);
        *w = (*w).min(sub.watermark);
      }
      let mut ids: Vec<_> = oldest.into_iter().map(|(u, w)| (w, u)).collect();
      ids.sort();
      ids
        .into_iter()
        .map(|(_, u)| u)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
    }))
  }

  async fn resolve(
    &self,
    user_id: UserId,
    enabled: &EnabledContainers,
  ) -> Result<Vec<ResolvedSubscriptionRow>, MemoryError> {
    self.with(|s| {
      if s.broken_users.contains(&user_id) {
        return Err(MemoryError(format!("resolve failed for user {user_id}")));
      }

      let mut rows = Vec::new();
      for sub in s.subscriptions.iter().filter(|sub| sub.user_id == user_id) {
        let pages: Vec<PageRef> = match sub.target_kind {
          TargetKind::Page => page_ref(s, sub.target_id).into_iter().collect(),
          TargetKind::Container => s
            .pages
            .iter()
            .filter(|(_, (c, _))| *c == sub.target_id)
            .filter_map(|(id, _)| page_ref(s, *id))
            .collect(),
        };

        if pages.is_empty() {
          rows.push(ResolvedSubscriptionRow { subscription: sub.clone(), page: None });
        }
        for page in pages.into_iter().filter(|p| enabled.contains(p.container_id)) {
          rows.push(ResolvedSubscriptionRow { subscription: sub.clone(), page: Some(page) });
        }
      }

      rows.sort_by_key(|r| {
        (
          r.page.as_ref().map(|p| p.container_id),
          r.page.as_ref().map(|p| p.page_id),
          r.subscription.watermark,
        )
      });
      Ok(rows)
    })
  }

  async fn get_user(&self, user_id: UserId) -> Result<Option<User>, MemoryError> {
    Ok(self.with(|s| s.users.get(&user_id).cloned()))
  }

  async fn get_container(
    &self,
    container_id: ContainerId,
  ) -> Result<Option<Container>, MemoryError> {
    Ok(self.with(|s| s.containers.get(&container_id).map(|(c, _)| c.clone())))
  }

  async fn advance_watermarks(
    &self,
    subscription_ids: Vec<SubscriptionId>,
    now: DateTime<Utc>,
  ) -> Result<usize, MemoryError> {
    Ok(self.with(|s| {
      let mut changed = 0;
      for sub in s
        .subscriptions
        .iter_mut()
        .filter(|sub| subscription_ids.contains(&sub.subscription_id))
      {
        sub.watermark = sub.watermark.max(now);
        changed += 1;
      }
      changed
    }))
  }

  async fn delete_page_subscriptions(
    &self,
    user_id: UserId,
    page_ids: Vec<PageId>,
  ) -> Result<usize, MemoryError> {
    Ok(self.with(|s| {
      let before = s.subscriptions.len();
      s.subscriptions.retain(|sub| {
        !(sub.user_id == user_id
          && sub.target_kind == TargetKind::Page
          && page_ids.contains(&sub.target_id))
      });
      before - s.subscriptions.len()
    }))
  }

  async fn save_subscriptions(
    &self,
    acting_user: UserId,
    subscribe: Vec<NewSubscription>,
    unsubscribe: Vec<NewSubscription>,
  ) -> Result<(), MemoryError> {
    ensure_owned_by(acting_user, &subscribe)
      .and_then(|_| ensure_owned_by(acting_user, &unsubscribe))
      .map_err(|e| MemoryError(e.to_string()))?;

    for new in subscribe {
      let exists = self.with(|s| {
        s.subscriptions.iter().any(|sub| {
          sub.user_id == new.user_id
            && sub.kind == new.kind
            && sub.target_id == new.target_id
            && sub.target_kind == new.target_kind
        })
      });
      if !exists {
        self.subscribe(new.user_id, new.kind, new.target_id, new.target_kind, 0);
      }
    }
    self.with(|s| {
      s.subscriptions.retain(|sub| {
        !unsubscribe.iter().any(|u| {
          sub.user_id == u.user_id
            && sub.kind == u.kind
            && sub.target_id == u.target_id
            && sub.target_kind == u.target_kind
        })
      })
    });
    Ok(())
  }

  async fn subscriptions_for_container(
    &self,
    user_id: UserId,
    container_id: ContainerId,
  ) -> Result<Vec<Subscription>, MemoryError> {
    Ok(self.with(|s| {
      s.subscriptions
        .iter()
        .filter(|sub| sub.user_id == user_id)
        .filter(|sub| match sub.target_kind {
          TargetKind::Container => sub.target_id == container_id,
          TargetKind::Page => {
            s.pages.get(&sub.target_id).is_some_and(|(c, _)| *c == container_id)
          }
        })
        .cloned()
        .collect()
    }))
  }

  async fn subscribers_of(
    &self,
    container_id: ContainerId,
    kind: SubscriptionKind,
  ) -> Result<Vec<UserId>, MemoryError> {
    Ok(self.with(|s| {
      let users: BTreeSet<UserId> = s
        .subscriptions
        .iter()
        .filter(|sub| sub.kind == kind)
        .filter(|sub| match sub.target_kind {
          TargetKind::Container => sub.target_id == container_id,
          TargetKind::Page => {
            s.pages.get(&sub.target_id).is_some_and(|(c, _)| *c == container_id)
          }
        })
        .map(|sub| sub.user_id)
        .collect();
      users.into_iter().collect()
    }))
  }

  async fn set_container_enabled(
    &self,
    container_id: ContainerId,
    enabled: bool,
  ) -> Result<(), MemoryError> {
    self.with(|s| match s.containers.get_mut(&container_id) {
      Some((_, flag)) => {
        *flag = enabled;
        Ok(())
      }
      None => Err(MemoryError(format!("no container {container_id}"))),
    })
  }

  async fn forget_container(&self, container_id: ContainerId) -> Result<(), MemoryError> {
    self.with(|s| {
      if let Some((_, flag)) = s.containers.get_mut(&container_id) {
        *flag = false;
      }
    });
    Ok(())
  }
}

impl EventSource for MemoryStore {
  type Error = MemoryError;

  async fn query_comments(
    &self,
    context_ids: Vec<ContextId>,
    page_ids: Vec<PageId>,
    after: DateTime<Utc>,
    exclude_user: UserId,
  ) -> Result<Vec<CommentEvent>, MemoryError> {
    self.comment_calls.fetch_add(1, Ordering::SeqCst);
    Ok(self.with(|s| {
      let mut hits: Vec<_> = s
        .comments
        .iter()
        .filter(|(ctx, c)| {
          context_ids.contains(ctx)
            && page_ids.contains(&c.page_id)
            && c.author.user_id != exclude_user
            && c.created_at > after
        })
        .cloned()
        .collect();
      hits.sort_by_key(|(ctx, c)| (*ctx, c.page_id, c.comment_id));
      hits.into_iter().map(|(_, c)| c).collect()
    }))
  }

  async fn query_edits(
    &self,
    page_ids: Vec<PageId>,
    after: DateTime<Utc>,
    exclude_user: UserId,
  ) -> Result<Vec<PageVersion>, MemoryError> {
    self.edit_calls.fetch_add(1, Ordering::SeqCst);
    Ok(self.with(|s| {
      let mut hits: Vec<_> = s
        .versions
        .iter()
        .filter(|v| {
          page_ids.contains(&v.page_id)
            && v.author.user_id != exclude_user
            && v.created_at > after
        })
        .cloned()
        .collect();
      hits.sort_by_key(|v| (v.page_id, v.created_at));
      hits
    }))
  }
}

// ─── Delivery ────────────────────────────────────────────────────────────────

/// Renders the container name and event count; fails for listed containers.
#[derive(Default)]
pub struct StubRenderer {
  pub failing: BTreeSet<ContainerId>,
}

impl Renderer for StubRenderer {
  type Error = MemoryError;

  fn render(
    &self,
    container: &Container,
    digest: &ContainerDigest,
  ) -> Result<Payload, MemoryError> {
    if self.failing.contains(&container.container_id) {
      return Err(MemoryError(format!("cannot render {}", container.name)));
    }
    Ok(Payload {
      subject: container.name.clone(),
      body:    format!("{} events", digest.event_count()),
    })
  }
}

/// Records every delivered payload.
#[derive(Default)]
pub struct RecordingNotifier {
  sent: Mutex<Vec<(UserId, Payload)>>,
}

impl RecordingNotifier {
  pub fn sent(&self) -> Vec<(UserId, Payload)> { self.sent.lock().unwrap().clone() }
}

impl Notifier for RecordingNotifier {
  type Error = MemoryError;

  async fn send(&self, recipient: &User, payload: &Payload) -> Result<DeliveryId, MemoryError> {
    self.sent.lock().unwrap().push((recipient.user_id, payload.clone()));
    Ok(DeliveryId(Uuid::new_v4()))
  }
}

/// Records the order subscribers were entered in.
#[derive(Default)]
pub struct RecordingContext {
  entered: Mutex<Vec<UserId>>,
  resets:  AtomicUsize,
}

impl RecordingContext {
  pub fn entered(&self) -> Vec<UserId> { self.entered.lock().unwrap().clone() }

  pub fn resets(&self) -> usize { self.resets.load(Ordering::SeqCst) }
}

impl ExecutionContext for &RecordingContext {
  fn enter(&self, user: &User) { self.entered.lock().unwrap().push(user.user_id); }

  fn reset(&self) { self.resets.fetch_add(1, Ordering::SeqCst); }
}
