//! Activity events streamed from an [`EventSource`](crate::store::EventSource).
//!
//! Events are immutable facts and are never stored by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  ordered::OrderedMap,
  subscription::{PageId, SubscriptionKind, UserId},
};

/// The user who caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
  pub user_id:   UserId,
  pub full_name: String,
}

/// A comment left on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
  pub comment_id: i64,
  pub page_id:    PageId,
  pub author:     Author,
  pub body:       String,
  pub created_at: DateTime<Utc>,
}

/// A raw row of a page's version history. Version `0` is the page creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageVersion {
  pub page_id:    PageId,
  pub version:    u32,
  pub author:     Author,
  pub created_at: DateTime<Utc>,
}

/// All versions one author produced on one page since the watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEvent {
  pub page_id:     PageId,
  pub author:      Author,
  /// The author created the page within the window.
  pub created:     bool,
  /// Number of non-creation versions.
  pub edit_count:  u32,
  /// Timestamp of the author's earliest version in the window.
  pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
  Comment(CommentEvent),
  Edit(EditEvent),
}

impl Event {
  /// The subscription kind this event is delivered under.
  pub fn kind(&self) -> SubscriptionKind {
    match self {
      Self::Comment(_) => SubscriptionKind::Comment,
      Self::Edit(_) => SubscriptionKind::Edit,
    }
  }

  pub fn page_id(&self) -> PageId {
    match self {
      Self::Comment(c) => c.page_id,
      Self::Edit(e) => e.page_id,
    }
  }

  pub fn author(&self) -> &Author {
    match self {
      Self::Comment(c) => &c.author,
      Self::Edit(e) => &e.author,
    }
  }

  pub fn occurred_at(&self) -> DateTime<Utc> {
    match self {
      Self::Comment(c) => c.created_at,
      Self::Edit(e) => e.occurred_at,
    }
  }
}

/// Collapse raw version rows into one [`EditEvent`] per `(page, author)`.
///
/// The result is ordered by `(page, earliest timestamp)`; authors tied on
/// both keep the order in which they were first seen.
pub fn group_edits(versions: impl IntoIterator<Item = PageVersion>) -> Vec<EditEvent> {
  let mut groups: OrderedMap<(PageId, UserId), EditEvent> = OrderedMap::new();

  for v in versions {
    let entry = groups.get_or_insert_with((v.page_id, v.author.user_id), || EditEvent {
      page_id:     v.page_id,
      author:      v.author.clone(),
      created:     false,
      edit_count:  0,
      occurred_at: v.created_at,
    });
    if v.version == 0 {
      entry.created = true;
    } else {
      entry.edit_count += 1;
    }
    entry.occurred_at = entry.occurred_at.min(v.created_at);
  }

  let mut edits: Vec<EditEvent> = groups.into_values().collect();
  edits.sort_by_key(|e| (e.page_id, e.occurred_at));
  edits
}
