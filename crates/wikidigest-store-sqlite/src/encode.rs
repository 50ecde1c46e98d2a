//! Encoding and decoding helpers between domain types and the integer
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as epoch milliseconds. Enum columns use the small
//! integer discriminants shared with the original subscription table.

use chrono::{DateTime, TimeZone as _, Utc};
use wikidigest_core::{
  event::{Author, CommentEvent, PageVersion},
  subscription::{PageRef, ResolvedSubscriptionRow, Subscription, SubscriptionKind, TargetKind},
};

use crate::{Error, Result};

// ─── Timestamps ──────────────────────────────────────────────────────────────

pub fn encode_ts(dt: DateTime<Utc>) -> i64 { dt.timestamp_millis() }

pub fn decode_ts(ms: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .ok_or(Error::Timestamp(ms))
}

// ─── Kinds ───────────────────────────────────────────────────────────────────

pub fn encode_kind(k: SubscriptionKind) -> i64 {
  match k {
    SubscriptionKind::Comment => 0,
    SubscriptionKind::Edit => 1,
  }
}

pub fn decode_kind(v: i64) -> Result<SubscriptionKind> {
  match v {
    0 => Ok(SubscriptionKind::Comment),
    1 => Ok(SubscriptionKind::Edit),
    value => Err(Error::UnknownDiscriminant { column: "kind", value }),
  }
}

pub fn encode_target_kind(k: TargetKind) -> i64 {
  match k {
    TargetKind::Page => 0,
    TargetKind::Container => 1,
  }
}

pub fn decode_target_kind(v: i64) -> Result<TargetKind> {
  match v {
    0 => Ok(TargetKind::Page),
    1 => Ok(TargetKind::Container),
    value => Err(Error::UnknownDiscriminant { column: "target_kind", value }),
  }
}

/// `?, ?, ?` with `n` placeholders, for `IN (...)` lists.
pub fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// Column list matching [`RawSubscription::from_row`].
pub const SUBSCRIPTION_COLUMNS: &str =
  "s.subscription_id, s.user_id, s.kind, s.target_id, s.target_kind, s.watermark";

/// A `subscriptions` row exactly as read from SQLite.
pub struct RawSubscription {
  pub subscription_id: i64,
  pub user_id:         i64,
  pub kind:            i64,
  pub target_id:       i64,
  pub target_kind:     i64,
  pub watermark:       i64,
}

impl RawSubscription {
  /// Read the first six columns of `row`.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subscription_id: row.get(0)?,
      user_id:         row.get(1)?,
      kind:            row.get(2)?,
      target_id:       row.get(3)?,
      target_kind:     row.get(4)?,
      watermark:       row.get(5)?,
    })
  }

  pub fn into_subscription(self) -> Result<Subscription> {
    Ok(Subscription {
      subscription_id: self.subscription_id,
      user_id:         self.user_id,
      kind:            decode_kind(self.kind)?,
      target_id:       self.target_id,
      target_kind:     decode_target_kind(self.target_kind)?,
      watermark:       decode_ts(self.watermark)?,
    })
  }
}

/// A subscription row left-joined against `pages` and `containers`.
pub struct RawResolvedRow {
  pub subscription:   RawSubscription,
  pub page_id:        Option<i64>,
  pub title:          Option<String>,
  pub container_id:   Option<i64>,
  pub container_name: Option<String>,
}

impl RawResolvedRow {
  pub fn into_row(self) -> Result<ResolvedSubscriptionRow> {
    let page = match (self.page_id, self.container_id) {
      (Some(page_id), Some(container_id)) => Some(PageRef {
        page_id,
        title: self.title.unwrap_or_default(),
        container_id,
        container_name: self.container_name.unwrap_or_default(),
      }),
      _ => None,
    };
    Ok(ResolvedSubscriptionRow { subscription: self.subscription.into_subscription()?, page })
  }
}

pub struct RawComment {
  pub comment_id: i64,
  pub page_id:    i64,
  pub body:       String,
  pub created_at: i64,
  pub author_id:  i64,
  pub author:     String,
}

impl RawComment {
  pub fn into_event(self) -> Result<CommentEvent> {
    Ok(CommentEvent {
      comment_id: self.comment_id,
      page_id:    self.page_id,
      author:     Author { user_id: self.author_id, full_name: self.author },
      body:       self.body,
      created_at: decode_ts(self.created_at)?,
    })
  }
}

pub struct RawVersion {
  pub page_id:    i64,
  pub version:    u32,
  pub created_at: i64,
  pub author_id:  i64,
  pub author:     String,
}

impl RawVersion {
  pub fn into_version(self) -> Result<PageVersion> {
    Ok(PageVersion {
      page_id:    self.page_id,
      version:    self.version,
      author:     Author { user_id: self.author_id, full_name: self.author },
      created_at: decode_ts(self.created_at)?,
    })
  }
}
