//! In-app delivery: digests land in the `outbox` table of the same database.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;
use wikidigest_core::{
  delivery::{DeliveryId, Notifier, Payload},
  subscription::{User, UserId},
};

use crate::{
  Error, Result, SqliteStore,
  encode::{decode_ts, encode_ts},
};

/// A delivered digest as stored in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
  pub delivery_id:  DeliveryId,
  pub recipient_id: UserId,
  pub payload:      Payload,
  pub created_at:   DateTime<Utc>,
}

/// A [`Notifier`] that appends every message to the outbox table.
#[derive(Clone)]
pub struct OutboxNotifier {
  store: SqliteStore,
}

impl OutboxNotifier {
  pub fn new(store: SqliteStore) -> Self { Self { store } }
}

impl Notifier for OutboxNotifier {
  type Error = Error;

  async fn send(&self, recipient: &User, payload: &Payload) -> Result<DeliveryId> {
    let id = Uuid::new_v4();
    let id_str = id.to_string();
    let recipient_id = recipient.user_id;
    let subject = payload.subject.clone();
    let body = payload.body.clone();
    let at = encode_ts(Utc::now());

    self
      .store
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO outbox (delivery_id, recipient_id, subject, body, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, recipient_id, subject, body, at],
        )?;
        Ok(())
      })
      .await?;

    debug!(delivery_id = %id, recipient_id, "queued digest in outbox");
    Ok(DeliveryId(id))
  }
}

struct RawOutboxRow {
  delivery_id:  String,
  recipient_id: i64,
  subject:      String,
  body:         String,
  created_at:   i64,
}

impl SqliteStore {
  /// Messages delivered to `user_id`, oldest first.
  pub async fn outbox_for(&self, user_id: UserId) -> Result<Vec<OutboxMessage>> {
    let raws: Vec<RawOutboxRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT delivery_id, recipient_id, subject, body, created_at
           FROM outbox
           WHERE recipient_id = ?1
           ORDER BY created_at, rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], |row| {
            Ok(RawOutboxRow {
              delivery_id:  row.get(0)?,
              recipient_id: row.get(1)?,
              subject:      row.get(2)?,
              body:         row.get(3)?,
              created_at:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| {
        Ok(OutboxMessage {
          delivery_id:  DeliveryId(Uuid::parse_str(&raw.delivery_id)?),
          recipient_id: raw.recipient_id,
          payload:      Payload { subject: raw.subject, body: raw.body },
          created_at:   decode_ts(raw.created_at)?,
        })
      })
      .collect()
  }
}
