//! The SQLite implementation of [`SubscriptionStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use wikidigest_core::{
  store::SubscriptionStore,
  subscription::{
    Container, ContainerId, ContextId, EnabledContainers, NewSubscription, PageId,
    ResolvedSubscriptionRow, Subscription, SubscriptionId, SubscriptionKind, User, UserId,
    ensure_owned_by,
  },
};

use crate::{
  Error, Result,
  encode::{
    RawResolvedRow, RawSubscription, SUBSCRIPTION_COLUMNS, encode_kind, encode_target_kind,
    encode_ts, placeholders,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A digest store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Resource metadata ─────────────────────────────────────────────────
  //
  // Users, containers, pages and activity are owned by the host
  // application; these writers let it mirror them into the store.

  /// Insert or rename a user.
  pub async fn put_user(&self, user_id: UserId, full_name: impl Into<String>) -> Result<()> {
    let full_name = full_name.into();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, full_name) VALUES (?1, ?2)
           ON CONFLICT (user_id) DO UPDATE SET full_name = excluded.full_name",
          rusqlite::params![user_id, full_name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Flag a user as deleted. The row is kept so history still resolves.
  pub async fn mark_user_deleted(&self, user_id: UserId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE users SET deleted = 1 WHERE user_id = ?1",
          rusqlite::params![user_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert or update a container.
  pub async fn put_container(
    &self,
    container_id: ContainerId,
    name: impl Into<String>,
    context_id: Option<ContextId>,
  ) -> Result<()> {
    let name = name.into();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO containers (container_id, name, context_id) VALUES (?1, ?2, ?3)
           ON CONFLICT (container_id) DO UPDATE
             SET name = excluded.name, context_id = excluded.context_id",
          rusqlite::params![container_id, name, context_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Delete a container record and its enablement.
  pub async fn delete_container(&self, container_id: ContainerId) -> Result<()> {
    self.forget_container(container_id).await?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM containers WHERE container_id = ?1",
          rusqlite::params![container_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn put_page(
    &self,
    page_id: PageId,
    container_id: ContainerId,
    title: impl Into<String>,
  ) -> Result<()> {
    let title = title.into();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO pages (page_id, container_id, title) VALUES (?1, ?2, ?3)
           ON CONFLICT (page_id) DO UPDATE
             SET container_id = excluded.container_id, title = excluded.title",
          rusqlite::params![page_id, container_id, title],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Delete a page. Subscriptions to it are left for the next digest run
  /// to prune.
  pub async fn delete_page(&self, page_id: PageId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM pages WHERE page_id = ?1", rusqlite::params![page_id])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Record a comment and return its id.
  pub async fn add_comment(
    &self,
    context_id: ContextId,
    page_id: PageId,
    author_id: UserId,
    body: impl Into<String>,
    created_at: DateTime<Utc>,
  ) -> Result<i64> {
    let body = body.into();
    let at = encode_ts(created_at);
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO comments (context_id, page_id, author_id, body, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![context_id, page_id, author_id, body, at],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }

  /// Record one row of a page's version history. Version `0` creates the
  /// page.
  pub async fn add_page_version(
    &self,
    page_id: PageId,
    version: u32,
    author_id: UserId,
    created_at: DateTime<Utc>,
  ) -> Result<()> {
    let at = encode_ts(created_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO page_versions (page_id, version, author_id, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![page_id, version, author_id, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Overwrite a subscription's watermark, e.g. when importing
  /// subscriptions from another system.
  pub async fn set_watermark(
    &self,
    subscription_id: SubscriptionId,
    watermark: DateTime<Utc>,
  ) -> Result<()> {
    let at = encode_ts(watermark);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subscriptions SET watermark = ?1 WHERE subscription_id = ?2",
          rusqlite::params![at, subscription_id],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::Core(wikidigest_core::Error::NotFound {
        what: "subscription",
        id:   subscription_id,
      }));
    }
    Ok(())
  }

  /// All subscriptions of a user, in id order.
  pub async fn subscriptions_of(&self, user_id: UserId) -> Result<Vec<Subscription>> {
    let raws: Vec<RawSubscription> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions s
           WHERE s.user_id = ?1 ORDER BY s.subscription_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], RawSubscription::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSubscription::into_subscription).collect()
  }
}

// ─── SubscriptionStore impl ──────────────────────────────────────────────────

impl SubscriptionStore for SqliteStore {
  type Error = Error;

  // ── Batch reads ───────────────────────────────────────────────────────────

  async fn enabled_containers(&self) -> Result<EnabledContainers> {
    let pairs: Vec<(i64, i64)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT c.container_id, c.context_id
           FROM container_settings cs
           JOIN containers c ON c.container_id = cs.container_id
           WHERE cs.enabled = 1
             AND c.context_id IS NOT NULL
           ORDER BY c.container_id",
        )?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(pairs.into_iter().collect())
  }

  async fn list_subscriber_ids_by_min_watermark(
    &self,
    limit: Option<usize>,
  ) -> Result<Vec<UserId>> {
    // SQLite treats a negative LIMIT as unbounded.
    let limit_val = limit.map_or(-1, |l| l as i64);

    let ids = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id, MIN(watermark) AS oldest
           FROM subscriptions
           GROUP BY user_id
           ORDER BY oldest ASC, user_id ASC
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<UserId>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(ids)
  }

  async fn resolve(
    &self,
    user_id: UserId,
    enabled: &EnabledContainers,
  ) -> Result<Vec<ResolvedSubscriptionRow>> {
    let container_ids = enabled.container_ids();

    let raws: Vec<RawResolvedRow> = self
      .conn
      .call(move |conn| {
        let live_filter = if container_ids.is_empty() {
          "p.page_id IS NULL".to_owned()
        } else {
          format!(
            "(p.container_id IN ({}) OR p.page_id IS NULL)",
            placeholders(container_ids.len())
          )
        };

        let sql = format!(
          "SELECT {SUBSCRIPTION_COLUMNS},
                  p.page_id, p.title, p.container_id, c.name
           FROM subscriptions s
           LEFT JOIN pages p
             ON (s.target_kind = 0 AND p.page_id = s.target_id)
             OR (s.target_kind = 1 AND p.container_id = s.target_id)
           LEFT JOIN containers c ON c.container_id = p.container_id
           WHERE s.user_id = ?
             AND {live_filter}
           ORDER BY p.container_id, p.page_id, s.watermark, s.subscription_id"
        );

        let params = std::iter::once(user_id).chain(container_ids);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RawResolvedRow {
              subscription:   RawSubscription::from_row(row)?,
              page_id:        row.get(6)?,
              title:          row.get(7)?,
              container_id:   row.get(8)?,
              container_name: row.get(9)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawResolvedRow::into_row).collect()
  }

  async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
    let user = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT user_id, full_name, deleted FROM users WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| {
              Ok(User {
                user_id:   row.get(0)?,
                full_name: row.get(1)?,
                deleted:   row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;
    Ok(user)
  }

  async fn get_container(&self, container_id: ContainerId) -> Result<Option<Container>> {
    let container = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT container_id, name, context_id FROM containers WHERE container_id = ?1",
            rusqlite::params![container_id],
            |row| {
              Ok(Container {
                container_id: row.get(0)?,
                name:         row.get(1)?,
                context_id:   row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;
    Ok(container)
  }

  // ── Batch writes ──────────────────────────────────────────────────────────

  async fn advance_watermarks(
    &self,
    subscription_ids: Vec<SubscriptionId>,
    now: DateTime<Utc>,
  ) -> Result<usize> {
    let now_ms = encode_ts(now);

    let changed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
          let mut stmt = tx.prepare(
            "UPDATE subscriptions SET watermark = MAX(watermark, ?1)
             WHERE subscription_id = ?2",
          )?;
          for id in subscription_ids {
            changed += stmt.execute(rusqlite::params![now_ms, id])?;
          }
        }
        tx.commit()?;
        Ok(changed)
      })
      .await?;

    Ok(changed)
  }

  async fn delete_page_subscriptions(
    &self,
    user_id: UserId,
    page_ids: Vec<PageId>,
  ) -> Result<usize> {
    if page_ids.is_empty() {
      return Ok(0);
    }

    let removed = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "DELETE FROM subscriptions
           WHERE user_id = ? AND target_kind = 0 AND target_id IN ({})",
          placeholders(page_ids.len())
        );
        let params = std::iter::once(user_id).chain(page_ids);
        Ok(conn.execute(&sql, rusqlite::params_from_iter(params))?)
      })
      .await?;

    Ok(removed)
  }

  // ── Subscription management ───────────────────────────────────────────────

  async fn save_subscriptions(
    &self,
    acting_user: UserId,
    subscribe: Vec<NewSubscription>,
    unsubscribe: Vec<NewSubscription>,
  ) -> Result<()> {
    ensure_owned_by(acting_user, &subscribe)?;
    ensure_owned_by(acting_user, &unsubscribe)?;

    let now_ms = encode_ts(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          // A second subscribe to the same target is a no-op.
          let mut insert = tx.prepare(
            "INSERT INTO subscriptions (user_id, kind, target_id, target_kind, watermark)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id, kind, target_id, target_kind) DO NOTHING",
          )?;
          for s in &subscribe {
            insert.execute(rusqlite::params![
              s.user_id,
              encode_kind(s.kind),
              s.target_id,
              encode_target_kind(s.target_kind),
              now_ms,
            ])?;
          }

          let mut delete = tx.prepare(
            "DELETE FROM subscriptions
             WHERE user_id = ?1 AND kind = ?2 AND target_id = ?3 AND target_kind = ?4",
          )?;
          for s in &unsubscribe {
            delete.execute(rusqlite::params![
              s.user_id,
              encode_kind(s.kind),
              s.target_id,
              encode_target_kind(s.target_kind),
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn subscriptions_for_container(
    &self,
    user_id: UserId,
    container_id: ContainerId,
  ) -> Result<Vec<Subscription>> {
    let raws: Vec<RawSubscription> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUBSCRIPTION_COLUMNS}
           FROM subscriptions s
           LEFT JOIN pages p ON s.target_kind = 0 AND p.page_id = s.target_id
           WHERE s.user_id = ?1
             AND ((s.target_kind = 1 AND s.target_id = ?2)
               OR (s.target_kind = 0 AND p.container_id = ?2))
           ORDER BY s.target_kind DESC, s.target_id, s.kind"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_id, container_id], RawSubscription::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSubscription::into_subscription).collect()
  }

  async fn subscribers_of(
    &self,
    container_id: ContainerId,
    kind: SubscriptionKind,
  ) -> Result<Vec<UserId>> {
    let kind_val = encode_kind(kind);

    let ids = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT s.user_id
           FROM subscriptions s
           LEFT JOIN pages p ON s.target_kind = 0 AND p.page_id = s.target_id
           WHERE s.kind = ?2
             AND ((s.target_kind = 1 AND s.target_id = ?1)
               OR (s.target_kind = 0 AND p.container_id = ?1))
           ORDER BY s.user_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![container_id, kind_val], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<UserId>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(ids)
  }

  // ── Container enablement ──────────────────────────────────────────────────

  async fn set_container_enabled(&self, container_id: ContainerId, enabled: bool) -> Result<()> {
    if self.get_container(container_id).await?.is_none() {
      return Err(Error::Core(wikidigest_core::Error::NotFound {
        what: "container",
        id:   container_id,
      }));
    }

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO container_settings (container_id, enabled) VALUES (?1, ?2)
           ON CONFLICT (container_id) DO UPDATE SET enabled = excluded.enabled",
          rusqlite::params![container_id, enabled],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn forget_container(&self, container_id: ContainerId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM container_settings WHERE container_id = ?1",
          rusqlite::params![container_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
