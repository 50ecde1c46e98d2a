//! [`EventSource`] over the `comments` and `page_versions` tables.

use chrono::{DateTime, Utc};
use wikidigest_core::{
  event::{CommentEvent, PageVersion},
  store::EventSource,
  subscription::{ContextId, PageId, UserId},
};

use crate::{
  Error, Result, SqliteStore,
  encode::{RawComment, RawVersion, encode_ts, placeholders},
};

impl EventSource for SqliteStore {
  type Error = Error;

  async fn query_comments(
    &self,
    context_ids: Vec<ContextId>,
    page_ids: Vec<PageId>,
    after: DateTime<Utc>,
    exclude_user: UserId,
  ) -> Result<Vec<CommentEvent>> {
    if context_ids.is_empty() || page_ids.is_empty() {
      return Ok(Vec::new());
    }
    let after_ms = encode_ts(after);

    let raws: Vec<RawComment> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT c.comment_id, c.page_id, c.body, c.created_at, c.author_id, u.full_name
           FROM comments c
           JOIN users u ON u.user_id = c.author_id
           WHERE c.context_id IN ({})
             AND c.page_id IN ({})
             AND c.created_at > ?
             AND c.author_id <> ?
           ORDER BY c.context_id, c.page_id, c.created_at, c.comment_id",
          placeholders(context_ids.len()),
          placeholders(page_ids.len()),
        );
        let params = context_ids
          .into_iter()
          .chain(page_ids)
          .chain([after_ms, exclude_user]);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RawComment {
              comment_id: row.get(0)?,
              page_id:    row.get(1)?,
              body:       row.get(2)?,
              created_at: row.get(3)?,
              author_id:  row.get(4)?,
              author:     row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawComment::into_event).collect()
  }

  async fn query_edits(
    &self,
    page_ids: Vec<PageId>,
    after: DateTime<Utc>,
    exclude_user: UserId,
  ) -> Result<Vec<PageVersion>> {
    if page_ids.is_empty() {
      return Ok(Vec::new());
    }
    let after_ms = encode_ts(after);

    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT v.page_id, v.version, v.created_at, v.author_id, u.full_name
           FROM page_versions v
           JOIN users u ON u.user_id = v.author_id
           WHERE v.page_id IN ({})
             AND v.created_at > ?
             AND v.author_id <> ?
           ORDER BY v.page_id, v.created_at, v.version",
          placeholders(page_ids.len()),
        );
        let params = page_ids.into_iter().chain([after_ms, exclude_user]);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RawVersion {
              page_id:    row.get(0)?,
              version:    row.get(1)?,
              created_at: row.get(2)?,
              author_id:  row.get(3)?,
              author:     row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVersion::into_version).collect()
  }
}
