//! SQL schema for the wiki digest SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Timestamps are INTEGER epoch milliseconds so watermark comparisons are
/// numeric.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS users (
    user_id   INTEGER PRIMARY KEY,
    full_name TEXT    NOT NULL,
    deleted   INTEGER NOT NULL DEFAULT 0
);

-- A container (wiki) groups pages. Comments are filed under its context.
CREATE TABLE IF NOT EXISTS containers (
    container_id INTEGER PRIMARY KEY,
    name         TEXT    NOT NULL,
    context_id   INTEGER
);

-- Whether a container takes part in digests. One row per container.
CREATE TABLE IF NOT EXISTS container_settings (
    container_id INTEGER PRIMARY KEY,
    enabled      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pages (
    page_id      INTEGER PRIMARY KEY,
    container_id INTEGER NOT NULL,
    title        TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS comments (
    comment_id INTEGER PRIMARY KEY,
    context_id INTEGER NOT NULL,
    page_id    INTEGER NOT NULL,
    author_id  INTEGER NOT NULL,
    body       TEXT    NOT NULL,
    created_at INTEGER NOT NULL
);

-- Version 0 of a page is its creation.
CREATE TABLE IF NOT EXISTS page_versions (
    version_id INTEGER PRIMARY KEY,
    page_id    INTEGER NOT NULL,
    version    INTEGER NOT NULL,
    author_id  INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id INTEGER PRIMARY KEY,
    user_id         INTEGER NOT NULL,
    kind            INTEGER NOT NULL,   -- 0 comment | 1 edit
    target_id       INTEGER NOT NULL,
    target_kind     INTEGER NOT NULL,   -- 0 page | 1 container
    watermark       INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, kind, target_id, target_kind)
);

-- Delivered digests. Rows are never updated.
CREATE TABLE IF NOT EXISTS outbox (
    delivery_id  TEXT    PRIMARY KEY,
    recipient_id INTEGER NOT NULL,
    subject      TEXT    NOT NULL,
    body         TEXT    NOT NULL,
    created_at   INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS pages_container_idx     ON pages(container_id);
CREATE INDEX IF NOT EXISTS comments_page_idx       ON comments(page_id, created_at);
CREATE INDEX IF NOT EXISTS page_versions_page_idx  ON page_versions(page_id, created_at);
CREATE INDEX IF NOT EXISTS subscriptions_user_idx  ON subscriptions(user_id, watermark);
CREATE INDEX IF NOT EXISTS outbox_recipient_idx    ON outbox(recipient_id);

PRAGMA user_version = 1;
";
