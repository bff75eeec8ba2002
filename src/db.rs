//! Archive Store - SQLite persistence for posts, replies and sync runs
//!
//! This module provides persistent storage for:
//! - Posts of the authenticated account (first write wins, never updated)
//! - Replies from each post's conversation
//! - An append-only log of sync runs
//!
//! Nested records (`children`, `root_post`, `replied_to`) are stored as JSON text.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{MediaType, Post, Reply};
use crate::timestamp;

/// One row of the sync audit trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLogEntry {
    pub id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub count: usize,
    pub initial: bool,
    pub success: bool,
}

/// A stored post together with its bookkeeping flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub post: Post,
    pub exported: bool,
    pub replies_fetched: bool,
}

/// Row counts for status output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub posts: u64,
    pub replies: u64,
    pub unexported: u64,
    pub pending_replies: u64,
    pub sync_runs: u64,
}

/// SQLite archive
pub struct ThreadsDb {
    conn: Connection,
}

impl ThreadsDb {
    /// Open or create the archive at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { conn };
        db.initialize()?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS posts (
                    id              TEXT PRIMARY KEY,
                    text            TEXT,
                    media_type      TEXT,
                    media_url       TEXT,
                    thumbnail_url   TEXT,
                    permalink       TEXT,
                    children        TEXT,
                    timestamp       TEXT,
                    is_quote_post   INTEGER,
                    exported        INTEGER DEFAULT 0,
                    replies_fetched INTEGER DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS replies (
                    id                   TEXT PRIMARY KEY,
                    post_id              TEXT,
                    text                 TEXT,
                    username             TEXT,
                    permalink            TEXT,
                    timestamp            TEXT,
                    media_type           TEXT,
                    media_url            TEXT,
                    shortcode            TEXT,
                    thumbnail_url        TEXT,
                    children             TEXT,
                    has_replies          INTEGER,
                    root_post            TEXT,
                    replied_to           TEXT,
                    is_reply             INTEGER,
                    is_reply_owned_by_me INTEGER,
                    hide_status          TEXT,
                    FOREIGN KEY(post_id) REFERENCES posts(id)
                );

                CREATE TABLE IF NOT EXISTS sync_log (
                    id         INTEGER PRIMARY KEY AUTOINCREMENT,
                    start_time TEXT,
                    end_time   TEXT,
                    count      INTEGER,
                    initial    INTEGER,
                    success    INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_posts_pending_replies ON posts(replies_fetched, media_type);
                CREATE INDEX IF NOT EXISTS idx_posts_exported ON posts(exported);
                CREATE INDEX IF NOT EXISTS idx_replies_post ON replies(post_id);
                "#,
            )
            .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    // =========================================================================
    // Posts
    // =========================================================================

    /// Insert posts, ignoring ids that are already stored
    ///
    /// Returns the number of rows actually inserted.
    pub fn insert_posts(&self, posts: &[Post]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin post insert")?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO posts (
                    id, text, media_type, media_url, thumbnail_url,
                    permalink, children, timestamp, is_quote_post
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;

            for post in posts {
                let children = to_json_text(&post.children)?;
                let changed = stmt
                    .execute(params![
                        post.id,
                        post.text,
                        post.media_type.as_ref().map(MediaType::as_str),
                        post.media_url,
                        post.thumbnail_url,
                        post.permalink,
                        children,
                        post.timestamp,
                        post.is_quote_post as i64,
                    ])
                    .with_context(|| format!("Failed to insert post {}", post.id))?;

                if changed > 0 {
                    inserted += 1;
                    debug!("Inserted post {}", post.id);
                }
            }
        }

        tx.commit().context("Failed to commit post insert")?;
        Ok(inserted)
    }

    /// Insert a single post; false when the id already existed
    pub fn insert_post(&self, post: &Post) -> Result<bool> {
        Ok(self.insert_posts(std::slice::from_ref(post))? == 1)
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRecord>> {
        self.conn
            .query_row(
                r#"
                SELECT id, text, media_type, media_url, thumbnail_url, permalink,
                       children, timestamp, is_quote_post, exported, replies_fetched
                FROM posts
                WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(PostRecord {
                        post: Post {
                            id: row.get(0)?,
                            text: row.get(1)?,
                            media_type: row
                                .get::<_, Option<String>>(2)?
                                .map(|s| MediaType::parse(&s)),
                            media_url: row.get(3)?,
                            thumbnail_url: row.get(4)?,
                            permalink: row.get(5)?,
                            children: from_json_text(row, 6)?,
                            timestamp: row.get(7)?,
                            is_quote_post: row.get::<_, Option<i64>>(8)?.unwrap_or(0) != 0,
                        },
                        exported: row.get::<_, Option<i64>>(9)?.unwrap_or(0) != 0,
                        replies_fetched: row.get::<_, Option<i64>>(10)?.unwrap_or(0) != 0,
                    })
                },
            )
            .optional()
            .context("Failed to query post")
    }

    /// Latest post time in Unix seconds, used as the incremental watermark
    pub fn get_max_timestamp(&self) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT timestamp FROM posts WHERE timestamp IS NOT NULL")?;

        let stamps = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query post timestamps")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect post timestamps")?;

        let mut max: Option<i64> = None;
        for raw in &stamps {
            match timestamp::to_unix(raw) {
                Some(unix) => max = Some(max.map_or(unix, |m| m.max(unix))),
                None => warn!("Ignoring unparseable post timestamp: {}", raw),
            }
        }

        Ok(max)
    }

    /// Ids of posts whose conversation has not been fetched yet
    ///
    /// Reposts are skipped; they have no conversation of their own.
    pub fn get_posts_without_replies(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id FROM posts
            WHERE replies_fetched = 0 AND media_type IS NOT ?1
            ORDER BY timestamp
            "#,
        )?;

        let ids = stmt
            .query_map(params![MediaType::RepostFacade.as_str()], |row| row.get(0))
            .context("Failed to query posts without replies")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to collect post ids")?;

        Ok(ids)
    }

    pub fn update_replies_fetched(&self, post_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE posts SET replies_fetched = 1 WHERE id = ?1",
                params![post_id],
            )
            .with_context(|| format!("Failed to mark replies fetched for post {}", post_id))?;
        Ok(())
    }

    // =========================================================================
    // Replies
    // =========================================================================

    /// Insert replies for a post, ignoring ids that are already stored
    pub fn insert_replies(&self, post_id: &str, replies: &[Reply]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin reply insert")?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO replies (
                    id, post_id, text, username, permalink, timestamp,
                    media_type, media_url, shortcode, thumbnail_url, children,
                    has_replies, root_post, replied_to, is_reply, is_reply_owned_by_me, hide_status
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
            )?;

            for reply in replies {
                let changed = stmt
                    .execute(params![
                        reply.id,
                        post_id,
                        reply.text,
                        reply.username,
                        reply.permalink,
                        reply.timestamp,
                        reply.media_type.as_ref().map(MediaType::as_str),
                        reply.media_url,
                        reply.shortcode,
                        reply.thumbnail_url,
                        to_json_text(&reply.children)?,
                        reply.has_replies as i64,
                        to_json_text(&reply.root_post)?,
                        to_json_text(&reply.replied_to)?,
                        reply.is_reply as i64,
                        reply.is_reply_owned_by_me as i64,
                        reply.hide_status,
                    ])
                    .with_context(|| format!("Failed to insert reply {}", reply.id))?;

                if changed > 0 {
                    inserted += 1;
                    debug!("Inserted reply {} (post {})", reply.id, post_id);
                }
            }
        }

        tx.commit().context("Failed to commit reply insert")?;
        Ok(inserted)
    }

    pub fn replies_for_post(&self, post_id: &str) -> Result<Vec<Reply>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, text, username, permalink, timestamp, media_type, media_url,
                   shortcode, thumbnail_url, children, has_replies, root_post,
                   replied_to, is_reply, is_reply_owned_by_me, hide_status
            FROM replies
            WHERE post_id = ?1
            ORDER BY timestamp, id
            "#,
        )?;

        let replies = stmt
            .query_map(params![post_id], |row| {
                Ok(Reply {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    username: row.get(2)?,
                    permalink: row.get(3)?,
                    timestamp: row.get(4)?,
                    media_type: row
                        .get::<_, Option<String>>(5)?
                        .map(|s| MediaType::parse(&s)),
                    media_url: row.get(6)?,
                    shortcode: row.get(7)?,
                    thumbnail_url: row.get(8)?,
                    children: from_json_text(row, 9)?,
                    has_replies: row.get::<_, Option<i64>>(10)?.unwrap_or(0) != 0,
                    root_post: from_json_text(row, 11)?,
                    replied_to: from_json_text(row, 12)?,
                    is_reply: row.get::<_, Option<i64>>(13)?.unwrap_or(0) != 0,
                    is_reply_owned_by_me: row.get::<_, Option<i64>>(14)?.unwrap_or(0) != 0,
                    hide_status: row.get(15)?,
                })
            })
            .context("Failed to query replies")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect replies")?;

        Ok(replies)
    }

    // =========================================================================
    // Sync log
    // =========================================================================

    /// Append one sync run to the audit trail
    pub fn log_sync(&self, entry: &SyncLogEntry) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO sync_log (start_time, end_time, count, initial, success)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    entry.start_time.to_rfc3339(),
                    entry.end_time.to_rfc3339(),
                    entry.count as i64,
                    entry.initial as i64,
                    entry.success as i64,
                ],
            )
            .context("Failed to record sync run")?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent sync runs, newest first
    pub fn recent_sync_logs(&self, limit: u32) -> Result<Vec<SyncLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, start_time, end_time, count, initial, success
            FROM sync_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(SyncLogEntry {
                    id: row.get(0)?,
                    start_time: parse_stored_time(row.get::<_, Option<String>>(1)?),
                    end_time: parse_stored_time(row.get::<_, Option<String>>(2)?),
                    count: row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as usize,
                    initial: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
                    success: row.get::<_, Option<i64>>(5)?.unwrap_or(0) != 0,
                })
            })
            .context("Failed to query sync log")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect sync log")?;

        Ok(entries)
    }

    // =========================================================================
    // Export and statistics
    // =========================================================================

    /// Write every not-yet-exported post to a CSV file in `output_dir`
    ///
    /// The file is named after the earliest and latest post dates in the batch
    /// (`threads_export_YYYYMMDD_YYYYMMDD.csv`). Exported rows are flagged so
    /// a second call without new posts writes nothing and returns `None`.
    pub fn export_to_csv(&self, output_dir: &Path) -> Result<Option<PathBuf>> {
        let (columns, rows) = {
            let mut stmt = self
                .conn
                .prepare("SELECT * FROM posts WHERE exported = 0 ORDER BY timestamp, id")?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();

            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<Result<Vec<_>, _>>()
                })
                .context("Failed to query unexported posts")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to collect unexported posts")?;

            (columns, rows)
        };

        if rows.is_empty() {
            info!("No unexported posts");
            return Ok(None);
        }

        let id_idx = column_index(&columns, "id")?;
        let ts_idx = column_index(&columns, "timestamp")?;

        let dates: Vec<DateTime<Utc>> = rows
            .iter()
            .filter_map(|row| match &row[ts_idx] {
                Value::Text(raw) => {
                    let parsed = timestamp::parse_api_timestamp(raw);
                    if parsed.is_none() {
                        warn!("Could not parse timestamp {} during export", raw);
                    }
                    parsed
                }
                _ => None,
            })
            .collect();

        let (Some(earliest), Some(latest)) = (dates.iter().min(), dates.iter().max()) else {
            warn!("No parseable timestamps among unexported posts, skipping export");
            return Ok(None);
        };

        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;

        let stem = format!(
            "threads_export_{}_{}",
            earliest.format("%Y%m%d"),
            latest.format("%Y%m%d")
        );
        let (path, file) = create_unique_file(output_dir, &stem, "csv")?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&columns)?;
        for row in &rows {
            writer.write_record(row.iter().map(render_csv_value))?;
        }
        writer.flush().context("Failed to flush CSV file")?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin export bookkeeping")?;
        {
            let mut stmt = tx.prepare("UPDATE posts SET exported = 1 WHERE id = ?1")?;
            for row in &rows {
                stmt.execute(params![row[id_idx]])?;
            }
        }
        tx.commit().context("Failed to mark posts exported")?;

        info!("Exported {} posts to {}", rows.len(), path.display());
        Ok(Some(path))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<u64> {
            self.conn
                .query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
                .with_context(|| format!("Failed to run count query: {}", sql))
        };

        Ok(StoreStats {
            posts: count("SELECT COUNT(*) FROM posts")?,
            replies: count("SELECT COUNT(*) FROM replies")?,
            unexported: count("SELECT COUNT(*) FROM posts WHERE exported = 0")?,
            pending_replies: count(
                "SELECT COUNT(*) FROM posts WHERE replies_fetched = 0 AND media_type IS NOT 'REPOST_FACADE'",
            )?,
            sync_runs: count("SELECT COUNT(*) FROM sync_log")?,
        })
    }
}

impl Drop for ThreadsDb {
    fn drop(&mut self) {
        debug!("Database connection closed");
    }
}

fn to_json_text<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize nested field")
}

fn from_json_text<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

fn parse_stored_time(raw: Option<String>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Create `{stem}.{ext}`, or `{stem}_2.{ext}`, `{stem}_3.{ext}`... if taken
///
/// Existing exports are never overwritten.
fn create_unique_file(dir: &Path, stem: &str, ext: &str) -> Result<(PathBuf, File)> {
    for n in 1u32.. {
        let name = if n == 1 {
            format!("{}.{}", stem, ext)
        } else {
            format!("{}_{}.{}", stem, n, ext)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} already exists, trying next name", path.display());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create CSV file: {:?}", path));
            }
        }
    }

    anyhow::bail!("No free export filename for {} in {:?}", stem, dir)
}

fn column_index(columns: &[String], name: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| c == name)
        .with_context(|| format!("posts table has no {} column", name))
}

fn render_csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}
