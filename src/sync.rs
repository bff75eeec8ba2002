//! Sync Manager - Orchestrates the four sync modes
//!
//! Every mode follows the same shape: start a timer, fetch and insert, optionally
//! back up what was fetched, then append one row to the sync log. Failures inside
//! a mode never escape it; they are reported through [`SyncOutcome::success`].
//! Only a failure to write the sync log itself is returned as an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::api::{self, ThreadsApi};
use crate::backup::JsonBackup;
use crate::db::{SyncLogEntry, ThreadsDb};
use crate::models::Post;

/// Which sync mode produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    FullHistory,
    Incremental,
    TimeRange,
    Replies,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::FullHistory => "full-history",
            SyncMode::Incremental => "incremental",
            SyncMode::TimeRange => "time-range",
            SyncMode::Replies => "replies",
        }
    }

    /// Only full-history runs are logged as initial imports
    pub fn is_initial(&self) -> bool {
        matches!(self, SyncMode::FullHistory)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    pub success: bool,
    /// Posts fetched (post modes) or replies fetched (replies mode)
    pub count: usize,
    pub duration: Duration,
}

/// Drives sync runs against one API client and one archive
pub struct SyncManager<A: ThreadsApi> {
    api: A,
    db: ThreadsDb,
    backup: Option<JsonBackup>,
}

impl<A: ThreadsApi> SyncManager<A> {
    pub fn new(api: A, db: ThreadsDb, backup: Option<JsonBackup>) -> Self {
        Self { api, db, backup }
    }

    pub fn db(&self) -> &ThreadsDb {
        &self.db
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Consume the manager, returning the archive
    pub fn into_db(self) -> ThreadsDb {
        self.db
    }

    /// Import the whole post history, page by page
    ///
    /// Each page is stored as soon as it arrives, so a failure part way
    /// through keeps everything fetched before it.
    pub async fn initial_sync(&self, backup: bool) -> Result<SyncOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!("Starting full-history sync");

        let mut fetched = Vec::new();
        let success = match self.drain_pages(None, false, &mut fetched).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error during full-history sync: {:#}", e);
                false
            }
        };

        if backup {
            self.write_backup(&fetched);
        }

        self.finish(SyncMode::FullHistory, started_at, timer, fetched.len(), success)
    }

    /// Fetch only posts newer than the latest stored one
    ///
    /// An empty page means the archive has caught up and ends the run.
    pub async fn incremental_sync(&self, backup: bool) -> Result<SyncOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let mut fetched = Vec::new();
        let result: Result<()> = async {
            let since = self
                .db
                .get_max_timestamp()
                .context("Failed to read incremental watermark")?
                .map(|latest| latest + 1);

            match since {
                Some(since) => info!("Starting incremental sync since {}", since),
                None => info!("Archive is empty, incremental sync starts from the beginning"),
            }

            self.drain_pages(since, true, &mut fetched).await
        }
        .await;

        let success = match result {
            Ok(()) => true,
            Err(e) => {
                error!("Error during incremental sync: {:#}", e);
                false
            }
        };

        if backup {
            self.write_backup(&fetched);
        }

        self.finish(SyncMode::Incremental, started_at, timer, fetched.len(), success)
    }

    /// Fetch every post between `since` and `until` (Unix seconds) in one go
    ///
    /// Nothing is stored unless the whole range was fetched; a failed run
    /// reports a count of zero.
    pub async fn sync_time_range(
        &self,
        since: Option<i64>,
        until: Option<i64>,
        backup: bool,
    ) -> Result<SyncOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!("Starting time-range sync (since {:?}, until {:?})", since, until);

        let result = async {
            let posts = api::fetch_posts_by_range(&self.api, since, until)
                .await
                .context("Failed to fetch posts for time range")?;

            if backup {
                self.write_backup(&posts);
            }

            let inserted = self.db.insert_posts(&posts)?;
            debug!("Stored {} new posts out of {}", inserted, posts.len());
            anyhow::Ok(posts.len())
        }
        .await;

        let (success, count) = match result {
            Ok(count) => (true, count),
            Err(e) => {
                error!("Error during time-range sync: {:#}", e);
                (false, 0)
            }
        };

        self.finish(SyncMode::TimeRange, started_at, timer, count, success)
    }

    /// Fetch the conversation of every post that has not had its replies fetched
    ///
    /// A post is marked as fetched after its attempt whether or not the fetch
    /// worked. Per-post failures are logged and skipped.
    pub async fn sync_replies(&self) -> Result<SyncOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!("Starting replies sync");

        let post_ids = match self.db.get_posts_without_replies() {
            Ok(ids) => ids,
            Err(e) => {
                error!("Error during replies sync: {:#}", e);
                return self.finish(SyncMode::Replies, started_at, timer, 0, false);
            }
        };

        info!("{} posts awaiting replies", post_ids.len());

        let mut total = 0;
        for post_id in &post_ids {
            match self.sync_post_replies(post_id).await {
                Ok(0) => debug!("No replies for post {}", post_id),
                Ok(count) => {
                    info!("Synced {} replies for post {}", count, post_id);
                    total += count;
                }
                Err(e) => warn!("Failed to sync replies for post {}: {:#}", post_id, e),
            }

            if let Err(e) = self.db.update_replies_fetched(post_id) {
                warn!("{:#}", e);
            }
        }

        self.finish(SyncMode::Replies, started_at, timer, total, true)
    }

    async fn sync_post_replies(&self, post_id: &str) -> Result<usize> {
        let replies = self
            .api
            .fetch_replies(post_id)
            .await
            .with_context(|| format!("Failed to fetch conversation of post {}", post_id))?;

        if !replies.is_empty() {
            self.db.insert_replies(post_id, &replies)?;
        }

        Ok(replies.len())
    }

    /// Walk the post listing, storing each page as it arrives
    ///
    /// Fetched posts are appended to `fetched` even when a later page fails.
    async fn drain_pages(
        &self,
        since: Option<i64>,
        stop_on_empty: bool,
        fetched: &mut Vec<Post>,
    ) -> Result<()> {
        let mut pager = api::fetch_posts_paginated(&self.api, since);

        while let Some(page) = pager.next_page().await? {
            if page.is_empty() {
                if stop_on_empty {
                    debug!("Empty page, archive is up to date");
                    break;
                }
                continue;
            }

            self.db.insert_posts(&page)?;
            fetched.extend(page);
            info!("Synced {} posts so far", fetched.len());
        }

        Ok(())
    }

    /// Backup failures are logged and do not fail the run
    fn write_backup(&self, posts: &[Post]) {
        let Some(backup) = &self.backup else {
            debug!("Backup requested but no backup writer configured");
            return;
        };

        if posts.is_empty() {
            debug!("Nothing fetched, skipping backup");
            return;
        }

        if let Err(e) = backup.backup_posts(posts, None) {
            error!("Backup failed: {:#}", e);
        }
    }

    fn finish(
        &self,
        mode: SyncMode,
        started_at: DateTime<Utc>,
        timer: Instant,
        count: usize,
        success: bool,
    ) -> Result<SyncOutcome> {
        let outcome = SyncOutcome {
            mode,
            success,
            count,
            duration: timer.elapsed(),
        };

        self.db
            .log_sync(&SyncLogEntry {
                id: None,
                start_time: started_at,
                end_time: Utc::now(),
                count,
                initial: mode.is_initial(),
                success,
            })
            .with_context(|| format!("Failed to log {} sync", mode))?;

        info!(
            "{} sync completed in {:.2}s: success={}, count={}",
            mode,
            outcome.duration.as_secs_f64(),
            success,
            count
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, MockThreadsApi, Page, PageCursor, RefreshedToken};
    use crate::models::{MediaType, Reply};
    use crate::timestamp;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Plays back a fixed list of post pages and per-post reply results
    #[derive(Default)]
    struct ScriptedApi {
        pages: Mutex<VecDeque<Result<Page<Post>, u16>>>,
        cursors: Mutex<Vec<PageCursor>>,
        replies: HashMap<String, Result<Vec<Reply>, u16>>,
        reply_calls: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn with_pages(pages: Vec<Result<Page<Post>, u16>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                ..Default::default()
            }
        }

        fn cursors(&self) -> Vec<PageCursor> {
            self.cursors.lock().unwrap().clone()
        }
    }

    fn exhausted(endpoint: &str, status: u16) -> ApiError {
        ApiError::RetriesExhausted {
            endpoint: endpoint.to_string(),
            attempts: 3,
            last_status: status,
        }
    }

    #[async_trait]
    impl ThreadsApi for ScriptedApi {
        async fn fetch_post_page(&self, cursor: &PageCursor) -> Result<Page<Post>, ApiError> {
            self.cursors.lock().unwrap().push(cursor.clone());
            match self.pages.lock().unwrap().pop_front() {
                Some(Ok(page)) => Ok(page),
                Some(Err(status)) => Err(exhausted("me/threads", status)),
                None => Ok(Page {
                    items: Vec::new(),
                    next: None,
                }),
            }
        }

        async fn fetch_replies(&self, post_id: &str) -> Result<Vec<Reply>, ApiError> {
            self.reply_calls.lock().unwrap().push(post_id.to_string());
            match self.replies.get(post_id) {
                Some(Ok(replies)) => Ok(replies.clone()),
                Some(Err(status)) => Err(exhausted("conversation", *status)),
                None => Ok(Vec::new()),
            }
        }

        async fn refresh_token(&self, _current: &str) -> Result<RefreshedToken, ApiError> {
            Ok(RefreshedToken::default())
        }
    }

    fn posts(prefix: &str, n: usize, first_ts: i64) -> Vec<Post> {
        (0..n)
            .map(|i| {
                let ts = timestamp::format_api_timestamp(first_ts + i as i64).unwrap();
                Post::new(format!("{}{}", prefix, i), ts)
            })
            .collect()
    }

    fn page(items: Vec<Post>, more: bool) -> Result<Page<Post>, u16> {
        Ok(Page {
            items,
            next: more.then(|| "https://graph.threads.net/v1.0/me/threads?after=x".to_string()),
        })
    }

    fn manager(api: ScriptedApi) -> SyncManager<ScriptedApi> {
        SyncManager::new(api, ThreadsDb::open_in_memory().unwrap(), None)
    }

    #[tokio::test]
    async fn test_incremental_uses_watermark_plus_one() {
        let sync = manager(ScriptedApi::default());
        sync.db()
            .insert_posts(&[
                Post::new("a", timestamp::format_api_timestamp(100).unwrap()),
                Post::new("b", timestamp::format_api_timestamp(200).unwrap()),
            ])
            .unwrap();

        let outcome = sync.incremental_sync(false).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.count, 0);
        assert_eq!(
            sync.api().cursors()[0],
            PageCursor::Start {
                since: Some(201),
                until: None
            }
        );
    }

    #[tokio::test]
    async fn test_incremental_on_empty_store_has_no_since() {
        let sync = manager(ScriptedApi::with_pages(vec![page(posts("p", 3, 1_000), false)]));

        let outcome = sync.incremental_sync(false).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.count, 3);
        assert_eq!(
            sync.api().cursors()[0],
            PageCursor::Start {
                since: None,
                until: None
            }
        );
    }

    #[tokio::test]
    async fn test_incremental_stops_at_empty_page() {
        let sync = manager(ScriptedApi::with_pages(vec![
            page(posts("a", 2, 1_000), true),
            page(Vec::new(), true),
            page(posts("c", 2, 2_000), false),
        ]));

        let outcome = sync.incremental_sync(false).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.count, 2);
        assert_eq!(sync.api().cursors().len(), 2);
        assert_eq!(sync.db().stats().unwrap().posts, 2);
    }

    #[tokio::test]
    async fn test_full_history_keeps_pages_before_failure() {
        let sync = manager(ScriptedApi::with_pages(vec![
            page(posts("a", 50, 1_000), true),
            page(posts("b", 10, 2_000), true),
            Err(500),
        ]));

        let outcome = sync.initial_sync(false).await.unwrap();

        assert_eq!(outcome.mode, SyncMode::FullHistory);
        assert!(!outcome.success);
        assert_eq!(outcome.count, 60);
        assert_eq!(sync.db().stats().unwrap().posts, 60);

        let log = sync.db().recent_sync_logs(1).unwrap();
        assert_eq!(log[0].count, 60);
        assert!(log[0].initial);
        assert!(!log[0].success);
    }

    #[tokio::test]
    async fn test_full_history_skips_empty_pages() {
        let sync = manager(ScriptedApi::with_pages(vec![
            page(posts("a", 2, 1_000), true),
            page(Vec::new(), true),
            page(posts("c", 3, 2_000), false),
        ]));

        let outcome = sync.initial_sync(false).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.count, 5);
        assert_eq!(sync.api().cursors().len(), 3);
    }

    #[tokio::test]
    async fn test_time_range_failure_stores_nothing() {
        let sync = manager(ScriptedApi::with_pages(vec![
            page(posts("a", 50, 1_000), true),
            Err(503),
        ]));

        let outcome = sync.sync_time_range(Some(1_000), Some(5_000), false).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.count, 0);
        assert_eq!(sync.db().stats().unwrap().posts, 0);

        let log = sync.db().recent_sync_logs(1).unwrap();
        assert_eq!(log[0].count, 0);
        assert!(!log[0].initial);
    }

    #[tokio::test]
    async fn test_time_range_passes_bounds() {
        let sync = manager(ScriptedApi::with_pages(vec![page(posts("a", 4, 1_000), false)]));

        let outcome = sync.sync_time_range(Some(1_000), Some(5_000), false).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.count, 4);
        assert_eq!(
            sync.api().cursors()[0],
            PageCursor::Start {
                since: Some(1_000),
                until: Some(5_000)
            }
        );
    }

    #[tokio::test]
    async fn test_replies_failure_for_one_post_is_not_fatal() {
        let mut api = ScriptedApi::default();
        api.replies.insert(
            "A".to_string(),
            Ok(vec![Reply::new("a1", "one"), Reply::new("a2", "two")]),
        );
        api.replies.insert("B".to_string(), Err(500));
        api.replies
            .insert("C".to_string(), Ok(vec![Reply::new("c1", "three")]));

        let sync = manager(api);
        sync.db()
            .insert_posts(&[
                Post::new("A", "2024-01-01T00:00:00+0000"),
                Post::new("B", "2024-01-02T00:00:00+0000"),
                Post::new("C", "2024-01-03T00:00:00+0000"),
            ])
            .unwrap();

        let outcome = sync.sync_replies().await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.count, 3);
        assert!(sync.db().get_posts_without_replies().unwrap().is_empty());
        for id in ["A", "B", "C"] {
            assert!(sync.db().get_post(id).unwrap().unwrap().replies_fetched);
        }
        assert_eq!(sync.db().stats().unwrap().replies, 3);
    }

    #[tokio::test]
    async fn test_replies_fails_when_pending_posts_cannot_be_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("threads.db");
        let mut api = MockThreadsApi::new();
        api.expect_fetch_replies().never();

        let sync = SyncManager::new(api, ThreadsDb::open_at(&path).unwrap(), None);
        sync.db()
            .insert_post(&Post::new("A", "2024-01-01T00:00:00+0000"))
            .unwrap();

        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE posts")
            .unwrap();

        let outcome = sync.sync_replies().await.unwrap();

        assert_eq!(outcome.mode, SyncMode::Replies);
        assert!(!outcome.success);
        assert_eq!(outcome.count, 0);

        let logs = sync.db().recent_sync_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
        assert_eq!(logs[0].count, 0);
        assert!(!logs[0].initial);
    }

    #[tokio::test]
    async fn test_replies_skip_reposts() {
        let sync = manager(ScriptedApi::default());
        let mut repost = Post::new("R", "2024-01-01T00:00:00+0000");
        repost.media_type = Some(MediaType::RepostFacade);
        sync.db()
            .insert_posts(&[repost, Post::new("P", "2024-01-02T00:00:00+0000")])
            .unwrap();

        sync.sync_replies().await.unwrap();

        assert_eq!(*sync.api().reply_calls.lock().unwrap(), vec!["P".to_string()]);
        assert!(!sync.db().get_post("R").unwrap().unwrap().replies_fetched);
    }

    #[tokio::test]
    async fn test_backup_written_for_fetched_posts() {
        let temp_dir = TempDir::new().unwrap();
        let api = ScriptedApi::with_pages(vec![page(posts("a", 2, 1_000), false)]);
        let sync = SyncManager::new(
            api,
            ThreadsDb::open_in_memory().unwrap(),
            Some(JsonBackup::new(temp_dir.path())),
        );

        sync.initial_sync(true).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("threads_post_backup_"));
    }

    #[tokio::test]
    async fn test_no_backup_when_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let api = ScriptedApi::with_pages(vec![page(posts("a", 2, 1_000), false)]);
        let sync = SyncManager::new(
            api,
            ThreadsDb::open_in_memory().unwrap(),
            Some(JsonBackup::new(temp_dir.path())),
        );

        sync.incremental_sync(false).await.unwrap();

        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_every_mode_logs_a_run() {
        let mut api = MockThreadsApi::new();
        api.expect_fetch_post_page().returning(|_| {
            Ok(Page {
                items: Vec::new(),
                next: None,
            })
        });
        api.expect_fetch_replies().never();

        let sync = SyncManager::new(api, ThreadsDb::open_in_memory().unwrap(), None);
        sync.initial_sync(false).await.unwrap();
        sync.incremental_sync(false).await.unwrap();
        sync.sync_time_range(None, None, false).await.unwrap();
        sync.sync_replies().await.unwrap();

        let logs = sync.db().recent_sync_logs(10).unwrap();
        assert_eq!(logs.len(), 4);
        assert_eq!(logs.iter().filter(|l| l.initial).count(), 1);
        assert!(logs.iter().all(|l| l.success && l.count == 0));
    }
}
