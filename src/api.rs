//! Threads Graph API client
//!
//! All calls are authenticated with an `access_token` query parameter. Post
//! listing is cursor-paginated: each response may carry `paging.next`, a
//! fully-formed URL for the following page. HTTP status failures are retried
//! with a fixed delay up to a ceiling; transport and decode failures are not.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, RetryConfig};
use crate::models::{Post, Reply};

/// Fields requested for each post
pub const POST_FIELDS: &str =
    "id,media_type,text,media_url,thumbnail_url,permalink,children,timestamp,is_quote_post";

/// Fields requested for each reply in a conversation
pub const REPLY_FIELDS: &str = "id,text,username,permalink,timestamp,media_type,media_url,shortcode,thumbnail_url,children,has_replies,root_post,replied_to,is_reply,is_reply_owned_by_me,hide_status";

/// Errors raised by the API client
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-success HTTP status; the only retryable failure
    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("{endpoint} still failing after {attempts} attempts (last status {last_status})")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        last_status: u16,
    },

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response body from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ApiError {
    /// Whether the failure is worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Status { .. })
    }

    /// HTTP status behind the failure, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::RetriesExhausted { last_status, .. } => Some(*last_status),
            _ => None,
        }
    }
}

/// Fixed-delay retry ceiling for one kind of request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config.max_retries, config.delay())
    }
}

/// Where the next page of posts comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// First page, optionally bounded by Unix-second `since`/`until`
    Start {
        since: Option<i64>,
        until: Option<i64>,
    },
    /// A `paging.next` URL returned by the previous page
    Next(String),
}

/// One page of results plus the link to the following page, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Response of the token refresh endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RefreshedToken {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Operations the sync modes need from the Threads API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ThreadsApi: Send + Sync {
    /// Fetch one page of the account's posts
    async fn fetch_post_page(&self, cursor: &PageCursor) -> Result<Page<Post>, ApiError>;

    /// Fetch the conversation of a single post (not paginated)
    async fn fetch_replies(&self, post_id: &str) -> Result<Vec<Reply>, ApiError>;

    /// Exchange a long-lived token for a fresh one (no retry)
    async fn refresh_token(&self, current_token: &str) -> Result<RefreshedToken, ApiError>;
}

/// Lazily walks the paginated post listing
///
/// Each call to [`PostPager::next_page`] performs at most one fetch, so the
/// caller can persist a page before the next network call. A failed fetch ends
/// the sequence.
pub struct PostPager<'a, A: ThreadsApi + ?Sized> {
    api: &'a A,
    cursor: Option<PageCursor>,
    pages_fetched: usize,
}

impl<'a, A: ThreadsApi + ?Sized> PostPager<'a, A> {
    pub fn new(api: &'a A, since: Option<i64>, until: Option<i64>) -> Self {
        Self {
            api,
            cursor: Some(PageCursor::Start { since, until }),
            pages_fetched: 0,
        }
    }

    /// Fetch the next page; `Ok(None)` once the listing is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<Post>>, ApiError> {
        let Some(cursor) = self.cursor.take() else {
            return Ok(None);
        };

        let page = self.api.fetch_post_page(&cursor).await?;
        self.pages_fetched += 1;
        self.cursor = page.next.map(PageCursor::Next);

        Ok(Some(page.items))
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

/// Paginated listing of the account's posts, newer than `since` when given
pub fn fetch_posts_paginated<A: ThreadsApi + ?Sized>(
    api: &A,
    since: Option<i64>,
) -> PostPager<'_, A> {
    PostPager::new(api, since, None)
}

/// Eagerly collect every post between `since` and `until`
pub async fn fetch_posts_by_range<A: ThreadsApi + ?Sized>(
    api: &A,
    since: Option<i64>,
    until: Option<i64>,
) -> Result<Vec<Post>, ApiError> {
    let mut pager = PostPager::new(api, since, until);
    let mut posts = Vec::new();

    while let Some(page) = pager.next_page().await? {
        posts.extend(page);
    }

    debug!(
        "Collected {} posts over {} pages",
        posts.len(),
        pager.pages_fetched()
    );
    Ok(posts)
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

/// HTTP implementation of [`ThreadsApi`]
#[derive(Clone)]
pub struct ThreadsClient {
    http: Client,
    base_url: String,
    refresh_url: String,
    access_token: String,
    page_limit: u32,
    posts_retry: RetryPolicy,
    replies_retry: RetryPolicy,
}

impl ThreadsClient {
    /// Create a client from API settings and an access token
    pub fn new(config: &ApiConfig, access_token: impl Into<String>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .user_agent(concat!("threadsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            refresh_url: config.refresh_url.clone(),
            access_token: access_token.into(),
            page_limit: config.page_limit,
            posts_retry: config.posts_retry.into(),
            replies_retry: config.replies_retry.into(),
        })
    }

    /// Same client, authenticated with a different token
    pub fn with_token(&self, access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..self.clone()
        }
    }

    /// Override the retry policies (tests use short delays)
    pub fn with_retry_policies(mut self, posts: RetryPolicy, replies: RetryPolicy) -> Self {
        self.posts_retry = posts;
        self.replies_retry = replies;
        self
    }

    fn parse_url(raw: &str, params: &[(&str, String)]) -> Result<Url, ApiError> {
        Url::parse_with_params(raw, params).map_err(|e| ApiError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })
    }

    fn posts_url(&self, since: Option<i64>, until: Option<i64>) -> Result<Url, ApiError> {
        let mut params = vec![
            ("limit", self.page_limit.to_string()),
            ("fields", POST_FIELDS.to_string()),
            ("access_token", self.access_token.clone()),
        ];
        if let Some(since) = since {
            params.push(("since", since.to_string()));
        }
        if let Some(until) = until {
            params.push(("until", until.to_string()));
        }

        Self::parse_url(&format!("{}/me/threads", self.base_url), &params)
    }

    fn conversation_url(&self, post_id: &str) -> Result<Url, ApiError> {
        Self::parse_url(
            &format!("{}/{}/conversation", self.base_url, post_id),
            &[
                ("reverse", "false".to_string()),
                ("fields", REPLY_FIELDS.to_string()),
                ("access_token", self.access_token.clone()),
            ],
        )
    }

    /// Single GET, decoding the JSON body
    async fn get_json<T: DeserializeOwned>(&self, url: &Url, endpoint: &str) -> Result<T, ApiError> {
        debug!("GET {}", redact(url));

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// GET with fixed-delay retries on HTTP status failures
    async fn get_json_with_retry<T: DeserializeOwned>(
        &self,
        url: &Url,
        endpoint: &str,
        policy: RetryPolicy,
    ) -> Result<T, ApiError> {
        let max_attempts = policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match self.get_json(url, endpoint).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    warn!("{}, attempt {}/{}", e, attempt, max_attempts);

                    if attempt >= max_attempts {
                        return Err(ApiError::RetriesExhausted {
                            endpoint: endpoint.to_string(),
                            attempts: attempt,
                            last_status: e.status().unwrap_or_default(),
                        });
                    }

                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ThreadsApi for ThreadsClient {
    async fn fetch_post_page(&self, cursor: &PageCursor) -> Result<Page<Post>, ApiError> {
        let url = match cursor {
            PageCursor::Start { since, until } => self.posts_url(*since, *until)?,
            PageCursor::Next(next) => Url::parse(next).map_err(|e| ApiError::InvalidUrl {
                url: next.clone(),
                reason: e.to_string(),
            })?,
        };

        let envelope: Envelope<Post> = self
            .get_json_with_retry(&url, "me/threads", self.posts_retry)
            .await?;

        debug!("Received {} posts", envelope.data.len());
        Ok(Page {
            items: envelope.data,
            next: envelope.paging.and_then(|paging| paging.next),
        })
    }

    async fn fetch_replies(&self, post_id: &str) -> Result<Vec<Reply>, ApiError> {
        let url = self.conversation_url(post_id)?;
        let endpoint = format!("{}/conversation", post_id);

        let envelope: Envelope<Reply> = self
            .get_json_with_retry(&url, &endpoint, self.replies_retry)
            .await?;

        Ok(envelope.data)
    }

    async fn refresh_token(&self, current_token: &str) -> Result<RefreshedToken, ApiError> {
        let url = Self::parse_url(
            &self.refresh_url,
            &[
                ("grant_type", "th_refresh_token".to_string()),
                ("access_token", current_token.to_string()),
            ],
        )?;

        info!("Refreshing long-lived access token");
        self.get_json(&url, "refresh_access_token").await
    }
}

/// Render a URL for logs with the access token masked
pub fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "access_token" {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    if pairs.is_empty() {
        return redacted.to_string();
    }

    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
