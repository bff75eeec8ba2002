//! Access token file and refresh bookkeeping
//!
//! The token file is plain JSON: `{"access_token": "...", "expires_at": 1735689600}`.
//! It is passed around as a value; whoever decides to refresh is responsible
//! for writing the result back with [`TokenConfig::save`].

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::api::ThreadsApi;

/// Contents of the token file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub access_token: Option<String>,

    /// Expiry as Unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// Unrelated keys are preserved when the file is rewritten
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenConfig {
    pub fn new(access_token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            access_token: Some(access_token.into()),
            expires_at: Some(expires_at),
            extra: Map::new(),
        }
    }

    /// Load the token file; a missing file is an error
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Token file {} not found", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read token file: {:?}", path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token file: {:?}", path))
    }

    /// Rewrite the token file in place
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create token directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize token file")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write token file: {:?}", path))?;

        debug!("Token file written to {}", path.display());
        Ok(())
    }

    /// The access token, which must be present and non-empty
    pub fn access_token(&self) -> Result<&str> {
        match self.access_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(anyhow!("access_token not found in token file")),
        }
    }

    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Time left before expiry (negative once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at_datetime().map(|expires| expires - now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now)
            .map(|left| left <= Duration::zero())
            .unwrap_or(true)
    }

    /// True when fewer than `threshold_days` remain, or the expiry is unknown
    ///
    /// A threshold too large to represent counts as always near expiry.
    pub fn is_near_expiry(&self, threshold_days: i64, now: DateTime<Utc>) -> bool {
        let Some(threshold) = Duration::try_days(threshold_days) else {
            return true;
        };
        self.remaining(now)
            .map(|left| left < threshold)
            .unwrap_or(true)
    }

    /// Copy with a new token valid for `expires_in` seconds from `now`
    pub fn refreshed(
        &self,
        access_token: String,
        expires_in: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let expires_at = now
            .timestamp()
            .checked_add(expires_in)
            .ok_or_else(|| anyhow!("Token lifetime of {}s is out of range", expires_in))?;

        Ok(Self {
            access_token: Some(access_token),
            expires_at: Some(expires_at),
            extra: self.extra.clone(),
        })
    }
}

/// Refresh the token unconditionally
pub async fn refresh_now<A: ThreadsApi + ?Sized>(
    api: &A,
    config: &TokenConfig,
    now: DateTime<Utc>,
) -> Result<TokenConfig> {
    let current = config.access_token()?;
    let response = api
        .refresh_token(current)
        .await
        .context("Token refresh request failed")?;

    match (response.access_token, response.expires_in) {
        (Some(token), Some(expires_in)) if !token.is_empty() && expires_in > 0 => {
            let updated = config.refreshed(token, expires_in, now)?;
            if let Some(expires) = updated.expires_at_datetime() {
                info!("Token refreshed, valid until {}", expires.to_rfc3339());
            }
            Ok(updated)
        }
        _ => bail!("Token refresh response was incomplete; token not updated"),
    }
}

/// Refresh when the token is within `threshold_days` of expiry
///
/// Returns the new token file contents when a refresh happened, `None` when the
/// current token is still fresh.
pub async fn refresh_if_needed<A: ThreadsApi + ?Sized>(
    api: &A,
    config: &TokenConfig,
    threshold_days: i64,
    now: DateTime<Utc>,
) -> Result<Option<TokenConfig>> {
    if !config.is_near_expiry(threshold_days, now) {
        if let Some(expires) = config.expires_at_datetime() {
            info!(
                "Token not near expiry, no refresh needed (expires {})",
                expires.to_rfc3339()
            );
        }
        return Ok(None);
    }

    info!("Token expires within {} days, refreshing", threshold_days);
    refresh_now(api, config, now).await.map(Some)
}
