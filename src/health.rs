//! Preflight checks for threadsync
//!
//! `threadsync doctor` runs these to verify the token file, the archive and
//! the output directory before a sync is attempted. No network calls are made.

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::db::ThreadsDb;
use crate::token::TokenConfig;
use crate::Config;

/// Result of all preflight checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Token file presence and contents
    pub token_file: CheckResult,
    /// Token lifetime
    pub token_expiry: CheckResult,
    /// Archive database (warning when not created yet)
    pub database: CheckResult,
    /// Backup and export directory (warning when not created yet)
    pub output_dir: CheckResult,
}

/// Result of an individual check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::ok(message)
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all checks against `config` as of `now`
    pub fn run(config: &Config, now: DateTime<Utc>) -> Self {
        let token = TokenConfig::load(&config.token_file_path());

        Self {
            token_file: Self::check_token_file(&config.token_file_path(), &token),
            token_expiry: Self::check_token_expiry(
                token.as_ref().ok(),
                config.token.refresh_threshold_days,
                now,
            ),
            database: Self::check_database(&config.database_path()),
            output_dir: Self::check_output_dir(&config.output_dir()),
        }
    }

    /// True when no check failed (warnings allowed)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, r)| r.passed)
    }

    /// Failed checks, warnings excluded
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_token_file(path: &Path, token: &anyhow::Result<TokenConfig>) -> CheckResult {
        match token {
            Ok(token) => match token.access_token() {
                Ok(_) => CheckResult::ok_with_details("Token file found", path.display().to_string()),
                Err(e) => CheckResult::error_with_details(
                    "Token file has no access token",
                    format!("{}: {}", path.display(), e),
                ),
            },
            Err(_) if !path.exists() => CheckResult::error_with_details(
                "Token file not found",
                format!(
                    "Create {} containing {{\"access_token\": \"...\", \"expires_at\": <unix seconds>}}",
                    path.display()
                ),
            ),
            Err(e) => CheckResult::error_with_details("Token file unreadable", format!("{:#}", e)),
        }
    }

    fn check_token_expiry(
        token: Option<&TokenConfig>,
        threshold_days: i64,
        now: DateTime<Utc>,
    ) -> CheckResult {
        let Some(token) = token else {
            return CheckResult::error_with_details(
                "Token expiry unknown",
                "Fix the token file first",
            );
        };

        let Some(remaining) = token.remaining(now) else {
            return CheckResult::warning_with_details(
                "Token expiry not recorded",
                "The next sync will refresh the token and record its expiry",
            );
        };

        if token.is_expired(now) {
            CheckResult::error_with_details(
                "Token expired",
                "Generate a new long-lived token; expired tokens cannot be refreshed",
            )
        } else if token.is_near_expiry(threshold_days, now) {
            CheckResult::warning_with_details(
                format!("Token expires in {} days", remaining.num_days()),
                "Run: threadsync token refresh",
            )
        } else {
            CheckResult::ok_with_details(
                "Token valid",
                format!("{} days remaining", remaining.num_days()),
            )
        }
    }

    fn check_database(path: &Path) -> CheckResult {
        if !path.exists() {
            return CheckResult::warning_with_details(
                "Database not created yet",
                format!("{} will be created on first sync", path.display()),
            );
        }

        match ThreadsDb::open_at(path).and_then(|db| db.stats()) {
            Ok(stats) => CheckResult::ok_with_details(
                "Database readable",
                format!(
                    "{} posts, {} replies, {} sync runs",
                    stats.posts, stats.replies, stats.sync_runs
                ),
            ),
            Err(e) => CheckResult::error_with_details("Database unreadable", format!("{:#}", e)),
        }
    }

    fn check_output_dir(path: &Path) -> CheckResult {
        if path.is_dir() {
            CheckResult::ok_with_details("Output directory exists", path.display().to_string())
        } else if path.exists() {
            CheckResult::error_with_details(
                "Output path is not a directory",
                path.display().to_string(),
            )
        } else {
            CheckResult::warning_with_details(
                "Output directory does not exist",
                format!("{} will be created on first backup or export", path.display()),
            )
        }
    }

    /// All checks with display names
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Token File", &self.token_file),
            ("Token Expiry", &self.token_expiry),
            ("Database", &self.database),
            ("Output Directory", &self.output_dir),
        ]
    }
}
