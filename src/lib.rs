//! threadsync - Archive Threads posts and replies into SQLite
//!
//! threadsync pulls the authenticated account's posts and their conversations
//! from the Threads Graph API and keeps them in a local SQLite archive, with
//! JSON backups and CSV exports on the side.
//!
//! ## Core Features
//!
//! - **Sync Modes**: full history, incremental (watermarked), time range, replies
//! - **Retrying Client**: fixed-delay retries on HTTP failures
//! - **Idempotent Archive**: first write wins; re-syncing never duplicates rows
//! - **Token Upkeep**: long-lived token refresh before it expires
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`api`]: Threads API client and pagination
//! - [`db`]: SQLite archive
//! - [`sync`]: sync mode orchestration
//! - [`token`]: token file and refresh bookkeeping
//! - [`config`]: configuration management and parsing

pub mod api;
pub mod backup;
pub mod config;
pub mod db;
pub mod health;
pub mod models;
pub mod sync;
pub mod timestamp;
pub mod token;

pub use api::{ApiError, ThreadsApi, ThreadsClient};
pub use backup::JsonBackup;
pub use config::Config;
pub use db::{SyncLogEntry, ThreadsDb};
pub use health::HealthCheck;
pub use models::{MediaType, Post, Reply};
pub use sync::{SyncManager, SyncMode, SyncOutcome};
pub use token::TokenConfig;
