//! JSON backups of fetched posts

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::Post;

/// Writes pretty-printed JSON snapshots into an output directory
#[derive(Debug, Clone)]
pub struct JsonBackup {
    output_dir: PathBuf,
}

impl JsonBackup {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `threads_post_backup_YYYYMMDD.json` for the given day
    pub fn default_filename(date: NaiveDate) -> String {
        format!("threads_post_backup_{}.json", date.format("%Y%m%d"))
    }

    /// Write `posts` to `filename` (or today's default name), replacing any existing file
    ///
    /// Relative filenames are resolved against the output directory.
    pub fn backup_posts(&self, posts: &[Post], filename: Option<&Path>) -> Result<PathBuf> {
        let path = match filename {
            Some(name) if name.is_absolute() => name.to_path_buf(),
            Some(name) => self.output_dir.join(name),
            None => self
                .output_dir
                .join(Self::default_filename(Local::now().date_naive())),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create backup directory: {:?}", parent))?;
        }

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        posts
            .serialize(&mut serializer)
            .context("Failed to serialize posts for backup")?;

        std::fs::write(&path, buf)
            .with_context(|| format!("Failed to write backup file: {:?}", path))?;

        info!("Backed up {} posts to {}", posts.len(), path.display());
        Ok(path)
    }
}
