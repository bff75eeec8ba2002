//! Common test utilities and helpers for threadsync tests
#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use threadsync::api::RetryPolicy;
use threadsync::config::{ApiConfig, Config, RetryConfig};
use threadsync::timestamp;
use threadsync::ThreadsClient;

pub const TEST_TOKEN: &str = "test-token";

/// Isolated directory holding config, token file, database and output
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn database_path(&self) -> PathBuf {
        self.path("threads.db")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path("output")
    }

    pub fn token_path(&self) -> PathBuf {
        self.path("token.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path("config.yml")
    }

    /// Settings pointing at `base_url` with zero retry delays
    pub fn config(&self, base_url: &str) -> Config {
        Config {
            database_path: self.database_path().to_string_lossy().to_string(),
            output_dir: self.output_dir().to_string_lossy().to_string(),
            token_file: self.token_path().to_string_lossy().to_string(),
            api: ApiConfig {
                base_url: base_url.to_string(),
                refresh_url: format!("{}/refresh_access_token", base_url),
                posts_retry: RetryConfig {
                    max_retries: 3,
                    delay_secs: 0,
                },
                replies_retry: RetryConfig {
                    max_retries: 5,
                    delay_secs: 0,
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn write_config(&self, base_url: &str) -> PathBuf {
        let path = self.config_path();
        self.config(base_url)
            .save(&path)
            .expect("Failed to write test config");
        path
    }

    pub fn write_token(&self, access_token: &str, expires_at: i64) -> PathBuf {
        let path = self.token_path();
        let content = json!({ "access_token": access_token, "expires_at": expires_at });
        std::fs::write(&path, content.to_string()).expect("Failed to write token file");
        path
    }

    /// A token good for another 60 days
    pub fn write_fresh_token(&self) -> PathBuf {
        self.write_token(TEST_TOKEN, chrono::Utc::now().timestamp() + 60 * 86_400)
    }
}

/// Client against a mock server, no retry delay
pub fn test_client(base_url: &str) -> ThreadsClient {
    let config = ApiConfig {
        base_url: base_url.to_string(),
        refresh_url: format!("{}/refresh_access_token", base_url),
        ..Default::default()
    };

    ThreadsClient::new(&config, TEST_TOKEN)
        .expect("Failed to build client")
        .with_retry_policies(
            RetryPolicy::new(3, Duration::ZERO),
            RetryPolicy::new(5, Duration::ZERO),
        )
}

/// Post payload as returned by the API
pub fn post_json(id: &str, unix: i64) -> Value {
    json!({
        "id": id,
        "media_type": "TEXT_POST",
        "text": format!("post {}", id),
        "permalink": format!("https://www.threads.net/@me/post/{}", id),
        "timestamp": timestamp::format_api_timestamp(unix).expect("valid timestamp"),
        "is_quote_post": false
    })
}

/// `count` consecutive posts starting at `first_unix`
pub fn posts_json(prefix: &str, count: usize, first_unix: i64) -> Vec<Value> {
    (0..count)
        .map(|i| post_json(&format!("{}{}", prefix, i), first_unix + i as i64))
        .collect()
}

pub fn reply_json(id: &str, post_id: &str) -> Value {
    json!({
        "id": id,
        "text": format!("reply {}", id),
        "username": "someone",
        "timestamp": "2024-07-01T12:00:00+0000",
        "media_type": "TEXT_POST",
        "has_replies": false,
        "root_post": { "id": post_id },
        "replied_to": { "id": post_id },
        "is_reply": true,
        "is_reply_owned_by_me": false,
        "hide_status": "NOT_HUSHED"
    })
}

/// A page body, with a `paging.next` link when `next` is given
pub fn page_json(items: Vec<Value>, next: Option<String>) -> Value {
    match next {
        Some(next) => json!({ "data": items, "paging": { "next": next } }),
        None => json!({ "data": items }),
    }
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
