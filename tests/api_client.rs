//! HTTP-level tests for the Threads client against a mock server

mod common;

use assert_matches::assert_matches;
use common::*;
use threadsync::api::{self, ApiError, PageCursor, ThreadsApi};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pagination_follows_next_link() {
    let server = MockServer::start().await;
    let next = format!("{}/me/threads?after=page2&access_token={}", server.uri(), TEST_TOKEN);

    // Mounted first so it wins over the catch-all first page
    Mock::given(method("GET"))
        .and(path("/me/threads"))
        .and(query_param("after", "page2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(page_json(posts_json("b", 2, 2_000), None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/me/threads"))
        .and(query_param("access_token", TEST_TOKEN))
        .and(query_param("limit", "50"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_json(posts_json("a", 3, 1_000), Some(next))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let posts = api::fetch_posts_by_range(&client, None, None).await.unwrap();

    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["a0", "a1", "a2", "b0", "b1"]);
}

#[tokio::test]
async fn test_since_and_until_sent_as_unix_seconds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me/threads"))
        .and(query_param("since", "1688601600"))
        .and(query_param("until", "1719792000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(Vec::new(), None)))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let posts = api::fetch_posts_by_range(&client, Some(1_688_601_600), Some(1_719_792_000))
        .await
        .unwrap();
    assert!(posts.is_empty());
}

#[tokio::test]
async fn test_retries_exhausted_after_ceiling() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me/threads"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = api::fetch_posts_by_range(&client, None, None)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ApiError::RetriesExhausted {
            attempts: 3,
            last_status: 500,
            ..
        }
    );
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/17890/conversation"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/17890/conversation"))
        .and(query_param("reverse", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(
            vec![reply_json("r1", "17890"), reply_json("r2", "17890")],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let replies = client.fetch_replies("17890").await.unwrap();

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].root_post.as_ref().unwrap().id, "17890");
    assert!(replies[0].is_reply);
}

#[tokio::test]
async fn test_undecodable_body_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me/threads"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch_post_page(&PageCursor::Start {
            since: None,
            until: None,
        })
        .await
        .unwrap_err();

    assert_matches!(err, ApiError::Decode { .. });
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_refresh_token_single_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/refresh_access_token"))
        .and(query_param("grant_type", "th_refresh_token"))
        .and(query_param("access_token", "old-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-token",
            "token_type": "bearer",
            "expires_in": 5_184_000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let refreshed = client.refresh_token("old-token").await.unwrap();

    assert_eq!(refreshed.access_token.as_deref(), Some("new-token"));
    assert_eq!(refreshed.expires_in, Some(5_184_000));
}

#[tokio::test]
async fn test_refresh_failure_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/refresh_access_token"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client.refresh_token("old-token").await.unwrap_err();

    assert_matches!(err, ApiError::Status { status: 400, .. });
}
