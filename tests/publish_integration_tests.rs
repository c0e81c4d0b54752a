//! End-to-end publishing tests against mocked platform APIs.
//!
//! Every test runs the real router over in-memory SQLite; platform HTTP calls
//! go to a wiremock server and poll sleeps return immediately.

use std::sync::Arc;

use publisher::repositories::{ConnectionRepository, PublishedVideoRepository};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    insert_connection, session_token, setup_test_db, spawn_test_app, test_config, test_state,
    tokens,
};

const IG_ACCOUNT: &str = "17841400000000001";

fn instagram_metadata() -> Value {
    json!({
        "account_type": "business",
        "instagram_business_account_id": IG_ACCOUNT,
        "page_id": "page-1",
    })
}

async fn post_json(url: &str, token: &str, body: Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

fn form_field(body: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

async fn mount_instagram_container(mock: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{IG_ACCOUNT}/media")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "container-1" })))
        .mount(mock)
        .await;
}

#[tokio::test]
async fn test_instagram_publish_completes_on_third_status_check() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, sleeper) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "instagram",
        Some(&tokens("ig-access", None, Some(86_400))),
        Some("creator"),
        instagram_metadata(),
    )
    .await
    .unwrap();

    let video = PublishedVideoRepository::new(db.clone())
        .create(
            user_id,
            Some("Launch".to_string()),
            "https://cdn.example.com/v.mp4",
            &["instagram".to_string()],
        )
        .await
        .unwrap();

    mount_instagram_container(&mock).await;
    Mock::given(method("GET"))
        .and(path("/container-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status_code": "IN_PROGRESS" })))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/container-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status_code": "FINISHED" })))
        .with_priority(2)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{IG_ACCOUNT}/media_publish")))
        .and(body_string_contains("creation_id=container-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "media-9" })))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/media-9"))
        .and(query_param("fields", "permalink"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "permalink": "https://www.instagram.com/reel/abc/" })),
        )
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/instagram"),
        &session_token(user_id),
        json!({
            "video_url": "https://cdn.example.com/v.mp4",
            "caption": "Launch day",
            "hashtags": ["rust", "#video"],
            "published_video_id": video.id,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["platform"], "instagram");
    assert_eq!(body["platform_video_id"], "media-9");
    assert_eq!(body["platform_url"], "https://www.instagram.com/reel/abc/");
    assert_eq!(sleeper.count(), 3);

    let requests = mock.received_requests().await.unwrap();
    let container = requests
        .iter()
        .find(|r| r.url.path() == format!("/{IG_ACCOUNT}/media"))
        .unwrap();
    assert_eq!(
        form_field(&container.body, "caption").as_deref(),
        Some("Launch day\n\n#rust #video")
    );
    assert_eq!(form_field(&container.body, "media_type").as_deref(), Some("REELS"));
    assert!(form_field(&container.body, "appsecret_proof").is_some());

    let record = PublishedVideoRepository::new(db)
        .find_by_id(video.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.overall_status, "published");
    assert_eq!(record.platforms["instagram"]["platform_video_id"], "media-9");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publish_without_connection_fails_before_any_platform_call() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db);
    let (base, handle) = spawn_test_app(state).await;
    let token = session_token(Uuid::new_v4());

    for route in ["instagram", "tiktok", "tiktok/blotato", "youtube"] {
        let (status, body) = post_json(
            &format!("{base}/publish/{route}"),
            &token,
            json!({ "video_url": "https://cdn.example.com/v.mp4", "caption": "hi" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "{route}: {body}");
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "not_connected");
    }

    assert!(mock.received_requests().await.unwrap().is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnected_connection_counts_as_not_connected() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "instagram",
        Some(&tokens("ig-access", None, None)),
        None,
        instagram_metadata(),
    )
    .await
    .unwrap();
    assert!(
        ConnectionRepository::new(db.clone())
            .disconnect(user_id, "instagram")
            .await
            .unwrap()
    );

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/instagram"),
        &session_token(user_id),
        json!({ "video_url": "https://cdn.example.com/v.mp4", "caption": "hi" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "not_connected");
    assert!(mock.received_requests().await.unwrap().is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blotato_connection_rejected_by_direct_tiktok_publisher() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "tiktok",
        None,
        Some("dancer"),
        json!({ "method": "blotato", "blotato_account_id": "acc-1" }),
    )
    .await
    .unwrap();

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/tiktok"),
        &session_token(user_id),
        json!({ "video_url": "https://cdn.example.com/v.mp4", "caption": "hi" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "wrong_publish_method");
    assert_eq!(body["details"]["method"], "tiktok");
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .to_lowercase()
            .contains("wrong publish method")
    );
    assert!(mock.received_requests().await.unwrap().is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_personal_instagram_account_is_rejected() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "instagram",
        Some(&tokens("ig-access", None, None)),
        None,
        json!({ "account_type": "personal" }),
    )
    .await
    .unwrap();

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/instagram"),
        &session_token(user_id),
        json!({ "video_url": "https://cdn.example.com/v.mp4", "caption": "hi" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "wrong_account_type");
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_caption_over_limit_is_truncated_to_exactly_the_limit() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "instagram",
        Some(&tokens("ig-access", None, None)),
        Some("creator"),
        instagram_metadata(),
    )
    .await
    .unwrap();

    mount_instagram_container(&mock).await;
    Mock::given(method("GET"))
        .and(path("/container-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status_code": "FINISHED" })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{IG_ACCOUNT}/media_publish")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "media-1" })))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/media-1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    // 2290 caption characters plus "\n\n#tag" is 2296 combined
    let caption = "é".repeat(2290);
    let (status, body) = post_json(
        &format!("{base}/publish/instagram"),
        &session_token(user_id),
        json!({
            "video_url": "https://cdn.example.com/v.mp4",
            "caption": caption,
            "hashtags": ["tag"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    // Permalink lookup failed, so the profile URL is used
    assert_eq!(body["platform_url"], "https://www.instagram.com/creator/");

    let requests = mock.received_requests().await.unwrap();
    let container = requests
        .iter()
        .find(|r| r.url.path() == format!("/{IG_ACCOUNT}/media"))
        .unwrap();
    let submitted = form_field(&container.body, "caption").unwrap();
    assert_eq!(submitted.chars().count(), 2200);
    assert_eq!(submitted, "é".repeat(2200));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_never_finishing_container_times_out_after_exact_budget() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, sleeper) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "instagram",
        Some(&tokens("ig-access", None, None)),
        Some("creator"),
        instagram_metadata(),
    )
    .await
    .unwrap();
    let videos = PublishedVideoRepository::new(db.clone());
    let video = videos
        .create(user_id, None, "https://cdn.example.com/v.mp4", &["instagram".to_string()])
        .await
        .unwrap();

    mount_instagram_container(&mock).await;
    Mock::given(method("GET"))
        .and(path("/container-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status_code": "IN_PROGRESS" })))
        .expect(60)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{IG_ACCOUNT}/media_publish")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "never" })))
        .expect(0)
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/instagram"),
        &session_token(user_id),
        json!({
            "video_url": "https://cdn.example.com/v.mp4",
            "caption": "slow",
            "published_video_id": video.id,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "processing_timeout");
    assert_eq!(sleeper.count(), 60);

    let record = videos.find_by_id(video.id).await.unwrap().unwrap();
    assert_eq!(record.overall_status, "failed");
    assert_eq!(record.platforms["instagram"]["status"], "failed");
    assert_eq!(record.platforms["instagram"]["retry_count"], 1);

    handle.shutdown().await.unwrap();
    mock.verify().await;
}

#[tokio::test]
async fn test_revoked_instagram_token_marks_connection_expired() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "instagram",
        Some(&tokens("ig-access", None, None)),
        Some("creator"),
        instagram_metadata(),
    )
    .await
    .unwrap();

    Mock::given(method("POST"))
        .and(path(format!("/{IG_ACCOUNT}/media")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Error validating access token: Session has expired",
                "type": "OAuthException",
                "code": 190
            }
        })))
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/instagram"),
        &session_token(user_id),
        json!({ "video_url": "https://cdn.example.com/v.mp4", "caption": "hi" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "not_connected");

    let connection = ConnectionRepository::new(db)
        .find_by_user_platform(user_id, "instagram")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connection.connection_status, "expired");
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tiktok_direct_publish_returns_post_url() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "tiktok",
        Some(&tokens("tt-access", Some("tt-refresh"), Some(86_400))),
        Some("dancer"),
        json!({ "method": "direct", "open_id": "open-1" }),
    )
    .await
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/post/publish/video/init/"))
        .and(header("authorization", "Bearer tt-access"))
        .and(body_string_contains("PULL_FROM_URL"))
        .and(body_string_contains("SELF_ONLY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "publish_id": "v_pub_1" },
            "error": { "code": "ok", "message": "" }
        })))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/post/publish/status/fetch/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "PROCESSING_DOWNLOAD" },
            "error": { "code": "ok", "message": "" }
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/post/publish/status/fetch/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "PUBLISH_COMPLETE", "publicaly_available_post_id": [7301234567890u64] },
            "error": { "code": "ok", "message": "" }
        })))
        .with_priority(2)
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/tiktok"),
        &session_token(user_id),
        json!({
            "video_url": "https://cdn.example.com/v.mp4",
            "caption": "dance",
            "privacy": "private",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["platform"], "tiktok");
    assert_eq!(body["platform_video_id"], "7301234567890");
    assert_eq!(
        body["platform_url"],
        "https://www.tiktok.com/@dancer/video/7301234567890"
    );
    handle.shutdown().await.unwrap();
    mock.verify().await;
}

#[tokio::test]
async fn test_tiktok_failed_status_is_an_upstream_rejection() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "tiktok",
        Some(&tokens("tt-access", None, None)),
        Some("dancer"),
        json!({ "method": "direct" }),
    )
    .await
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/post/publish/video/init/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "publish_id": "v_pub_2" },
            "error": { "code": "ok" }
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/post/publish/status/fetch/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "FAILED", "fail_reason": "video_pull_failed" },
            "error": { "code": "ok" }
        })))
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/tiktok"),
        &session_token(user_id),
        json!({ "video_url": "https://cdn.example.com/v.mp4", "caption": "dance" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "upstream_rejected");
    assert!(body["error"].as_str().unwrap().contains("video_pull_failed"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blotato_connect_then_publish() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db);
    let user_id = Uuid::new_v4();
    let token = session_token(user_id);

    Mock::given(method("POST"))
        .and(path("/blotato/v2/posts"))
        .and(header("blotato-api-key", "blt-key-1"))
        .and(body_string_contains("acc-42"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "postSubmissionId": "sub-1" })),
        )
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/blotato/v2/posts/sub-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "published",
            "publicUrl": "https://www.tiktok.com/@dancer/video/99"
        })))
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;

    let (status, body) = post_json(
        &format!("{base}/connections/tiktok/blotato"),
        &token,
        json!({ "api_key": "blt-key-1", "account_id": "acc-42", "username": "dancer" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["metadata"]["method"], "blotato");
    assert!(!body.to_string().contains("blt-key-1"));

    let (status, body) = post_json(
        &format!("{base}/publish/tiktok/blotato"),
        &token,
        json!({ "video_url": "https://cdn.example.com/v.mp4", "caption": "via blotato" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["platform"], "tiktok");
    assert_eq!(body["platform_video_id"], "sub-1");
    assert_eq!(body["platform_url"], "https://www.tiktok.com/@dancer/video/99");
    handle.shutdown().await.unwrap();
    mock.verify().await;
}

#[tokio::test]
async fn test_youtube_upload_refreshes_expiring_token_first() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    let original = insert_connection(
        &db,
        &state.credentials,
        user_id,
        "youtube",
        Some(&tokens("stale-access", Some("yt-refresh"), Some(30))),
        Some("My Channel"),
        json!({ "channel_id": "UC123" }),
    )
    .await
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/youtube/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=yt-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/clip.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(vec![0u8; 1024]),
        )
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/videos"))
        .and(query_param("uploadType", "resumable"))
        .and(header("authorization", "Bearer fresh-access"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("location", format!("{}/upload/session-1", mock.uri()).as_str()),
        )
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "yt-video-1",
            "status": { "uploadStatus": "uploaded" }
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/youtube"),
        &session_token(user_id),
        json!({
            "video_url": format!("{}/media/clip.mp4", mock.uri()),
            "caption": "First line title\nMore details",
            "hashtags": ["rust"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["platform"], "youtube");
    assert_eq!(body["platform_url"], "https://www.youtube.com/watch?v=yt-video-1");
    assert_eq!(body["status"], "uploaded");

    let requests = mock.received_requests().await.unwrap();
    let session = requests
        .iter()
        .find(|r| r.url.path() == "/upload/youtube/v3/videos")
        .unwrap();
    let metadata: Value = serde_json::from_slice(&session.body).unwrap();
    assert_eq!(metadata["snippet"]["title"], "First line title");
    assert_eq!(metadata["snippet"]["tags"], json!(["rust"]));

    let refreshed = ConnectionRepository::new(db)
        .find_by_id(original.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.version, original.version + 1);

    handle.shutdown().await.unwrap();
    mock.verify().await;
}

#[tokio::test]
async fn test_invalid_video_url_is_a_validation_error() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db);
    let (base, handle) = spawn_test_app(state).await;

    let (status, body) = post_json(
        &format!("{base}/publish/youtube"),
        &session_token(Uuid::new_v4()),
        json!({ "video_url": "not a url", "caption": "x" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_youtube_download_failure_marks_entry_failed() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "youtube",
        Some(&tokens("yt-access", Some("yt-refresh"), Some(86_400))),
        Some("My Channel"),
        json!({ "channel_id": "UC123" }),
    )
    .await
    .unwrap();
    let videos = PublishedVideoRepository::new(db.clone());
    let video_url = format!("{}/media/missing.mp4", mock.uri());
    let video = videos
        .create(user_id, None, &video_url, &["youtube".to_string()])
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/media/missing.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/videos"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/youtube"),
        &session_token(user_id),
        json!({
            "video_url": video_url,
            "caption": "gone",
            "published_video_id": video.id,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
    assert_eq!(body["error"], "video_url could not be downloaded (HTTP 404)");

    let record = videos.find_by_id(video.id).await.unwrap().unwrap();
    assert_eq!(record.overall_status, "failed");
    assert_eq!(record.platforms["youtube"]["status"], "failed");
    assert_eq!(record.platforms["youtube"]["retry_count"], 1);
    assert_eq!(
        record.platforms["youtube"]["error_message"],
        "video_url could not be downloaded (HTTP 404)"
    );

    handle.shutdown().await.unwrap();
    mock.verify().await;
}

#[tokio::test]
async fn test_blotato_missing_api_key_marks_entry_failed() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "tiktok",
        None,
        Some("dancer"),
        json!({ "method": "blotato", "blotato_account_id": "acc-42" }),
    )
    .await
    .unwrap();
    let videos = PublishedVideoRepository::new(db.clone());
    let video = videos
        .create(user_id, None, "https://cdn.example.com/v.mp4", &["tiktok".to_string()])
        .await
        .unwrap();

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/tiktok/blotato"),
        &session_token(user_id),
        json!({
            "video_url": "https://cdn.example.com/v.mp4",
            "caption": "no key",
            "published_video_id": video.id,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "not_connected");
    assert!(mock.received_requests().await.unwrap().is_empty());

    let record = videos.find_by_id(video.id).await.unwrap().unwrap();
    assert_eq!(record.overall_status, "failed");
    assert_eq!(record.platforms["tiktok"]["status"], "failed");
    assert_eq!(record.platforms["tiktok"]["retry_count"], 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_youtube_download_over_limit_is_refused() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let mut config = test_config(&mock.uri());
    config.video_download_max_bytes = 512;
    let (state, _) = test_state(config, db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "youtube",
        Some(&tokens("yt-access", None, Some(86_400))),
        None,
        json!({ "channel_id": "UC123" }),
    )
    .await
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/media/huge.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(vec![0u8; 4096]),
        )
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/videos"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/youtube"),
        &session_token(user_id),
        json!({ "video_url": format!("{}/media/huge.mp4", mock.uri()) }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
    assert_eq!(body["error"], "video_url exceeds the 512 byte download limit");

    handle.shutdown().await.unwrap();
    mock.verify().await;
}

#[tokio::test]
async fn test_youtube_refuses_private_video_host() {
    let mock = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let mut config = test_config(&mock.uri());
    config.allow_private_video_hosts = false;
    let (state, _) = test_state(config, db.clone());
    let db = Arc::new(db);
    let user_id = Uuid::new_v4();

    insert_connection(
        &db,
        &state.credentials,
        user_id,
        "youtube",
        Some(&tokens("yt-access", None, Some(86_400))),
        None,
        json!({ "channel_id": "UC123" }),
    )
    .await
    .unwrap();

    let (base, handle) = spawn_test_app(state).await;
    let (status, body) = post_json(
        &format!("{base}/publish/youtube"),
        &session_token(user_id),
        json!({ "video_url": format!("{}/admin/internal.mp4", mock.uri()) }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
    assert_eq!(body["error"], "video_url must point to a publicly reachable host");
    assert!(mock.received_requests().await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
}
