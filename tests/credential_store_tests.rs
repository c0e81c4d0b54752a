//! Credential store tests: encryption at rest, audit trail, secret endpoints
//! and master key misconfiguration.

use std::sync::Arc;

use publisher::credentials::{ClientContext, CredentialError, CredentialStore};
use publisher::crypto::MasterKey;
use publisher::repositories::{
    ConnectionRepository, ConnectionUpsert, CredentialAuditRepository, UserSecretRepository,
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    TEST_MASTER_KEY, insert_connection, session_token, setup_test_db_arc, spawn_test_app,
    test_config, test_state, tokens,
};

fn store(db: Arc<sea_orm::DatabaseConnection>, master_key: Option<&str>) -> CredentialStore {
    let mut config = test_config("http://unused.test");
    config.master_key = master_key.map(str::to_string);
    CredentialStore::new(db, &config)
}

fn browser() -> ClientContext {
    ClientContext {
        ip_address: Some("203.0.113.7".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
    }
}

#[tokio::test]
async fn test_secret_round_trips_and_is_encrypted_at_rest() {
    let db = setup_test_db_arc().await.unwrap();
    let credentials = store(db.clone(), Some(TEST_MASTER_KEY));
    let user_id = Uuid::new_v4();

    credentials
        .save_secret(user_id, "blotato", "blt_live_secret", &browser())
        .await
        .unwrap();

    let row = UserSecretRepository::new(db.clone())
        .find(user_id, "blotato")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.iv.len(), 12);
    assert!(!String::from_utf8_lossy(&row.ciphertext).contains("blt_live_secret"));

    let plaintext = credentials
        .read_secret(user_id, "blotato", &browser())
        .await
        .unwrap();
    assert_eq!(plaintext, "blt_live_secret");

    let status = credentials.secret_status(user_id, "blotato").await.unwrap();
    assert!(status.configured);
    assert!(status.last_used_at.is_some());
}

#[tokio::test]
async fn test_saving_twice_replaces_the_secret() {
    let db = setup_test_db_arc().await.unwrap();
    let credentials = store(db, Some(TEST_MASTER_KEY));
    let user_id = Uuid::new_v4();
    let ctx = ClientContext::default();

    credentials.save_secret(user_id, "blotato", "first", &ctx).await.unwrap();
    credentials.save_secret(user_id, "blotato", "second", &ctx).await.unwrap();

    assert_eq!(
        credentials.read_secret(user_id, "blotato", &ctx).await.unwrap(),
        "second"
    );
}

#[tokio::test]
async fn test_wrong_key_reads_fail_as_not_found_or_invalid() {
    let db = setup_test_db_arc().await.unwrap();
    let user_id = Uuid::new_v4();
    let ctx = ClientContext::default();

    store(db.clone(), Some(TEST_MASTER_KEY))
        .save_secret(user_id, "blotato", "secret", &ctx)
        .await
        .unwrap();

    let other = CredentialStore::with_key(db, MasterKey::new(vec![0xAB; 32]).unwrap());
    let result = other.read_secret(user_id, "blotato", &ctx).await;
    assert!(matches!(result, Err(CredentialError::NotFoundOrInvalid)));
}

#[tokio::test]
async fn test_secrets_are_bound_to_their_owner() {
    let db = setup_test_db_arc().await.unwrap();
    let credentials = store(db, Some(TEST_MASTER_KEY));
    let ctx = ClientContext::default();
    let owner = Uuid::new_v4();

    credentials.save_secret(owner, "blotato", "mine", &ctx).await.unwrap();

    let result = credentials.read_secret(Uuid::new_v4(), "blotato", &ctx).await;
    assert!(matches!(result, Err(CredentialError::NotFoundOrInvalid)));
}

#[tokio::test]
async fn test_malformed_master_key_is_a_configuration_error() {
    let db = setup_test_db_arc().await.unwrap();
    let short_key = &TEST_MASTER_KEY[..63];
    let credentials = store(db.clone(), Some(short_key));
    let user_id = Uuid::new_v4();

    assert!(!credentials.is_configured());
    let result = credentials
        .save_secret(user_id, "blotato", "secret", &ClientContext::default())
        .await;
    assert!(matches!(result, Err(CredentialError::Configuration(_))));

    credentials.flush_audit().await;
    let audit = CredentialAuditRepository::new(db)
        .list_for_user(user_id)
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].success);
}

#[tokio::test]
async fn test_every_operation_is_audited_with_client_context() {
    let db = setup_test_db_arc().await.unwrap();
    let credentials = store(db.clone(), Some(TEST_MASTER_KEY));
    let user_id = Uuid::new_v4();
    let ctx = browser();

    credentials.save_secret(user_id, "blotato", "s", &ctx).await.unwrap();
    credentials.read_secret(user_id, "blotato", &ctx).await.unwrap();
    assert!(credentials.delete_secret(user_id, "blotato", &ctx).await.unwrap());
    assert!(credentials.read_secret(user_id, "blotato", &ctx).await.is_err());

    let sealed = credentials
        .seal_tokens(user_id, "youtube", &tokens("yt-access", Some("yt-refresh"), None), &ctx)
        .unwrap();
    let connection = ConnectionRepository::new(db.clone())
        .upsert_connection(ConnectionUpsert {
            user_id,
            platform_name: "youtube".to_string(),
            tokens: Some(sealed),
            platform_user_id: Some("UC1".to_string()),
            platform_username: None,
            scopes: vec![],
            metadata: json!({}),
        })
        .await
        .unwrap();
    let opened = credentials.open_tokens(&connection, &ctx).await.unwrap();
    assert_eq!(opened.access_token, "yt-access");
    assert!(credentials.delete_tokens(user_id, "youtube", &ctx).await.unwrap());

    credentials.flush_audit().await;
    let audit = CredentialAuditRepository::new(db)
        .list_for_user(user_id)
        .await
        .unwrap();

    let mut operations: Vec<(&str, &str, bool)> = audit
        .iter()
        .map(|row| (row.service_name.as_str(), row.operation.as_str(), row.success))
        .collect();
    operations.sort();
    assert_eq!(
        operations,
        vec![
            ("blotato", "create", true),
            ("blotato", "delete", true),
            ("blotato", "read", false),
            ("blotato", "read", true),
            ("oauth:youtube", "create", true),
            ("oauth:youtube", "delete", true),
            ("oauth:youtube", "read", true),
        ]
    );
    assert!(audit.iter().all(|row| row.ip_address.as_deref() == Some("203.0.113.7")));
    assert!(audit.iter().all(|row| row.user_agent.as_deref() == Some("Mozilla/5.0")));
    assert!(
        audit
            .iter()
            .filter(|row| !row.success)
            .all(|row| row.error_message.is_some())
    );
}

#[tokio::test]
async fn test_publish_token_read_is_audited_with_caller_context() {
    let mock = MockServer::start().await;
    let db = setup_test_db_arc().await.unwrap();
    let (state, _) = test_state(test_config(&mock.uri()), (*db).clone());
    let credentials = state.credentials.clone();
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

    Mock::given(method("GET"))
        .and(path("/media/gone.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock)
        .await;

    let (base, handle) = spawn_test_app(state).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/publish/youtube"))
        .bearer_auth(session_token(user_id))
        .header("x-forwarded-for", "198.51.100.9")
        .header("user-agent", "dashboard/2.1")
        .json(&json!({ "video_url": format!("{}/media/gone.mp4", mock.uri()) }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    handle.shutdown().await.unwrap();
    credentials.flush_audit().await;

    let audit = CredentialAuditRepository::new(db)
        .list_for_user(user_id)
        .await
        .unwrap();
    let reads: Vec<_> = audit.iter().filter(|row| row.operation == "read").collect();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].service_name, "oauth:youtube");
    assert!(reads[0].success);
    assert_eq!(reads[0].ip_address.as_deref(), Some("198.51.100.9"));
    assert_eq!(reads[0].user_agent.as_deref(), Some("dashboard/2.1"));
}

#[tokio::test]
async fn test_secret_endpoints_never_return_plaintext() {
    let db = setup_test_db_arc().await.unwrap();
    let (state, _) = test_state(test_config("http://unused.test"), (*db).clone());
    let (base, handle) = spawn_test_app(state).await;
    let client = reqwest::Client::new();
    let token = session_token(Uuid::new_v4());

    let response = client
        .get(format!("{base}/secrets/blotato"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["configured"], false);

    let response = client
        .put(format!("{base}/secrets/blotato"))
        .bearer_auth(&token)
        .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
        .json(&json!({ "value": "blt_plaintext" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(!text.contains("blt_plaintext"));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["service"], "blotato");
    assert_eq!(body["configured"], true);

    let response = client
        .delete(format!("{base}/secrets/blotato"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .delete(format!("{base}/secrets/blotato"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .put(format!("{base}/secrets/Not%20Valid"))
        .bearer_auth(&token)
        .json(&json!({ "value": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_short_master_key_surfaces_as_503_with_hint() {
    let db = setup_test_db_arc().await.unwrap();
    let mut config = test_config("http://unused.test");
    config.master_key = Some(TEST_MASTER_KEY[..63].to_string());
    let (state, _) = test_state(config, (*db).clone());
    let (base, handle) = spawn_test_app(state).await;

    let response = reqwest::Client::new()
        .put(format!("{base}/secrets/blotato"))
        .bearer_auth(session_token(Uuid::new_v4()))
        .json(&json!({ "value": "secret" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "configuration_error");
    assert!(body["hint"].as_str().unwrap().contains("64 hex"));
    assert!(!body.to_string().contains(&TEST_MASTER_KEY[..63]));

    handle.shutdown().await.unwrap();
}
