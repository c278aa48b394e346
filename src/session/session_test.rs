use super::*;
use crate::store::MemoryStore;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn unsigned_jwt(claims: serde_json::Value) -> String {
    use base64::Engine as _;
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(
        serde_json::json!({"alg": "RS256", "typ": "JWT"})
            .to_string()
            .as_bytes(),
    );
    let payload = engine.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.c2ln")
}

fn access_token_for(audience: &str) -> String {
    unsigned_jwt(serde_json::json!({
        "aud": audience,
        "sub": "auth0|user1",
    }))
}

fn test_manager(domain: &str) -> SessionManager {
    let config = Arc::new(
        AuthConfig::new(
            domain,
            "client-id",
            "client-secret",
            "http://localhost:3000/auth/callback",
            "session-secret",
        )
        .expect("valid config"),
    );
    let provider = Arc::new(IdentityClient::new(config.clone()).expect("provider client"));
    SessionManager::new(&config, provider, Arc::new(MemoryStore::new()))
}

fn login_record(user_id: &str) -> FlowRecord {
    FlowRecord {
        user_id: Some(user_id.to_string()),
        ..FlowRecord::new(FlowKind::Login, None)
    }
}

fn tokens(audience: &str, expires_in: u64, refresh: Option<&str>) -> TokenResponse {
    TokenResponse {
        access_token: access_token_for(audience),
        refresh_token: refresh.map(String::from),
        id_token: None,
        scope: Some("read:documents".to_string()),
        expires_in,
    }
}

#[tokio::test]
async fn start_session_uses_correlated_user_without_id_token() {
    let manager = test_manager("https://tenant.example.com");

    let (user_id, blob) = manager
        .start_session(&tokens("https://api.example.com", 3600, Some("rt-1")), &login_record("auth0|user1"))
        .await
        .expect("session");

    assert_eq!(user_id, "auth0|user1");
    let claims = manager.decode_blob(&blob).expect("decode");
    assert_eq!(claims.sub, "auth0|user1");
    assert_eq!(claims.session.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(claims.session.tokens.len(), 1);
    assert_eq!(claims.session.tokens[0].audience, "https://api.example.com");
}

#[tokio::test]
async fn start_session_without_subject_fails_closed() {
    let manager = test_manager("https://tenant.example.com");
    let record = FlowRecord::new(FlowKind::Login, None);

    let result = manager
        .start_session(&tokens("https://api.example.com", 3600, None), &record)
        .await;
    assert!(matches!(result, Err(AuthFlowError::Verification(_))));
}

#[tokio::test]
async fn start_session_is_idempotent_per_audience() {
    let manager = test_manager("https://tenant.example.com");
    let record = login_record("auth0|user1");
    let response = tokens("https://api.example.com", 3600, Some("rt-1"));

    manager.start_session(&response, &record).await.unwrap();
    let (_, blob) = manager.start_session(&response, &record).await.unwrap();

    let session = manager.decode_blob(&blob).unwrap().session;
    assert_eq!(session.tokens.len(), 1, "replayed response must not duplicate");
}

#[tokio::test]
async fn start_session_preserves_refresh_token_when_response_omits_one() {
    let manager = test_manager("https://tenant.example.com");
    let record = login_record("auth0|user1");

    manager
        .start_session(&tokens("https://api.example.com", 3600, Some("rt-1")), &record)
        .await
        .unwrap();
    let (_, blob) = manager
        .start_session(&tokens("https://api.example.com", 3600, None), &record)
        .await
        .unwrap();

    let session = manager.decode_blob(&blob).unwrap().session;
    assert_eq!(session.refresh_token.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn start_session_keeps_untouched_audiences() {
    let manager = test_manager("https://tenant.example.com");
    let record = login_record("auth0|user1");

    manager
        .start_session(&tokens("https://api.example.com", 3600, Some("rt-1")), &record)
        .await
        .unwrap();
    let (_, blob) = manager
        .start_session(&tokens("https://files.example.com", 3600, None), &record)
        .await
        .unwrap();

    let session = manager.decode_blob(&blob).unwrap().session;
    assert_eq!(session.tokens.len(), 2);
    assert!(session.token_for("https://api.example.com").is_some());
    assert!(session.token_for("https://files.example.com").is_some());
}

#[tokio::test]
async fn link_then_unlink_restores_connections() {
    let manager = test_manager("https://tenant.example.com");

    let link_record = FlowRecord {
        user_id: Some("auth0|user1".to_string()),
        connection: Some("github".to_string()),
        ..FlowRecord::new(FlowKind::Link, None)
    };
    let (_, blob) = manager
        .start_session(&tokens("my-account", 3600, None), &link_record)
        .await
        .unwrap();
    let linked = manager.decode_blob(&blob).unwrap().session;
    assert!(linked.linked_connections.contains("github"));

    let unlink_record = FlowRecord {
        kind: FlowKind::Unlink,
        ..link_record.clone()
    };
    let (_, blob) = manager
        .start_session(&tokens("my-account", 3600, None), &unlink_record)
        .await
        .unwrap();
    let unlinked = manager.decode_blob(&blob).unwrap().session;
    assert!(unlinked.linked_connections.is_empty());
}

#[tokio::test]
async fn unlink_of_missing_connection_is_noop() {
    let manager = test_manager("https://tenant.example.com");
    let record = FlowRecord {
        kind: FlowKind::Unlink,
        user_id: Some("auth0|user1".to_string()),
        connection: Some("never-linked".to_string()),
        ..FlowRecord::new(FlowKind::Unlink, None)
    };

    let (_, blob) = manager
        .start_session(&tokens("my-account", 3600, None), &record)
        .await
        .expect("unlink of unknown connection must not fail");
    assert!(manager
        .decode_blob(&blob)
        .unwrap()
        .session
        .linked_connections
        .is_empty());
}

#[tokio::test]
async fn get_session_missing_user_is_not_found() {
    let manager = test_manager("https://tenant.example.com");
    let result = manager.get_session("auth0|nobody").await;
    assert!(matches!(result, Err(AuthFlowError::SessionNotFound(_))));
}

#[tokio::test]
async fn get_session_expired_without_refresh_deletes_and_signals() {
    let manager = test_manager("https://tenant.example.com");
    manager
        .start_session(&tokens("https://api.example.com", 0, None), &login_record("auth0|user1"))
        .await
        .unwrap();

    let result = manager.get_session("auth0|user1").await;
    assert!(matches!(result, Err(AuthFlowError::SessionExpired(_))));

    // Store cleanup happened: the session is now gone entirely
    let result = manager.get_session("auth0|user1").await;
    assert!(matches!(result, Err(AuthFlowError::SessionNotFound(_))));
}

#[tokio::test]
async fn get_access_token_without_record_needs_reauthorization() {
    let manager = test_manager("https://tenant.example.com");
    manager
        .start_session(&tokens("https://api.example.com", 3600, None), &login_record("auth0|user1"))
        .await
        .unwrap();

    let outcome = manager
        .get_access_token("auth0|user1", "https://other.example.com", None)
        .await
        .unwrap();
    assert!(matches!(outcome, AccessTokenOutcome::NeedsReauthorization));
}

#[tokio::test]
async fn get_access_token_scope_mismatch_needs_reauthorization() {
    let manager = test_manager("https://tenant.example.com");
    manager
        .start_session(&tokens("https://api.example.com", 3600, None), &login_record("auth0|user1"))
        .await
        .unwrap();

    // Scope expansion requires user consent, never a silent upgrade
    let outcome = manager
        .get_access_token("auth0|user1", "https://api.example.com", Some("admin:everything"))
        .await
        .unwrap();
    assert!(matches!(outcome, AccessTokenOutcome::NeedsReauthorization));
}

#[tokio::test]
async fn get_access_token_returns_fresh_match() {
    let manager = test_manager("https://tenant.example.com");
    manager
        .start_session(&tokens("https://api.example.com", 3600, None), &login_record("auth0|user1"))
        .await
        .unwrap();

    let outcome = manager
        .get_access_token("auth0|user1", "https://api.example.com", Some("read:documents"))
        .await
        .unwrap();
    match outcome {
        AccessTokenOutcome::Token(record) => {
            assert_eq!(record.audience, "https://api.example.com");
        }
        other => panic!("expected token, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_token_with_refresh_is_silently_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token_for("https://api.example.com"),
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "read:documents",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(&server.uri());
    manager
        .start_session(
            &tokens("https://api.example.com", 0, Some("rt-1")),
            &login_record("auth0|user1"),
        )
        .await
        .unwrap();

    let outcome = manager
        .get_access_token("auth0|user1", "https://api.example.com", None)
        .await
        .unwrap();
    match outcome {
        AccessTokenOutcome::Token(record) => {
            assert!(record.is_fresh(Utc::now()));
        }
        other => panic!("expected refreshed token, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_callers_share_a_single_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token_for("https://api.example.com"),
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "read:documents",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = Arc::new(test_manager(&server.uri()));
    manager
        .start_session(
            &tokens("https://api.example.com", 0, Some("rt-1")),
            &login_record("auth0|user1"),
        )
        .await
        .unwrap();

    let callers = (0..8).map(|_| {
        let manager = manager.clone();
        async move {
            manager
                .get_access_token("auth0|user1", "https://api.example.com", None)
                .await
        }
    });

    for outcome in futures::future::join_all(callers).await {
        assert!(matches!(
            outcome.expect("refresh outcome"),
            AccessTokenOutcome::Token(_)
        ));
    }
    // wiremock verifies expect(1) on drop: exactly one refresh RPC
}

#[tokio::test]
async fn rejected_refresh_deletes_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
        })))
        .mount(&server)
        .await;

    let manager = test_manager(&server.uri());
    manager
        .start_session(
            &tokens("https://api.example.com", 0, Some("rt-dead")),
            &login_record("auth0|user1"),
        )
        .await
        .unwrap();

    let result = manager.get_session("auth0|user1").await;
    assert!(matches!(result, Err(AuthFlowError::Refresh(_))));

    // Reauthentication required: the dead session is gone
    let result = manager.get_session("auth0|user1").await;
    assert!(matches!(result, Err(AuthFlowError::SessionNotFound(_))));
}

#[tokio::test]
async fn logout_revokes_then_deletes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(&server.uri());
    manager
        .start_session(
            &tokens("https://api.example.com", 3600, Some("rt-1")),
            &login_record("auth0|user1"),
        )
        .await
        .unwrap();

    manager.logout("auth0|user1").await.expect("logout");
    assert!(matches!(
        manager.get_session("auth0|user1").await,
        Err(AuthFlowError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn logout_deletes_locally_even_when_revocation_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let manager = test_manager(&server.uri());
    manager
        .start_session(
            &tokens("https://api.example.com", 3600, Some("rt-1")),
            &login_record("auth0|user1"),
        )
        .await
        .unwrap();

    manager
        .logout("auth0|user1")
        .await
        .expect("logout proceeds despite provider failure");
    assert!(matches!(
        manager.get_session("auth0|user1").await,
        Err(AuthFlowError::SessionNotFound(_))
    ));
}
