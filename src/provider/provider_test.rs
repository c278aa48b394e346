use super::*;
use crate::config::AuthConfig;
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// 2048-bit RSA test keypair. The private key is PKCS#1 DER (base64);
// N/E are the matching public JWK parameters.
const TEST_RSA_PRIVATE_DER_B64: &str = "MIIEpQIBAAKCAQEAuJFFnnPsftnlyjAyijqYmnUubnUJ9z4mnePnNpiObgGwJA4qvJXvbmDGg8a9sURIJInHeq+gFDFXCEDZqN16hyzZwIRtNHAj3xAtJzwoHNaf5ipQ58//zTngb4nV1YuH0DeidqPwgLhKZUGYe3jGZEvKfiqcWZwR9ukToo5XVWiamARcr82SfHHRewI6ZpnMwHlyhQEKpRqMJFJ0hOKNPtjXIw4WOme+MyPcS86HZAQ2AF3VuZNAx4aetkCuk6OC7ZzTMMT4XcxHi07+kC+HSh+3EfiX50JQXkFIRKBjyZRvlloyDSJxlCJQO/TXP/Iaola4ffWAZQQB4HotQuzdswIDAQABAoIBAAdP11vlUyDcuF91NLCzN5PO6/hQ8gR11YklxpAsJQsIosDFlZMuYXOUU+j+jkn1NDfLruJruMIes52jwWZmN9IecxX5vmsjEi4RHFN/QkY6M9AmLFmyrNClkqr4i/HPevbtwqWZQxA7vNQcGtKxazKn/1gA5NF2qbjdbPtgpjxqPLH1DzB/E4ygp80nNkSJ4t7s2hcr/OMqnKsxarEswqMNKa99PO+gtNpHhsXFap1FkhLtHyhlU9S4lRBkazywwZ+CSS6uiQy2glIPcGlt6lQ3i28X3MRCW6pkoC5KLJ/H5fLeKZXydPe6fIXacV9K5B9AkEWFyKVxeHmvJk6PRoECgYEA/tyFSTrZFCbthj2KrfLO96KCxDNTW23l6ek6iN72CO0KskvJxIoKc+Tio/kKrfWGwv8F3a7Y2JdlLPLN3NKzgNKQTDxWj10ZPCZmMMe2Y05si//Z2ZhoxudRyrkkGcIt2ha+IuARK1IUr16k3ZQ92zlX9E84u4fOFGFM6v7+jXMCgYEAuWRbkLkxfWj8k8Nl7GHlxpvFvZmM8XXEioUqu07ySYGlcqNgrJQ7llQAgAJrdxeBjm7WM8aUhaHGwMcl0ONqX55cbJDfXgAvJYAD8CzAKCTtaO3WtooYrn9Jr6zX3WAfY13gkyiX59AwxWltXm8J7HCmuufWjYbbnhuo+HmcXsECgYEAm0zHD1ODuerqq/VOTyb5BR8K7gGUls8F3Z5YI9UxOUkwTmsuPMwdCHf9vwtffZdykdoSuf30dy7x4QznctsVtLcaZMoTuPJzERsZBDp+Ik9Eh57VIenkVufYCF7+549Sn2ViYSAGdk5i+mYCsl7FvpNXzDCGEofzhKmx1DSj6o8CgYEAnFto4nlepP+rrk/pIWE7srLkJlFfzrHdjlpbvNgLfjVKvZHPUh4+1z2Hom7oBewcR21xWP+NedsETshnO3Lh3z0nhCT3TkdnfAAo0iJb+j+Sv6GAKjn0MQ+HrRNgiAOu1VZytopQ+6DZ0VVmeXO68d/crtwjVv+7L/DyJIYkfMECgYEAtySW8dAUiNOBbW9LTmq1EDieZ+Iaf86Xf3B4qzV7PkvbuEJLXbBzqm9LKNSS4LrT4vB0XdlUMM3rvaWE/XpadU48VQLdePuw1P139KuLGdef3DLLVBQnOBfRdyPOzxKM0MpaXPZPUNj+Zybj97fhIhAPTSOhegOY6LXoVVpz6Ok=";
const TEST_RSA_N: &str = "uJFFnnPsftnlyjAyijqYmnUubnUJ9z4mnePnNpiObgGwJA4qvJXvbmDGg8a9sURIJInHeq-gFDFXCEDZqN16hyzZwIRtNHAj3xAtJzwoHNaf5ipQ58__zTngb4nV1YuH0DeidqPwgLhKZUGYe3jGZEvKfiqcWZwR9ukToo5XVWiamARcr82SfHHRewI6ZpnMwHlyhQEKpRqMJFJ0hOKNPtjXIw4WOme-MyPcS86HZAQ2AF3VuZNAx4aetkCuk6OC7ZzTMMT4XcxHi07-kC-HSh-3EfiX50JQXkFIRKBjyZRvlloyDSJxlCJQO_TXP_Iaola4ffWAZQQB4HotQuzdsw";
const TEST_RSA_E: &str = "AQAB";
const TEST_KID: &str = "test-signing-key";

fn signing_key() -> EncodingKey {
    let der = base64::engine::general_purpose::STANDARD
        .decode(TEST_RSA_PRIVATE_DER_B64)
        .expect("valid test key");
    EncodingKey::from_rsa_der(&der)
}

fn jwks_body() -> serde_json::Value {
    serde_json::json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": TEST_KID,
            "n": TEST_RSA_N,
            "e": TEST_RSA_E,
        }]
    })
}

fn sign_id_token(issuer: &str, audience: &str, subject: &str, exp_offset_secs: i64) -> String {
    let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    let claims = serde_json::json!({
        "iss": issuer,
        "aud": audience,
        "sub": subject,
        "email": "user1@example.com",
        "iat": Utc::now().timestamp(),
        "exp": Utc::now().timestamp() + exp_offset_secs,
    });
    jsonwebtoken::encode(&header, &claims, &signing_key()).expect("sign id token")
}

async fn mount_jwks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
        .mount(server)
        .await;
}

fn test_client(domain: &str) -> IdentityClient {
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
    IdentityClient::new(config).expect("provider client")
}

#[test]
fn authorize_url_is_deterministic_and_passes_extras_verbatim() {
    let client = test_client("https://tenant.example.com");

    let url = client
        .build_authorize_url(&AuthorizeParams {
            state: "state-123".to_string(),
            connection: Some("github".to_string()),
            scope: Some("openid profile".to_string()),
            audience: Some("https://api.example.com".to_string()),
            extra: vec![
                ("prompt".to_string(), "login".to_string()),
                ("ext-vendor".to_string(), "x y".to_string()),
            ],
        })
        .expect("authorize url");

    assert_eq!(
        url.as_str(),
        "https://tenant.example.com/authorize?\
         response_type=code&\
         client_id=client-id&\
         redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback&\
         state=state-123&\
         connection=github&\
         scope=openid+profile&\
         audience=https%3A%2F%2Fapi.example.com&\
         prompt=login&\
         ext-vendor=x+y"
    );
}

#[test]
fn authorize_url_omits_absent_parameters() {
    let client = test_client("https://tenant.example.com");
    let url = client
        .build_authorize_url(&AuthorizeParams {
            state: "state-123".to_string(),
            ..Default::default()
        })
        .expect("authorize url");

    assert!(!url.as_str().contains("connection="));
    assert!(!url.as_str().contains("scope="));
    assert!(!url.as_str().contains("audience="));
}

#[test]
fn par_authorize_url_references_request_uri() {
    let client = test_client("https://tenant.example.com");
    let url = client
        .build_authorize_par_url("state-123", "urn:ietf:params:oauth:request_uri:abc")
        .expect("par url");

    assert_eq!(
        url.as_str(),
        "https://tenant.example.com/authorize?\
         client_id=client-id&\
         state=state-123&\
         request_uri=urn%3Aietf%3Aparams%3Aoauth%3Arequest_uri%3Aabc"
    );
}

#[tokio::test]
async fn exchange_code_returns_tokens_with_id_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-1",
            "id_token": "header.payload.signature",
            "scope": "openid profile email",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let tokens = client.exchange_code("the-code").await.expect("exchange");

    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(tokens.id_token.as_deref(), Some("header.payload.signature"));
    assert_eq!(tokens.scope.as_deref(), Some("openid profile email"));
    assert_eq!(tokens.expires_in, 3600);
}

#[tokio::test]
async fn rejected_exchange_is_a_typed_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "authorization code is invalid or expired",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let result = client.exchange_code("stale-code").await;
    assert!(matches!(result, Err(AuthFlowError::Exchange(_))));
}

#[tokio::test]
async fn refresh_returns_new_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let tokens = client.refresh("rt-1", None).await.expect("refresh");
    assert_eq!(tokens.access_token, "at-2");
    assert!(tokens.refresh_token.is_none());
}

#[tokio::test]
async fn rejected_refresh_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
        })))
        // A provider rejection means the token is invalid; exactly one call
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let result = client.refresh("rt-dead", None).await;
    assert!(matches!(result, Err(AuthFlowError::Refresh(_))));
}

#[tokio::test]
async fn verify_id_token_accepts_a_good_token() {
    let server = MockServer::start().await;
    mount_jwks(&server).await;

    let client = test_client(&server.uri());
    let issuer = format!("{}/", server.uri());
    let raw = sign_id_token(&issuer, "client-id", "auth0|user1", 3600);

    let claims = client.verify_id_token(&raw).await.expect("verified");
    assert_eq!(claims.get("sub").and_then(|v| v.as_str()), Some("auth0|user1"));
    assert_eq!(
        claims.get("email").and_then(|v| v.as_str()),
        Some("user1@example.com")
    );
}

#[tokio::test]
async fn verify_id_token_rejects_wrong_audience() {
    let server = MockServer::start().await;
    mount_jwks(&server).await;

    let client = test_client(&server.uri());
    let issuer = format!("{}/", server.uri());
    let raw = sign_id_token(&issuer, "some-other-client", "auth0|user1", 3600);

    assert!(matches!(
        client.verify_id_token(&raw).await,
        Err(AuthFlowError::Verification(_))
    ));
}

#[tokio::test]
async fn verify_id_token_rejects_expired_token() {
    let server = MockServer::start().await;
    mount_jwks(&server).await;

    let client = test_client(&server.uri());
    let issuer = format!("{}/", server.uri());
    let raw = sign_id_token(&issuer, "client-id", "auth0|user1", -600);

    assert!(matches!(
        client.verify_id_token(&raw).await,
        Err(AuthFlowError::Verification(_))
    ));
}

#[tokio::test]
async fn verify_id_token_rejects_unknown_kid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"keys": []})))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let issuer = format!("{}/", server.uri());
    let raw = sign_id_token(&issuer, "client-id", "auth0|user1", 3600);

    assert!(matches!(
        client.verify_id_token(&raw).await,
        Err(AuthFlowError::Verification(_))
    ));
}

#[tokio::test]
async fn jwks_is_cached_across_verifications() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let issuer = format!("{}/", server.uri());

    for _ in 0..3 {
        let raw = sign_id_token(&issuer, "client-id", "auth0|user1", 3600);
        client.verify_id_token(&raw).await.expect("verified");
    }
    // wiremock verifies expect(1) on drop: the key set was fetched once
}

#[test]
fn peek_audience_reads_string_and_array_claims() {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(
        serde_json::json!({"alg": "RS256", "typ": "JWT"})
            .to_string()
            .as_bytes(),
    );

    let single = format!(
        "{header}.{}.c2ln",
        engine.encode(serde_json::json!({"aud": "https://api.example.com"}).to_string().as_bytes())
    );
    assert_eq!(
        IdentityClient::peek_unverified_audience(&single).as_deref(),
        Some("https://api.example.com")
    );

    let multi = format!(
        "{header}.{}.c2ln",
        engine.encode(
            serde_json::json!({"aud": ["https://api.example.com", "https://other"]})
                .to_string()
                .as_bytes()
        )
    );
    assert_eq!(
        IdentityClient::peek_unverified_audience(&multi).as_deref(),
        Some("https://api.example.com")
    );
}

#[test]
fn peek_audience_of_opaque_token_is_none() {
    assert_eq!(IdentityClient::peek_unverified_audience("opaque-token"), None);
}

#[tokio::test]
async fn revoke_posts_the_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .and(body_string_contains("rt-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    client.revoke("rt-1").await.expect("revoked");
}

#[tokio::test]
async fn rejected_revocation_is_a_typed_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    assert!(matches!(
        client.revoke("rt-1").await,
        Err(AuthFlowError::Provider(_))
    ));
}

#[tokio::test]
async fn par_submits_credentials_and_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/par"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("client_id=client-id"))
        .and(body_string_contains("audience=my-account"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "request_uri": "urn:ietf:params:oauth:request_uri:abc123",
            "expires_in": 90,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let response = client
        .push_authorization_request(&[
            ("response_type".to_string(), "code".to_string()),
            ("audience".to_string(), "my-account".to_string()),
        ])
        .await
        .expect("par accepted");
    assert_eq!(response.request_uri, "urn:ietf:params:oauth:request_uri:abc123");
}

#[tokio::test]
async fn userinfo_uses_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": "auth0|user1",
            "name": "User One",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let profile = client.get_userinfo("at-1").await.expect("userinfo");
    assert_eq!(profile.get("sub").and_then(|v| v.as_str()), Some("auth0|user1"));
}

#[tokio::test]
async fn federated_token_uses_token_exchange_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("token-exchange"))
        .and(body_string_contains("connection=github"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "gh-token",
            "expires_in": 3600,
            "scope": "repo",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let token = client
        .federated_token("github", "rt-1", Some("repo"))
        .await
        .expect("federated token");
    assert_eq!(token.access_token, "gh-token");
    assert_eq!(token.scope.as_deref(), Some("repo"));
}
