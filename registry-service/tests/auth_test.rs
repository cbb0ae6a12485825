//! Integration tests for the AuthService RPCs.

mod common;

use common::{harness, harness_with, register_request, PASSWORD};
use registry_service::grpc::proto::auth_service_server::AuthService;
use registry_service::grpc::proto::{LoginRequest, ValidateTokenRequest};
use registry_service::grpc::WirePolicy;
use tonic::{Code, Request};

fn login(email: &str, password: &str) -> Request<LoginRequest> {
    Request::new(LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    })
}

#[tokio::test]
async fn login_returns_token_for_the_right_user() {
    let h = harness();
    let (user_id, token) = h.publisher("ada@example.com").await;

    let claims = h.tokens.validate(&token).expect("token should validate");
    assert_eq!(claims.user_id().unwrap(), user_id);
    assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
}

#[tokio::test]
async fn login_reports_expiry_in_seconds() {
    let h = harness();
    h.publisher("ada@example.com").await;

    let response = h
        .auth
        .login(login("ada@example.com", PASSWORD))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.expires_in, 7 * 24 * 60 * 60);
}

#[tokio::test]
async fn identifier_is_case_insensitive() {
    let h = harness();
    h.publisher("ada@example.com").await;

    assert!(h.auth.login(login("ADA@Example.COM", PASSWORD)).await.is_ok());
}

#[tokio::test]
async fn wrong_password_and_unknown_identifier_look_the_same() {
    let h = harness();
    h.publisher("ada@example.com").await;

    let wrong = h
        .auth
        .login(login("ada@example.com", "not-the-password"))
        .await
        .unwrap_err();
    let unknown = h
        .auth
        .login(login("nobody@example.com", PASSWORD))
        .await
        .unwrap_err();

    assert_eq!(wrong.code(), Code::Unauthenticated);
    assert_eq!(unknown.code(), Code::Unauthenticated);
    assert_eq!(wrong.message(), unknown.message());
}

#[tokio::test]
async fn detailed_policy_still_hides_which_credential_failed() {
    let h = harness_with(WirePolicy::detailed());
    h.publisher("ada@example.com").await;

    let wrong = h
        .auth
        .login(login("ada@example.com", "not-the-password"))
        .await
        .unwrap_err();
    let unknown = h
        .auth
        .login(login("nobody@example.com", PASSWORD))
        .await
        .unwrap_err();

    assert_eq!(wrong.code(), Code::Unauthenticated);
    assert_eq!(wrong.message(), unknown.message());
}

#[tokio::test]
async fn duplicate_registration_is_already_exists() {
    let h = harness();
    h.publisher("ada@example.com").await;

    let status = h
        .auth
        .register(Request::new(register_request("Ada@example.com")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
    assert_eq!(h.users.len(), 1);
}

#[tokio::test]
async fn invalid_registration_is_rejected() {
    let h = harness();
    let mut request = register_request("not-an-email");
    request.password_confirmation = "something-else".to_string();

    let status = h.auth.register(Request::new(request)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(h.users.is_empty());
}

#[tokio::test]
async fn validate_token_exposes_claims() {
    let h = harness();
    let (user_id, token) = h.publisher("ada@example.com").await;

    let response = h
        .auth
        .validate_token(Request::new(ValidateTokenRequest { token }))
        .await
        .unwrap()
        .into_inner();

    assert!(response.valid);
    let claims = response.claims.expect("claims present");
    assert_eq!(claims.user_id, user_id.to_string());
    assert_eq!(claims.issuer, "registry-service-test");
    assert_eq!(claims.audience, "localhost");
}

#[tokio::test]
async fn tampered_token_is_invalid() {
    let h = harness();
    let (_, token) = h.publisher("ada@example.com").await;

    // Swap a character in the middle of the signature segment.
    let sig_start = token.rfind('.').unwrap() + 1;
    let mut bytes = token.into_bytes();
    let i = sig_start + 4;
    bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();

    let response = h
        .auth
        .validate_token(Request::new(ValidateTokenRequest { token: tampered }))
        .await
        .unwrap()
        .into_inner();

    assert!(!response.valid);
    assert!(response.claims.is_none());
}
