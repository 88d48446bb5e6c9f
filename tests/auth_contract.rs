//! Contract tests for the token-authorization surface.
//!
//! These verify:
//! 1. Error responses map to the right status codes, and expired tokens are
//!    indistinguishable from unknown ones on the wire
//! 2. The issuance/authorization arithmetic (hashing, TTL windows) behaves
//!    per contract without needing a running MongoDB
//! 3. API output never carries secret material

use axum::response::IntoResponse;
use chrono::{Duration, Utc};
use tsgate::errors::AppError;

async fn response_parts(err: AppError) -> (axum::http::StatusCode, axum::body::Bytes) {
    let resp = err.into_response();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

mod error_responses {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn expired_and_unknown_tokens_are_indistinguishable() {
        let (unknown_status, unknown_body) = response_parts(AppError::Unauthorized).await;
        let (expired_status, expired_body) = response_parts(AppError::ExpiredToken).await;

        assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
        assert_eq!(expired_status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_body, expired_body);
    }

    #[tokio::test]
    async fn statuses_follow_the_taxonomy() {
        let cases = [
            (AppError::AdminRequired, StatusCode::FORBIDDEN),
            (AppError::ScopeMismatch, StatusCode::FORBIDDEN),
            (
                AppError::validation("database", "must not be empty"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AppError::InvalidRecordId, StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::EmptyUpdate, StatusCode::BAD_REQUEST),
            (AppError::NotFound("token not found".into()), StatusCode::NOT_FOUND),
            (
                AppError::Conflict("duplicate".into()),
                StatusCode::CONFLICT,
            ),
            (
                AppError::Unavailable("mongo down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            let (status, _) = response_parts(err).await;
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn validation_errors_carry_field_detail() {
        let (_, body) = response_parts(AppError::validation("database", "must not be empty")).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "validation_failed");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("database"));
    }
}

mod token_lifecycle {
    use super::*;
    use tsgate::models::token::{CreateTokenResponse, TokenDoc};
    use tsgate::tokens::{expiry_from_ttl, generate_secret, hash_secret, is_expired};

    /// The secret handed back at issuance must hash to the stored digest, so
    /// presenting it immediately afterwards resolves to the issuing record.
    #[test]
    fn issued_secret_resolves_to_its_record() {
        let secret = generate_secret();
        let stored = TokenDoc {
            id: None,
            token_hash: hash_secret(&secret),
            database: "sales".into(),
            description: Some("ci".into()),
            created_at: bson::DateTime::now(),
            last_used_at: None,
            expires_at: None,
        };

        assert_eq!(hash_secret(&secret), stored.token_hash);
        assert_ne!(hash_secret("some-other-secret"), stored.token_hash);
        // The stored document never contains the plaintext.
        let raw = bson::to_document(&stored).unwrap();
        assert!(!raw
            .get_str("token_hash")
            .unwrap()
            .contains(&secret));
    }

    /// Sixty-second token: valid at +30s, invalid from +60s onward.
    #[test]
    fn ttl_window_boundaries() {
        let created = Utc::now();
        let expires_at = expiry_from_ttl(created, Some(60)).unwrap().unwrap();
        assert_eq!(expires_at, created + Duration::seconds(60));

        let deadline = bson::DateTime::from_chrono(expires_at);
        let at_30s = bson::DateTime::from_chrono(created + Duration::seconds(30));
        let at_60s = bson::DateTime::from_chrono(created + Duration::seconds(60));
        let at_61s = bson::DateTime::from_chrono(created + Duration::seconds(61));

        assert!(!is_expired(Some(deadline), at_30s));
        assert!(is_expired(Some(deadline), at_60s));
        assert!(is_expired(Some(deadline), at_61s));
    }

    /// Tokens without a TTL never expire, regardless of elapsed time.
    #[test]
    fn absent_ttl_never_expires() {
        let far_future = bson::DateTime::from_chrono(Utc::now() + Duration::days(365 * 100));
        assert!(!is_expired(None, far_future));
        assert!(expiry_from_ttl(Utc::now(), Some(0)).unwrap().is_none());
    }

    /// An absurdly large TTL must come back as a validation failure, never a
    /// panic in the handler task.
    #[test]
    fn extreme_ttl_fails_validation_instead_of_aborting() {
        let err = expiry_from_ttl(Utc::now(), Some(i64::MAX)).unwrap_err();
        assert!(
            matches!(err, AppError::Validation { field, .. } if field == "expires_in_seconds")
        );
    }

    #[test]
    fn issuance_response_shape() {
        let now = Utc::now();
        let response = CreateTokenResponse {
            token: generate_secret(),
            database: "sales".into(),
            description: Some("ci".into()),
            created_at: now,
            last_used_at: None,
            expires_at: Some(now + Duration::seconds(60)),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["token"].is_string());
        assert_eq!(json["database"], "sales");
        assert!(json["last_used_at"].is_null());
        assert!(json["expires_at"].is_string());
        assert!(json.get("token_hash").is_none());
    }
}

mod middleware_contract {
    use tsgate::middleware::auth::{bearer_token, secrets_match, AuthContext};

    #[test]
    fn admin_without_scope_cannot_reach_records() {
        let ctx = AuthContext {
            is_admin: true,
            database: None,
        };
        assert!(ctx.require_database().is_err());
    }

    #[test]
    fn resolved_scope_flows_through() {
        let ctx = AuthContext {
            is_admin: false,
            database: Some("sales".into()),
        };
        assert_eq!(ctx.require_database().unwrap(), "sales");
    }

    #[test]
    fn credential_extraction_and_comparison() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-api-token", "tok-123".parse().unwrap());
        let presented = bearer_token(&headers).unwrap();

        assert!(secrets_match(presented, "tok-123"));
        assert!(!secrets_match(presented, "tok-1234"));
    }
}
