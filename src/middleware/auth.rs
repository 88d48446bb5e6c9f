use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::AppState;

pub const API_TOKEN_HEADER: &str = "x-api-token";
pub const DATABASE_OVERRIDE_HEADER: &str = "x-database-name";

/// Authorization outcome attached to the request extensions: who the caller
/// is and which database the request is scoped to.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub is_admin: bool,
    pub database: Option<String>,
}

impl AuthContext {
    /// The resolved scope, required by every record route.
    pub fn require_database(&self) -> Result<&str, AppError> {
        self.database.as_deref().ok_or(AppError::Unauthorized)
    }
}

/// Extract the credential from `X-API-Token`, falling back to an
/// `Authorization: Bearer` scheme.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
}

/// Constant-time comparison of a presented credential against the
/// administrator secret. Unequal lengths leak only the length.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Validate the caller's credential and resolve the target database.
///
/// Administrator requests take their scope from the `X-Database-Name`
/// override or the configured default; token-derived requests are bound to
/// the token's database and may not name a different one. Failures
/// short-circuit before any downstream handler runs, and the credential is
/// never logged.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(credential) = bearer_token(req.headers()) else {
        return Err(AppError::Unauthorized);
    };

    let override_db = req
        .headers()
        .get(DATABASE_OVERRIDE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    let context = if secrets_match(credential, &state.config.api_admin_token) {
        AuthContext {
            is_admin: true,
            database: override_db.or_else(|| state.config.default_database.clone()),
        }
    } else {
        let authorized = state.tokens.authorize(credential).await?;
        if let Some(ref requested) = override_db {
            if requested != &authorized.database {
                return Err(AppError::ScopeMismatch);
            }
        }
        AuthContext {
            is_admin: false,
            database: Some(authorized.database),
        }
    };

    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Gate for token-management routes: only the administrator credential may
/// pass, regardless of scope.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    match req.extensions().get::<AuthContext>() {
        Some(context) if context.is_admin => Ok(next.run(req).await),
        Some(_) => Err(AppError::AdminRequired),
        None => Err(AppError::Unauthorized),
    }
}

/// Gate for record routes: a resolved database scope must exist before any
/// handler touches the store.
pub async fn require_database_scope(req: Request, next: Next) -> Result<Response, AppError> {
    match req.extensions().get::<AuthContext>() {
        Some(context) if context.database.is_some() => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized),
        None => Err(AppError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn token_header_wins_over_bearer_scheme() {
        let map = headers(&[
            ("x-api-token", "secret-a"),
            ("authorization", "Bearer secret-b"),
        ]);
        assert_eq!(bearer_token(&map), Some("secret-a"));
    }

    #[test]
    fn bearer_scheme_is_accepted_as_fallback() {
        let map = headers(&[("authorization", "Bearer  secret-b ")]);
        assert_eq!(bearer_token(&map), Some("secret-b"));
    }

    #[test]
    fn missing_or_empty_credential_yields_none() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        assert_eq!(bearer_token(&headers(&[("x-api-token", "")])), None);
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Basic dXNlcg==")])),
            None
        );
    }

    #[test]
    fn admin_comparison_matches_exactly() {
        assert!(secrets_match("s3cr3t", "s3cr3t"));
        assert!(!secrets_match("s3cr3t", "s3cr3t "));
        assert!(!secrets_match("", "s3cr3t"));
        assert!(!secrets_match("S3CR3T", "s3cr3t"));
    }

    #[test]
    fn context_without_scope_is_rejected() {
        let ctx = AuthContext {
            is_admin: true,
            database: None,
        };
        assert!(matches!(
            ctx.require_database().unwrap_err(),
            AppError::Unauthorized
        ));

        let ctx = AuthContext {
            is_admin: false,
            database: Some("sales".into()),
        };
        assert_eq!(ctx.require_database().unwrap(), "sales");
    }
}
