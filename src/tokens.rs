use bson::oid::ObjectId;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::AppError;
use crate::models::token::{TokenDoc, TokenMetadata};
use crate::store::mongo::MongoStore;

/// Bytes of entropy in a generated secret (128 bits, hex-encoded to 32
/// characters).
const SECRET_BYTES: usize = 16;

/// Issues, validates, lists and revokes API tokens.
///
/// Secrets are never stored: only their SHA-256 digest is persisted, and a
/// presented credential is located by recomputing the digest.
#[derive(Clone)]
pub struct TokenService {
    store: MongoStore,
}

pub struct IssueRequest {
    pub database: String,
    pub description: Option<String>,
    /// TTL in seconds; zero or absent means no expiry.
    pub expires_in_seconds: Option<i64>,
    /// Caller-supplied secret, if any. Generated when absent.
    pub secret: Option<String>,
}

pub struct IssuedToken {
    /// One-time plaintext secret; not retrievable after this response.
    pub secret: String,
    pub metadata: TokenMetadata,
}

pub struct AuthorizedToken {
    pub database: String,
    pub metadata: TokenMetadata,
}

impl TokenService {
    pub fn new(store: MongoStore) -> Self {
        TokenService { store }
    }

    /// Create a token scoped to a database, provisioning the database's
    /// collections first so a freshly issued token is immediately usable.
    pub async fn issue(&self, request: IssueRequest) -> Result<IssuedToken, AppError> {
        let database = validate_issue_request(&request)?;

        self.store.timeseries_collection(&database).await?;

        let secret = request.secret.unwrap_or_else(generate_secret);
        let token_hash = hash_secret(&secret);
        let now = Utc::now();
        let expires_at = expiry_from_ttl(now, request.expires_in_seconds)?;

        let document = TokenDoc {
            id: None,
            token_hash: token_hash.clone(),
            database: database.clone(),
            description: request.description.clone(),
            created_at: bson::DateTime::from_chrono(now),
            last_used_at: None,
            expires_at: expires_at.map(bson::DateTime::from_chrono),
        };

        let id = self.store.insert_token(&database, &document).await?;
        self.store.remember_token_location(&token_hash, &database);

        tracing::info!(database = %database, "issued API token");

        Ok(IssuedToken {
            secret,
            metadata: TokenMetadata {
                id: id.to_hex(),
                database,
                description: request.description,
                created_at: now,
                last_used_at: None,
                expires_at,
            },
        })
    }

    /// Validate a presented secret and resolve its database scope.
    ///
    /// An expired-but-not-yet-swept record is rejected here even though it
    /// is still physically present; the TTL index removes it eventually.
    pub async fn authorize(&self, secret: &str) -> Result<AuthorizedToken, AppError> {
        let token_hash = hash_secret(secret);

        let Some((database, record)) = self.store.find_token_by_hash(&token_hash).await? else {
            return Err(AppError::Unauthorized);
        };

        if is_expired(record.expires_at, bson::DateTime::now()) {
            return Err(AppError::ExpiredToken);
        }

        // Fire-and-forget last_used_at touch; never blocks or fails the
        // authorization outcome.
        if let Some(id) = record.id {
            let store = self.store.clone();
            let db = database.clone();
            tokio::spawn(async move {
                if let Err(err) = store.touch_token(&db, id).await {
                    tracing::debug!(database = %db, "failed to update token last_used_at: {err}");
                }
            });
        }

        Ok(AuthorizedToken {
            database: database.clone(),
            metadata: record.into_metadata(database),
        })
    }

    /// Metadata for all stored tokens, optionally filtered to one database.
    pub async fn list(&self, database: Option<&str>) -> Result<Vec<TokenMetadata>, AppError> {
        let rows = self.store.list_tokens(database).await?;
        Ok(rows
            .into_iter()
            .map(|(db, document)| document.into_metadata(db))
            .collect())
    }

    /// Delete the token `token_id` persisted inside `database`.
    pub async fn revoke(&self, database: &str, token_id: &str) -> Result<(), AppError> {
        let id = ObjectId::parse_str(token_id).map_err(|_| not_found())?;
        match self.store.delete_token(database, id).await? {
            Some(_) => {
                tracing::info!(database = %database, "revoked API token");
                Ok(())
            }
            None => Err(not_found()),
        }
    }
}

fn not_found() -> AppError {
    AppError::NotFound("token not found for the requested database".into())
}

/// Check issuance constraints, returning the trimmed database name.
pub fn validate_issue_request(request: &IssueRequest) -> Result<String, AppError> {
    let database = request.database.trim();
    if database.is_empty() {
        return Err(AppError::validation("database", "must not be empty"));
    }
    if let Some(ttl) = request.expires_in_seconds {
        if ttl < 0 {
            return Err(AppError::validation(
                "expires_in_seconds",
                "must be greater than or equal to 0",
            ));
        }
    }
    if let Some(ref secret) = request.secret {
        if secret.is_empty() {
            return Err(AppError::validation(
                "token",
                "must not be empty when provided",
            ));
        }
    }
    Ok(database.to_string())
}

/// Generate a cryptographically random secret: 128 bits from the OS RNG,
/// hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way digest of a secret; the only form ever persisted.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Turn a TTL into an absolute deadline. TTLs large enough to overflow the
/// representable time range are a validation failure, not a panic.
pub fn expiry_from_ttl(
    now: DateTime<Utc>,
    ttl_seconds: Option<i64>,
) -> Result<Option<DateTime<Utc>>, AppError> {
    match ttl_seconds.filter(|ttl| *ttl > 0) {
        None => Ok(None),
        Some(ttl) => Duration::try_seconds(ttl)
            .and_then(|delta| now.checked_add_signed(delta))
            .map(Some)
            .ok_or_else(|| {
                AppError::validation(
                    "expires_in_seconds",
                    "must fit within the supported time range",
                )
            }),
    }
}

pub fn is_expired(expires_at: Option<bson::DateTime>, now: bson::DateTime) -> bool {
    matches!(expires_at, Some(deadline) if now >= deadline)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(database: &str) -> IssueRequest {
        IssueRequest {
            database: database.into(),
            description: None,
            expires_in_seconds: None,
            secret: None,
        }
    }

    #[test]
    fn generated_secrets_are_long_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), SECRET_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn hashing_is_deterministic_and_one_way_shaped() {
        let secret = "0123456789abcdef0123456789abcdef";
        let hash = hash_secret(secret);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_secret(secret));
        assert_ne!(hash, hash_secret("another-secret"));
        assert_ne!(hash, secret);
    }

    #[test]
    fn validation_trims_and_rejects_bad_input() {
        assert_eq!(validate_issue_request(&request("  sales  ")).unwrap(), "sales");

        let err = validate_issue_request(&request("   ")).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "database"));

        let mut negative = request("sales");
        negative.expires_in_seconds = Some(-1);
        let err = validate_issue_request(&negative).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "expires_in_seconds"));

        let mut empty_secret = request("sales");
        empty_secret.secret = Some(String::new());
        let err = validate_issue_request(&empty_secret).unwrap_err();
        assert!(matches!(err, AppError::Validation { field, .. } if field == "token"));
    }

    #[test]
    fn zero_or_absent_ttl_means_no_expiry() {
        let now = Utc::now();
        assert!(expiry_from_ttl(now, None).unwrap().is_none());
        assert!(expiry_from_ttl(now, Some(0)).unwrap().is_none());

        let deadline = expiry_from_ttl(now, Some(60)).unwrap().unwrap();
        assert_eq!(deadline, now + Duration::seconds(60));
        assert!(deadline > now);
    }

    #[test]
    fn overflowing_ttl_is_a_validation_error() {
        let now = Utc::now();
        for ttl in [i64::MAX, i64::MAX / 1000 + 1] {
            let err = expiry_from_ttl(now, Some(ttl)).unwrap_err();
            assert!(
                matches!(err, AppError::Validation { field, .. } if field == "expires_in_seconds")
            );
        }
    }

    #[test]
    fn expiry_check_is_point_in_time() {
        let now = bson::DateTime::now();
        let past = bson::DateTime::from_millis(now.timestamp_millis() - 1_000);
        let future = bson::DateTime::from_millis(now.timestamp_millis() + 60_000);

        assert!(!is_expired(None, now));
        assert!(!is_expired(Some(future), now));
        assert!(is_expired(Some(past), now));
        assert!(is_expired(Some(now), now));
    }
}
