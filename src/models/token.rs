use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// BSON document persisted in the per-database token collection.
///
/// The plaintext secret never exists here; only its SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub token_hash: String,
    pub database: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: bson::DateTime,
    #[serde(default)]
    pub last_used_at: Option<bson::DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<bson::DateTime>,
}

impl TokenDoc {
    /// Strip the hash and document internals, keeping only the metadata that
    /// may be exposed to API consumers. `database` is the name of the
    /// database the document was found in.
    pub fn into_metadata(self, database: String) -> TokenMetadata {
        TokenMetadata {
            id: self.id.map(|oid| oid.to_hex()).unwrap_or_default(),
            database,
            description: self.description,
            created_at: self.created_at.to_chrono(),
            last_used_at: self.last_used_at.map(|dt| dt.to_chrono()),
            expires_at: self.expires_at.map(|dt| dt.to_chrono()),
        }
    }
}

/// Token metadata safe for API output — no secret, no hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub id: String,
    pub database: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub database: String,
    /// Optional caller-supplied secret. If omitted the API generates one.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// TTL in seconds. Zero or absent means the token never expires.
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    /// The one-time plaintext secret. It cannot be recovered later.
    pub token: String,
    pub database: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListTokensParams {
    pub database: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_serialization_never_exposes_hash() {
        let doc = TokenDoc {
            id: Some(ObjectId::new()),
            token_hash: "deadbeef".repeat(8),
            database: "sales".into(),
            description: Some("ci".into()),
            created_at: bson::DateTime::now(),
            last_used_at: None,
            expires_at: None,
        };

        let metadata = doc.into_metadata("sales".into());
        let json = serde_json::to_value(&metadata).unwrap();

        assert!(json.get("token_hash").is_none());
        assert!(json.get("token").is_none());
        assert_eq!(json["database"], "sales");
        assert_eq!(json["description"], "ci");
        assert!(json["last_used_at"].is_null());
        assert!(json["expires_at"].is_null());
    }

    #[test]
    fn create_request_accepts_minimal_body() {
        let req: CreateTokenRequest =
            serde_json::from_str(r#"{"database": "sales"}"#).unwrap();
        assert_eq!(req.database, "sales");
        assert!(req.token.is_none());
        assert!(req.description.is_none());
        assert!(req.expires_in_seconds.is_none());
    }

    #[test]
    fn token_doc_roundtrips_through_bson() {
        let doc = TokenDoc {
            id: None,
            token_hash: "abc123".into(),
            database: "iot".into(),
            description: None,
            created_at: bson::DateTime::now(),
            last_used_at: None,
            expires_at: Some(bson::DateTime::now()),
        };

        let raw = bson::to_document(&doc).unwrap();
        assert!(raw.get("_id").is_none());
        assert_eq!(raw.get_str("token_hash").unwrap(), "abc123");

        let back: TokenDoc = bson::from_document(raw).unwrap();
        assert_eq!(back.database, "iot");
        assert!(back.expires_at.is_some());
    }
}
