use anyhow::anyhow;
use bson::{Bson, Document};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

/// Payload for creating a time-series record. The origin identifier is
/// accepted as either `source` or `acronym` and always persisted as
/// `acronym`.
#[derive(Debug, Deserialize)]
pub struct RecordCreate {
    #[serde(alias = "acronym")]
    pub source: String,
    #[serde(default)]
    pub component: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// TTL in seconds. Zero or absent means the record never expires.
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

impl RecordCreate {
    pub fn into_document(
        self,
        time_field: &str,
        meta_field: Option<&str>,
    ) -> Result<Document, AppError> {
        if let Some(ttl) = self.expires_in_seconds {
            if ttl < 0 {
                return Err(AppError::validation(
                    "expires_in_seconds",
                    "must be greater than or equal to 0",
                ));
            }
        }

        let now = Utc::now();
        let timestamp = self.timestamp.unwrap_or(now);

        let mut document = Document::new();
        document.insert("acronym", self.source);
        document.insert(
            "component",
            self.component.map(Bson::String).unwrap_or(Bson::Null),
        );
        document.insert(
            "payload",
            bson::to_bson(&self.payload).map_err(|e| AppError::Internal(e.into()))?,
        );
        document.insert(
            meta_field.unwrap_or("metadata"),
            bson::to_bson(&Value::Object(self.metadata))
                .map_err(|e| AppError::Internal(e.into()))?,
        );
        document.insert(time_field, bson::DateTime::from_chrono(timestamp));

        if let Some(ttl) = self.expires_in_seconds.filter(|ttl| *ttl > 0) {
            let expires_at = Duration::try_seconds(ttl)
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(|| {
                    AppError::validation(
                        "expires_in_seconds",
                        "must fit within the supported time range",
                    )
                })?;
            document.insert("expires_at", bson::DateTime::from_chrono(expires_at));
        }

        Ok(document)
    }
}

/// Partial update of a record. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct RecordUpdate {
    #[serde(default, alias = "acronym")]
    pub source: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    /// Build the `$set` document for this patch, failing on empty updates.
    pub fn into_set_document(
        self,
        time_field: &str,
        meta_field: Option<&str>,
    ) -> Result<Document, AppError> {
        let mut set = Document::new();

        if let Some(source) = self.source {
            set.insert("acronym", source);
        }
        if let Some(component) = self.component {
            set.insert("component", component);
        }
        if let Some(payload) = self.payload {
            set.insert(
                "payload",
                bson::to_bson(&payload).map_err(|e| AppError::Internal(e.into()))?,
            );
        }
        if let Some(metadata) = self.metadata {
            set.insert(
                meta_field.unwrap_or("metadata"),
                bson::to_bson(&Value::Object(metadata))
                    .map_err(|e| AppError::Internal(e.into()))?,
            );
        }
        if let Some(timestamp) = self.timestamp {
            set.insert(time_field, bson::DateTime::from_chrono(timestamp));
        }
        if let Some(expires_at) = self.expires_at {
            set.insert("expires_at", bson::DateTime::from_chrono(expires_at));
        }

        if set.is_empty() {
            return Err(AppError::EmptyUpdate);
        }
        Ok(set)
    }
}

/// Representation of a record returned to API consumers.
#[derive(Debug, Serialize)]
pub struct RecordOut {
    pub id: String,
    pub acronym: String,
    pub component: Option<String>,
    pub payload: Value,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RecordOut {
    pub fn from_document(
        mut document: Document,
        time_field: &str,
        meta_field: Option<&str>,
    ) -> Result<Self, AppError> {
        let id = match document.remove("_id") {
            Some(Bson::ObjectId(oid)) => oid.to_hex(),
            other => {
                return Err(AppError::Internal(anyhow!(
                    "record document has no ObjectId _id: {other:?}"
                )))
            }
        };

        let acronym = match document.remove("acronym") {
            Some(Bson::String(s)) => s,
            _ => String::new(),
        };
        let component = match document.remove("component") {
            Some(Bson::String(s)) => Some(s),
            _ => None,
        };
        let payload = document
            .remove("payload")
            .map(Bson::into_relaxed_extjson)
            .unwrap_or(Value::Null);
        let metadata = document
            .remove(meta_field.unwrap_or("metadata"))
            .map(Bson::into_relaxed_extjson)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let timestamp = match document.remove(time_field) {
            Some(Bson::DateTime(dt)) => dt.to_chrono(),
            _ => {
                return Err(AppError::Internal(anyhow!(
                    "record document is missing its {time_field} field"
                )))
            }
        };
        let expires_at = match document.remove("expires_at") {
            Some(Bson::DateTime(dt)) => Some(dt.to_chrono()),
            _ => None,
        };

        Ok(RecordOut {
            id,
            acronym,
            component,
            payload,
            metadata,
            timestamp,
            expires_at,
        })
    }
}

/// Response payload returned by the search endpoint.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// Whether the response contains only the single newest match.
    pub latest: bool,
    pub count: usize,
    pub items: Vec<RecordOut>,
}
