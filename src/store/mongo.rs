use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, CreateCollectionOptions, Credential, FindOneAndUpdateOptions, FindOptions,
    IndexOptions, ReturnDocument, TimeseriesOptions,
};
use mongodb::{Client, Collection, IndexModel};

use crate::config::Config;
use crate::errors::AppError;
use crate::models::token::TokenDoc;

/// Databases maintained by MongoDB itself; never scanned for token
/// collections.
const SYSTEM_DATABASES: [&str; 3] = ["admin", "config", "local"];

const TTL_INDEX_NAME: &str = "expires_at_ttl";

/// Collection naming and time-series layout, fixed at startup.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub timeseries_collection: String,
    pub tokens_collection: String,
    pub time_field: String,
    pub meta_field: Option<String>,
    pub cleanup_interval: Duration,
}

impl StoreSettings {
    fn from_config(cfg: &Config) -> Self {
        StoreSettings {
            timeseries_collection: cfg.timeseries_collection.clone(),
            tokens_collection: cfg.tokens_collection.clone(),
            time_field: cfg.time_field.clone(),
            meta_field: cfg.meta_field.clone(),
            cleanup_interval: cfg.cleanup_interval(),
        }
    }
}

/// MongoDB-backed store for token records and time-series documents.
///
/// Token records live in a per-database collection so that a token is
/// physically co-located with the data it scopes. An in-process map
/// remembers which database a given hash was last found in, sparing the
/// cross-database scan on the hot authorization path.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    settings: StoreSettings,
    token_locations: Arc<DashMap<String, String>>,
    cleanup_runs: Arc<DashMap<String, Instant>>,
}

impl MongoStore {
    pub async fn connect(cfg: &Config) -> anyhow::Result<Self> {
        let mut options = ClientOptions::parse(&cfg.mongodb_uri)
            .await
            .context("invalid MongoDB connection string")?;
        options.max_pool_size = Some(cfg.max_pool_size);
        if let (Some(username), Some(password)) = (&cfg.mongodb_username, &cfg.mongodb_password) {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(password.clone())
                    .build(),
            );
        }

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! {"ping": 1}, None)
            .await
            .context("unable to establish a connection to MongoDB")?;

        Ok(MongoStore {
            client,
            settings: StoreSettings::from_config(cfg),
            token_locations: Arc::new(DashMap::new()),
            cleanup_runs: Arc::new(DashMap::new()),
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    // ── Provisioning ─────────────────────────────────────────

    /// Return the time-series collection for `database`, creating the
    /// collection and its time index if they do not exist yet. Creation is
    /// idempotent: a concurrent duplicate attempt is a no-op.
    pub async fn timeseries_collection(
        &self,
        database: &str,
    ) -> Result<Collection<Document>, AppError> {
        let db = self.client.database(database);
        let names = db.list_collection_names(None).await?;

        if !names.contains(&self.settings.timeseries_collection) {
            tracing::info!(
                "creating time-series collection {} in database {}",
                self.settings.timeseries_collection,
                database
            );
            let mut timeseries = TimeseriesOptions::builder()
                .time_field(self.settings.time_field.clone())
                .build();
            timeseries.meta_field = self.settings.meta_field.clone();
            let options = CreateCollectionOptions::builder()
                .timeseries(timeseries)
                .build();

            match db
                .create_collection(&self.settings.timeseries_collection, options)
                .await
            {
                Ok(()) => {}
                Err(err) if is_namespace_exists(&err) => {
                    tracing::warn!(
                        "collection {} already exists despite initial check",
                        self.settings.timeseries_collection
                    );
                }
                Err(err) => {
                    return Err(AppError::Unavailable(format!(
                        "unable to prepare the requested database: {err}"
                    )))
                }
            }
        }

        let collection = db.collection::<Document>(&self.settings.timeseries_collection);

        let mut keys = Document::new();
        keys.insert(self.settings.time_field.as_str(), 1);
        collection
            .create_index(IndexModel::builder().keys(keys).build(), None)
            .await
            .map_err(|err| {
                AppError::Unavailable(format!("failed to ensure MongoDB indexes: {err}"))
            })?;

        self.cleanup_expired_records(&collection, database).await;
        Ok(collection)
    }

    /// Return the token collection inside `database`, creating it with its
    /// unique hash index and TTL index when needed.
    async fn token_collection(&self, database: &str) -> Result<Collection<TokenDoc>, AppError> {
        let db = self.client.database(database);
        let names = db.list_collection_names(None).await?;

        if !names.contains(&self.settings.tokens_collection) {
            tracing::info!(
                "creating API token collection {} in database {}",
                self.settings.tokens_collection,
                database
            );
            match db
                .create_collection(&self.settings.tokens_collection, None)
                .await
            {
                Ok(()) => {}
                Err(err) if is_namespace_exists(&err) => {}
                Err(err) => {
                    return Err(AppError::Unavailable(format!(
                        "unable to prepare token storage: {err}"
                    )))
                }
            }
        }

        let collection = db.collection::<TokenDoc>(&self.settings.tokens_collection);

        let unique_hash = IndexModel::builder()
            .keys(doc! {"token_hash": 1})
            .options(IndexOptions::builder().unique(true).build())
            .build();
        // expireAfterSeconds: 0 — MongoDB removes a document once its
        // expires_at has passed; documents without the field are untouched.
        let ttl = IndexModel::builder()
            .keys(doc! {"expires_at": 1})
            .options(
                IndexOptions::builder()
                    .name(TTL_INDEX_NAME.to_string())
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();

        for index in [unique_hash, ttl] {
            collection.create_index(index, None).await.map_err(|err| {
                AppError::Unavailable(format!("failed to ensure MongoDB token indexes: {err}"))
            })?;
        }

        Ok(collection)
    }

    /// Non-system databases that hold a token collection, or just `filter`
    /// when given.
    async fn token_databases(&self, filter: Option<&str>) -> Result<Vec<String>, AppError> {
        let candidates = match filter {
            Some(name) => vec![name.to_string()],
            None => self
                .client
                .list_database_names(None, None)
                .await?
                .into_iter()
                .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
                .collect(),
        };

        let mut holders = Vec::new();
        for name in candidates {
            let collections = self.client.database(&name).list_collection_names(None).await?;
            if collections.contains(&self.settings.tokens_collection) {
                holders.push(name);
            }
        }
        Ok(holders)
    }

    // ── Token operations ─────────────────────────────────────

    pub async fn insert_token(
        &self,
        database: &str,
        token: &TokenDoc,
    ) -> Result<ObjectId, AppError> {
        let collection = self.token_collection(database).await?;
        let result = collection.insert_one(token, None).await.map_err(|err| {
            if is_duplicate_key(&err) {
                AppError::Conflict("a token with the provided value already exists".into())
            } else {
                AppError::from(err)
            }
        })?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| AppError::Internal(anyhow!("token insert did not return an ObjectId")))
    }

    /// Locate the token document for `token_hash`, returning the database it
    /// lives in. Consults the location cache first, then scans.
    pub async fn find_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<(String, TokenDoc)>, AppError> {
        if let Some(cached) = self
            .token_locations
            .get(token_hash)
            .map(|entry| entry.value().clone())
        {
            let collection = self.token_collection(&cached).await?;
            if let Some(document) = collection
                .find_one(doc! {"token_hash": token_hash}, None)
                .await?
            {
                return Ok(Some((cached, document)));
            }
            self.token_locations.remove(token_hash);
        }

        for name in self.token_databases(None).await? {
            let collection = self
                .client
                .database(&name)
                .collection::<TokenDoc>(&self.settings.tokens_collection);
            if let Some(document) = collection
                .find_one(doc! {"token_hash": token_hash}, None)
                .await?
            {
                self.token_locations
                    .insert(token_hash.to_string(), name.clone());
                return Ok(Some((name, document)));
            }
        }

        Ok(None)
    }

    /// Best-effort bump of `last_used_at`. Callers treat failures as
    /// non-fatal.
    pub async fn touch_token(&self, database: &str, id: ObjectId) -> Result<(), AppError> {
        let collection = self.token_collection(database).await?;
        collection
            .update_one(
                doc! {"_id": id},
                doc! {"$set": {"last_used_at": bson::DateTime::now()}},
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn list_tokens(
        &self,
        database: Option<&str>,
    ) -> Result<Vec<(String, TokenDoc)>, AppError> {
        let mut tokens = Vec::new();
        for name in self.token_databases(database).await? {
            let collection = self
                .client
                .database(&name)
                .collection::<TokenDoc>(&self.settings.tokens_collection);
            let mut cursor = collection.find(doc! {}, None).await?;
            while let Some(document) = cursor.try_next().await? {
                tokens.push((name.clone(), document));
            }
        }
        Ok(tokens)
    }

    /// Delete the token `id` inside `database`, returning the removed
    /// document. Scoping by database keeps identifier collisions across
    /// scopes from revoking the wrong record.
    pub async fn delete_token(
        &self,
        database: &str,
        id: ObjectId,
    ) -> Result<Option<TokenDoc>, AppError> {
        let collection = self.token_collection(database).await?;
        let removed = collection.find_one_and_delete(doc! {"_id": id}, None).await?;
        if let Some(ref document) = removed {
            self.forget_token_location(&document.token_hash);
        }
        Ok(removed)
    }

    pub fn remember_token_location(&self, token_hash: &str, database: &str) {
        self.token_locations
            .insert(token_hash.to_string(), database.to_string());
    }

    pub fn forget_token_location(&self, token_hash: &str) {
        self.token_locations.remove(token_hash);
    }

    // ── Record operations ────────────────────────────────────

    pub async fn insert_record(
        &self,
        database: &str,
        document: Document,
    ) -> Result<Document, AppError> {
        let collection = self.timeseries_collection(database).await?;
        let result = collection.insert_one(&document, None).await?;
        collection
            .find_one(doc! {"_id": result.inserted_id}, None)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow!("inserted record vanished before readback")))
    }

    pub async fn get_record(
        &self,
        database: &str,
        id: ObjectId,
    ) -> Result<Document, AppError> {
        let collection = self.timeseries_collection(database).await?;
        collection
            .find_one(doc! {"_id": id}, None)
            .await?
            .ok_or_else(|| AppError::NotFound("record not found".into()))
    }

    /// Paginated records, newest first.
    pub async fn list_records(
        &self,
        database: &str,
        limit: i64,
        skip: u64,
    ) -> Result<Vec<Document>, AppError> {
        let collection = self.timeseries_collection(database).await?;
        let options = FindOptions::builder()
            .sort(self.newest_first())
            .skip(skip)
            .limit(limit)
            .build();
        let documents = collection
            .find(doc! {}, options)
            .await?
            .try_collect()
            .await?;
        Ok(documents)
    }

    pub async fn update_record(
        &self,
        database: &str,
        id: ObjectId,
        set: Document,
    ) -> Result<Document, AppError> {
        let collection = self.timeseries_collection(database).await?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        collection
            .find_one_and_update(doc! {"_id": id}, doc! {"$set": set}, options)
            .await?
            .ok_or_else(|| AppError::NotFound("record not found for update".into()))
    }

    pub async fn delete_record(&self, database: &str, id: ObjectId) -> Result<(), AppError> {
        let collection = self.timeseries_collection(database).await?;
        let result = collection.delete_one(doc! {"_id": id}, None).await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound("record not found for deletion".into()));
        }
        Ok(())
    }

    /// Execute a search. `latest` returns at most the single newest match.
    pub async fn search_records(
        &self,
        database: &str,
        filter: Document,
        latest: bool,
        limit: i64,
    ) -> Result<Vec<Document>, AppError> {
        let collection = self.timeseries_collection(database).await?;
        let options = FindOptions::builder()
            .sort(self.newest_first())
            .limit(if latest { 1 } else { limit })
            .build();
        let documents = collection
            .find(filter, options)
            .await?
            .try_collect()
            .await?;
        Ok(documents)
    }

    fn newest_first(&self) -> Document {
        let mut sort = Document::new();
        sort.insert(self.settings.time_field.as_str(), -1);
        sort
    }

    // ── Lazy expiry sweep ────────────────────────────────────

    /// Time-series collections cannot carry a TTL index, so expired
    /// documents are swept opportunistically whenever the collection is
    /// accessed, at most once per configured interval per database.
    async fn cleanup_expired_records(&self, collection: &Collection<Document>, database: &str) {
        if !self.should_run_cleanup(database) {
            return;
        }

        let now = bson::DateTime::now();
        match collection
            .delete_many(doc! {"expires_at": {"$lte": now}}, None)
            .await
        {
            Ok(result) if result.deleted_count > 0 => {
                tracing::info!(
                    "removed {} expired documents from {}.{}",
                    result.deleted_count,
                    database,
                    self.settings.timeseries_collection
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    "failed to purge expired documents from {}.{}: {}",
                    database,
                    self.settings.timeseries_collection,
                    err
                );
            }
        }
    }

    fn should_run_cleanup(&self, database: &str) -> bool {
        let interval = self.settings.cleanup_interval;
        if interval.is_zero() {
            return true;
        }

        let now = Instant::now();
        match self.cleanup_runs.entry(database.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= interval {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }
}

fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    // Server error code 48: NamespaceExists.
    matches!(*err.kind, ErrorKind::Command(ref command) if command.code == 48)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write)) if write.code == 11000
    )
}

// ── Search-query construction ────────────────────────────────

/// API field names mapped to their persisted MongoDB equivalents.
/// `source` is stored as `acronym`; `id` addresses the document `_id`.
pub fn normalize_field_path(field: &str) -> String {
    for (external, internal) in [
        ("source", "acronym"),
        ("acronym", "acronym"),
        ("id", "_id"),
        ("_id", "_id"),
    ] {
        if field == external {
            return internal.to_string();
        }
        if let Some(suffix) = field.strip_prefix(&format!("{external}.")) {
            return format!("{internal}.{suffix}");
        }
    }
    field.to_string()
}

/// Coerce a query-string value into JSON, boolean or string, in that order.
pub fn coerce_value(value: &str) -> Bson {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(value) {
        if let Ok(bson) = bson::to_bson(&json) {
            return bson;
        }
    }
    match value.to_lowercase().as_str() {
        "true" => Bson::Boolean(true),
        "false" => Bson::Boolean(false),
        _ => Bson::String(value.to_string()),
    }
}

/// Build the MongoDB filter for a record search: an optional field match
/// (with aliasing and value coercion) plus an inclusive time window.
pub fn build_search_filter(
    field: Option<&str>,
    value: Option<&str>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    time_field: &str,
) -> Result<Document, AppError> {
    let mut filter = Document::new();

    if let (Some(field), Some(value)) = (field, value) {
        let normalized = normalize_field_path(field);
        let coerced = if normalized == "_id" || normalized.starts_with("_id.") {
            Bson::ObjectId(ObjectId::parse_str(value).map_err(|_| AppError::InvalidRecordId)?)
        } else {
            coerce_value(value)
        };
        filter.insert(normalized, coerced);
    }

    if start_time.is_some() || end_time.is_some() {
        let mut range = Document::new();
        if let Some(start) = start_time {
            range.insert("$gte", bson::DateTime::from_chrono(start));
        }
        if let Some(end) = end_time {
            range.insert("$lte", bson::DateTime::from_chrono(end));
        }
        filter.insert(time_field, range);
    }

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_aliases_map_to_persisted_names() {
        assert_eq!(normalize_field_path("source"), "acronym");
        assert_eq!(normalize_field_path("acronym"), "acronym");
        assert_eq!(normalize_field_path("id"), "_id");
        assert_eq!(normalize_field_path("_id"), "_id");
        assert_eq!(normalize_field_path("source.unit"), "acronym.unit");
        assert_eq!(normalize_field_path("payload.temperature"), "payload.temperature");
    }

    #[test]
    fn values_coerce_json_then_bool_then_string() {
        assert_eq!(coerce_value("42"), Bson::Int64(42));
        assert_eq!(coerce_value("3.5"), Bson::Double(3.5));
        assert_eq!(coerce_value("true"), Bson::Boolean(true));
        assert_eq!(coerce_value("False"), Bson::Boolean(false));
        assert_eq!(coerce_value("station-1"), Bson::String("station-1".into()));
        assert_eq!(
            coerce_value(r#"{"a": 1}"#),
            Bson::Document(doc! {"a": 1i64})
        );
    }

    #[test]
    fn search_filter_combines_field_and_window() {
        let start = Utc::now();
        let end = start + chrono::Duration::hours(1);
        let filter = build_search_filter(
            Some("source"),
            Some("stn1"),
            Some(start),
            Some(end),
            "timestamp",
        )
        .unwrap();

        assert_eq!(filter.get_str("acronym").unwrap(), "stn1");
        let window = filter.get_document("timestamp").unwrap();
        assert!(window.get_datetime("$gte").is_ok());
        assert!(window.get_datetime("$lte").is_ok());
    }

    #[test]
    fn search_filter_parses_id_field_as_object_id() {
        let oid = ObjectId::new();
        let filter =
            build_search_filter(Some("id"), Some(&oid.to_hex()), None, None, "timestamp").unwrap();
        assert_eq!(filter.get_object_id("_id").unwrap(), oid);

        let err = build_search_filter(Some("id"), Some("nope"), None, None, "timestamp")
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRecordId));
    }

    #[test]
    fn empty_search_filter_matches_everything() {
        let filter = build_search_filter(None, None, None, None, "timestamp").unwrap();
        assert!(filter.is_empty());
    }
}
