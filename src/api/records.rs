use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::record::{RecordCreate, RecordOut, RecordUpdate, SearchResponse};
use crate::store::mongo::{build_search_filter, StoreSettings};
use crate::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub field: Option<String>,
    pub value: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest: bool,
    pub limit: Option<i64>,
}

/// Clamp-free pagination: out-of-range values are rejected rather than
/// silently adjusted.
pub fn validate_pagination(params: &PaginationParams) -> Result<(i64, u64), AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::validation("limit", "must be between 1 and 1000"));
    }
    let skip = params.skip.unwrap_or(0);
    if skip < 0 {
        return Err(AppError::validation("skip", "must be greater than or equal to 0"));
    }
    Ok((limit, skip as u64))
}

fn parse_record_id(id: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(id).map_err(|_| AppError::InvalidRecordId)
}

fn to_record_out(document: bson::Document, settings: &StoreSettings) -> Result<RecordOut, AppError> {
    RecordOut::from_document(document, &settings.time_field, settings.meta_field.as_deref())
}

/// POST /records
pub async fn create_record(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<RecordCreate>,
) -> Result<(StatusCode, Json<RecordOut>), AppError> {
    let database = context.require_database()?;
    let settings = state.store.settings().clone();

    let document =
        payload.into_document(&settings.time_field, settings.meta_field.as_deref())?;
    let stored = state.store.insert_record(database, document).await?;

    Ok((StatusCode::CREATED, Json(to_record_out(stored, &settings)?)))
}

/// GET /records — paginated, newest first.
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Vec<RecordOut>>, AppError> {
    let database = context.require_database()?;
    let (limit, skip) = validate_pagination(&params)?;

    let documents = state.store.list_records(database, limit, skip).await?;
    let settings = state.store.settings();
    let records = documents
        .into_iter()
        .map(|document| to_record_out(document, settings))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(records))
}

/// GET /records/:id
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<RecordOut>, AppError> {
    let database = context.require_database()?;
    let record_id = parse_record_id(&id)?;

    let document = state.store.get_record(database, record_id).await?;
    Ok(Json(to_record_out(document, state.store.settings())?))
}

/// PUT /records/:id — partial update via `$set`.
pub async fn update_record(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(payload): Json<RecordUpdate>,
) -> Result<Json<RecordOut>, AppError> {
    let database = context.require_database()?;
    let record_id = parse_record_id(&id)?;
    let settings = state.store.settings().clone();

    let set = payload.into_set_document(&settings.time_field, settings.meta_field.as_deref())?;
    let document = state.store.update_record(database, record_id, set).await?;
    Ok(Json(to_record_out(document, &settings)?))
}

/// DELETE /records/:id
pub async fn delete_record(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let database = context.require_database()?;
    let record_id = parse_record_id(&id)?;

    state.store.delete_record(database, record_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /records/search — dot-notation field filter plus time window.
pub async fn search_records(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let database = context.require_database()?;

    if let (Some(start), Some(end)) = (params.start_time, params.end_time) {
        if start > end {
            return Err(AppError::validation(
                "start_time",
                "must be before the end_time",
            ));
        }
    }
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::validation("limit", "must be between 1 and 1000"));
    }

    let settings = state.store.settings().clone();
    let filter = build_search_filter(
        params.field.as_deref(),
        params.value.as_deref(),
        params.start_time,
        params.end_time,
        &settings.time_field,
    )?;

    let documents = state
        .store
        .search_records(database, filter, params.latest, limit)
        .await?;

    if params.latest && documents.is_empty() {
        return Err(AppError::NotFound(
            "no records found for the given filters".into(),
        ));
    }

    let items = documents
        .into_iter()
        .map(|document| to_record_out(document, &settings))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(SearchResponse {
        latest: params.latest,
        count: items.len(),
        items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_bounds() {
        let (limit, skip) = validate_pagination(&PaginationParams {
            limit: None,
            skip: None,
        })
        .unwrap();
        assert_eq!((limit, skip), (100, 0));

        let (limit, skip) = validate_pagination(&PaginationParams {
            limit: Some(1000),
            skip: Some(50),
        })
        .unwrap();
        assert_eq!((limit, skip), (1000, 50));

        assert!(validate_pagination(&PaginationParams {
            limit: Some(0),
            skip: None,
        })
        .is_err());
        assert!(validate_pagination(&PaginationParams {
            limit: Some(1001),
            skip: None,
        })
        .is_err());
        assert!(validate_pagination(&PaginationParams {
            limit: None,
            skip: Some(-1),
        })
        .is_err());
    }

    #[test]
    fn search_params_parse_from_query_string() {
        let params: SearchParams = serde_urlencoded::from_str(
            "field=payload.temperature&value=21.5&latest=true&limit=10",
        )
        .unwrap();
        assert_eq!(params.field.as_deref(), Some("payload.temperature"));
        assert_eq!(params.value.as_deref(), Some("21.5"));
        assert!(params.latest);
        assert_eq!(params.limit, Some(10));
        assert!(params.start_time.is_none());
    }
}
