use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::errors::AppError;
use crate::models::token::{
    CreateTokenRequest, CreateTokenResponse, ListTokensParams, TokenMetadata,
};
use crate::tokens::IssueRequest;
use crate::AppState;

/// POST /tokens — issue a token bound to one database. The response carries
/// the plaintext secret exactly once.
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CreateTokenResponse>), AppError> {
    let issued = state
        .tokens
        .issue(IssueRequest {
            database: payload.database,
            description: payload.description,
            expires_in_seconds: payload.expires_in_seconds,
            secret: payload.token,
        })
        .await?;

    let metadata = issued.metadata;
    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            token: issued.secret,
            database: metadata.database,
            description: metadata.description,
            created_at: metadata.created_at,
            last_used_at: metadata.last_used_at,
            expires_at: metadata.expires_at,
        }),
    ))
}

/// GET /tokens — metadata for stored tokens, optionally filtered to one
/// database. Never includes the secret or the hash.
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTokensParams>,
) -> Result<Json<Vec<TokenMetadata>>, AppError> {
    let tokens = state.tokens.list(params.database.as_deref()).await?;
    Ok(Json(tokens))
}

/// DELETE /tokens/:database/:token_id
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Path((database, token_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.tokens.revoke(&database, &token_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
