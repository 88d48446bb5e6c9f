use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get};
use axum::Router;

use crate::middleware::auth;
use crate::AppState;

pub mod records;
pub mod tokens;

/// Build the authenticated API router. All routes are relative — the caller
/// mounts this under the configured prefix.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let mut token_routes = Router::new()
        .route("/tokens", get(tokens::list_tokens))
        .route("/tokens/:database/:token_id", delete(tokens::revoke_token));

    // Token issuance is opt-in; when disabled the handler is never
    // registered.
    if state.config.enable_token_creation_route {
        token_routes = token_routes.route("/tokens", axum::routing::post(tokens::create_token));
    }

    let token_routes = token_routes
        .layer(middleware::from_fn(auth::require_admin))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    let record_routes = Router::new()
        .route(
            "/records",
            get(records::list_records).post(records::create_record),
        )
        .route("/records/search", get(records::search_records))
        .route(
            "/records/:id",
            get(records::get_record)
                .put(records::update_record)
                .delete(records::delete_record),
        )
        .layer(middleware::from_fn(auth::require_database_scope))
        .layer(middleware::from_fn_with_state(state, auth::authenticate));

    Router::new()
        .merge(token_routes)
        .merge(record_routes)
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
