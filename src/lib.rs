//! tsgate — token-scoped CRUD API over MongoDB time-series collections.
//!
//! Exposes the application modules so integration tests in `tests/` can
//! exercise them directly.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod store;
pub mod tokens;

use store::mongo::MongoStore;
use tokens::TokenService;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: MongoStore,
    pub tokens: TokenService,
    pub config: config::Config,
}
