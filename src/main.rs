use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Json;
use clap::Parser;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tsgate::errors::AppError;
use tsgate::store::mongo::MongoStore;
use tsgate::tokens::{IssueRequest, TokenService};
use tsgate::{api, cli, config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tsgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Token { command }) => {
            let store = MongoStore::connect(&cfg).await?;
            let tokens = TokenService::new(store);
            handle_token_command(command, &tokens).await
        }
        None => run_server(cfg, None).await,
    }
}

async fn run_server(cfg: config::Config, port_override: Option<u16>) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(cfg.port);

    tracing::info!("Connecting to MongoDB at {}", cfg.mongodb_uri);
    let store = MongoStore::connect(&cfg).await?;

    // Provision the default database up front so an administrator request
    // that relies on it does not pay the creation cost.
    if let Some(ref database) = cfg.default_database {
        store.timeseries_collection(database).await?;
    }

    let tokens = TokenService::new(store.clone());
    let state = Arc::new(AppState {
        store,
        tokens,
        config: cfg.clone(),
    });

    let app = axum::Router::new()
        // Health endpoint (no auth)
        .route("/healthz", get(health_check))
        .nest(&cfg.api_prefix, api::api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let app = if cfg.allowed_origins.is_empty() {
        app
    } else {
        app.layer(cors_layer(&cfg.allowed_origins))
    };

    let app = app
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("tsgate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::{HeaderName, HeaderValue, Method};
    use tower_http::cors::AllowOrigin;

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-api-token"),
            HeaderName::from_static("x-database-name"),
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

/// Middleware: injects a unique X-Request-Id into every response so clients
/// can correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers for every response. Token material must
/// never end up cached or leak through referrers.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.remove("Server");

    resp
}

async fn handle_token_command(
    cmd: cli::TokenCommands,
    tokens: &TokenService,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Create {
            database,
            description,
            expires_in,
        } => {
            let issued = tokens
                .issue(IssueRequest {
                    database,
                    description,
                    expires_in_seconds: expires_in,
                    secret: None,
                })
                .await?;

            println!("Token created:");
            println!("  ID:         {}", issued.metadata.id);
            println!("  Database:   {}", issued.metadata.database);
            if let Some(expires_at) = issued.metadata.expires_at {
                println!("  Expires at: {}", expires_at.to_rfc3339());
            }
            println!("  Use:        X-API-Token: {}", issued.secret);
            println!("Store the token securely; it cannot be recovered later.");
        }
        cli::TokenCommands::List { database } => {
            let tokens = tokens.list(database.as_deref()).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!("{:<26} {:<20} {:<25} DESCRIPTION", "ID", "DATABASE", "CREATED");
                for t in tokens {
                    println!(
                        "{:<26} {:<20} {:<25} {}",
                        t.id,
                        t.database,
                        t.created_at.format("%Y-%m-%d %H:%M:%S"),
                        t.description.unwrap_or_default()
                    );
                }
            }
        }
        cli::TokenCommands::Revoke { database, token_id } => {
            match tokens.revoke(&database, &token_id).await {
                Ok(()) => println!("Token revoked."),
                Err(AppError::NotFound(_)) => println!("Token not found."),
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}
