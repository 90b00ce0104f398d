use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use plaza_api::auth::{self, AppState, AppStateInner, SiteConfig};
use plaza_api::guard::{self, NoChallenge};
use plaza_api::memos;
use plaza_api::middleware::require_auth;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plaza=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PLAZA_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PLAZA_DB_PATH").unwrap_or_else(|_| "plaza.db".into());
    let host = std::env::var("PLAZA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PLAZA_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let site = SiteConfig {
        page_rows: env_or("PLAZA_PAGE_ROWS", 15)?,
        memo_send_point: env_or("PLAZA_MEMO_SEND_POINT", 5)?,
        signup_point: env_or("PLAZA_SIGNUP_POINT", 0)?,
    };

    // Init database
    let db = plaza_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state; the CAPTCHA provider is an external collaborator, so
    // the stock binary wires the accept-all verifier.
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        site,
        challenge: Arc::new(NoChallenge),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/action-token", get(guard::action_token))
        .route("/memos", get(memos::list_memos))
        .route("/memos", post(memos::send_memos))
        .route("/memos/unread", get(memos::unread_status))
        .route("/memos/{id}", get(memos::view_memo))
        .route("/memos/{id}", delete(memos::delete_memo))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Plaza server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) => Ok(val.parse()?),
        Err(_) => Ok(default),
    }
}
