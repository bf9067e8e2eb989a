use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::limit::{self, IpLimiter};
use crate::AppState;

mod auth;
mod config;
mod emails;

/// All API routes. `auth_limiter` applies to `/api/auth` on top of whatever
/// limit wraps the whole router.
pub(crate) fn router(auth_limiter: Option<IpLimiter>) -> Router<AppState> {
    let mut auth = auth::router();
    if let Some(limiter) = auth_limiter {
        auth = auth.layer(middleware::from_fn_with_state(limiter, limit::enforce));
    }

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/auth", auth)
        .nest("/api/config", config::router())
        .nest("/api/emails", emails::router())
}

async fn health() -> Json<Value> {
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    Json(json!({
        "status": "OK",
        "timestamp": timestamp,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
