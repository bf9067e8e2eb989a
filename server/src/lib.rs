//! HTTP API for mailroom.
//!
//! ```text
//! GET  /api/health
//! POST /api/auth/login              GET /api/auth/me
//! POST /api/auth/change-password
//! GET  /api/config                  POST /api/config/smtp
//! POST /api/config/identity
//! POST /api/emails/send             POST /api/emails/send-bulk-stream
//! POST /api/emails/test-connection  GET  /api/emails/logs
//! ```
//!
//! Everything except health and login requires a bearer token. Requests
//! under `/api` are rate limited per client address, with a stricter limit
//! on `/api/auth`. Browser origins are restricted to a configured list.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRef;
use axum::http::{header, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::{middleware, Json, Router};
use mailroom::auth::{AuthError, JwtManager};
use mailroom::dispatch::{DispatchError, Dispatcher};
use mailroom::error::ErrorResponse;
use mailroom::mail::Connector;
use mailroom::store::{AccountStore, DeliveryLog, StoreError, UserStore};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

mod extract;
pub mod limit;
pub mod routes;

pub use limit::{RateLimit, RateLimits};

use limit::IpLimiter;

const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];

#[derive(Clone, FromRef)]
pub struct AppState {
    pub jwt: JwtManager,
    pub users: Arc<dyn UserStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub log: Arc<dyn DeliveryLog>,
    pub dispatcher: Dispatcher,
    #[from_ref(skip)]
    pub limits: RateLimits,
    #[from_ref(skip)]
    pub cors_origins: Vec<HeaderValue>,
}

impl AppState {
    /// State backed by a single store implementing every persistence trait.
    pub fn new<S>(store: S, jwt: JwtManager, connector: Arc<dyn Connector>, throttle: Duration) -> Self
    where
        S: AccountStore + DeliveryLog + UserStore,
    {
        let store = Arc::new(store);
        AppState {
            jwt,
            users: store.clone(),
            accounts: store.clone(),
            log: store.clone(),
            dispatcher: Dispatcher::new(store.clone(), store, connector).throttle(throttle),
            limits: RateLimits::default(),
            cors_origins: DEV_ORIGINS.into_iter().map(HeaderValue::from_static).collect(),
        }
    }

    pub fn rate_limits(mut self, limits: RateLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Origins allowed to call the API from a browser. Entries that are not
    /// valid header values are skipped with a warning.
    pub fn cors_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cors_origins = origins
            .into_iter()
            .filter_map(|origin| match HeaderValue::from_str(origin.as_ref()) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = origin.as_ref(), "ignoring invalid cors origin");
                    None
                }
            })
            .collect();
        self
    }
}

pub fn app(state: AppState) -> Router {
    let mut router = routes::router(state.limits.auth.map(IpLimiter::new));
    if let Some(api) = state.limits.api {
        router = router.layer(middleware::from_fn_with_state(IpLimiter::new(api), limit::enforce));
    }

    router
        .layer(cors(&state.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(origins: &[HeaderValue]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins.iter().cloned()))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

#[derive(Debug, thiserror::Error, mailroom::HttpError)]
pub enum Error {
    #[error("invalid username or password")]
    #[http_error(UNAUTHORIZED)]
    InvalidCredentials,

    /// Valid token for an account that no longer exists.
    #[error("unknown user")]
    #[http_error(UNAUTHORIZED, "invalid or expired token")]
    UnknownUser,

    #[error("{0}")]
    #[http_error(BAD_REQUEST)]
    Validation(&'static str),

    /// Body missing, not JSON, or of the wrong shape.
    #[error("invalid request body: {0}")]
    #[http_error(BAD_REQUEST, "invalid request body")]
    Body(#[from] JsonRejection),

    #[error("too many requests")]
    #[http_error(TOO_MANY_REQUESTS, "too many requests, please try again later")]
    RateLimited,

    #[error("current password is incorrect")]
    #[http_error(BAD_REQUEST)]
    WrongPassword,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("store error: {0}")]
    #[http_error(INTERNAL_SERVER_ERROR, "internal error")]
    Store(#[from] StoreError),

    #[error("auth error: {0}")]
    #[http_error(INTERNAL_SERVER_ERROR, "internal error")]
    Auth(#[from] AuthError),
}

impl Error {
    fn status_and_body(&self) -> (http::StatusCode, ErrorResponse) {
        match self {
            Error::Dispatch(err) => {
                let body = ErrorResponse::new(err.http_message());
                match err {
                    DispatchError::Transport(mail) => (err.http_code(), body.with_details(mail.to_string())),
                    _ => (err.http_code(), body),
                }
            }
            Error::Body(rejection) => (
                self.http_code(),
                ErrorResponse::new(self.http_message()).with_details(rejection.body_text()),
            ),
            _ => (self.http_code(), ErrorResponse::new(self.http_message())),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (code, body) = self.status_and_body();
        if code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (code, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
