use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use mailroom::auth::AuthUser;
use mailroom::mail::SmtpSettings;
use mailroom::request::null_as_default;
use mailroom::store::{AccountStore, SenderIdentity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::extract::JsonBody;
use crate::{AppState, Error, Result};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_config))
        .route("/smtp", post(save_smtp))
        .route("/identity", post(save_identity))
}

/// SMTP settings as shown to the account owner. The password never leaves
/// the server.
#[derive(Debug, Serialize)]
struct SmtpView {
    host: String,
    port: u16,
    secure: bool,
    user: String,
}

impl From<SmtpSettings> for SmtpView {
    fn from(smtp: SmtpSettings) -> Self {
        SmtpView {
            host: smtp.host,
            port: smtp.port,
            secure: smtp.secure,
            user: smtp.username,
        }
    }
}

#[derive(Debug, Serialize)]
struct Mailbox {
    name: String,
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityView {
    from: Mailbox,
    reply_to: Option<String>,
    signature: Option<String>,
}

impl From<SenderIdentity> for IdentityView {
    fn from(identity: SenderIdentity) -> Self {
        IdentityView {
            from: Mailbox {
                name: identity.name,
                email: identity.email,
            },
            reply_to: identity.reply_to,
            signature: identity.signature,
        }
    }
}

#[derive(Deserialize)]
struct SmtpRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    host: String,
    #[serde(default, deserialize_with = "null_as_default")]
    port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    secure: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    email: String,
    reply_to: Option<String>,
    signature: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn get_config(
    auth: AuthUser,
    State(accounts): State<Arc<dyn AccountStore>>,
) -> Result<Json<Value>> {
    let (smtp, identity) = tokio::try_join!(
        accounts.smtp_settings(auth.id),
        accounts.identity(auth.id),
    )?;

    Ok(Json(json!({
        "smtp": smtp.map(SmtpView::from),
        "identity": identity.map(IdentityView::from),
    })))
}

async fn save_smtp(
    auth: AuthUser,
    State(accounts): State<Arc<dyn AccountStore>>,
    JsonBody(req): JsonBody<SmtpRequest>,
) -> Result<Json<Value>> {
    if req.host.is_empty() || req.port == 0 || req.username.is_empty() || req.password.is_empty() {
        return Err(Error::Validation("all smtp fields are required"));
    }

    let settings = SmtpSettings {
        host: req.host,
        port: req.port,
        secure: req.secure,
        username: req.username,
        password: req.password,
    };
    accounts.save_smtp_settings(auth.id, &settings).await?;
    tracing::info!(user_id = %auth.id, host = %settings.host, "smtp settings saved");

    Ok(Json(json!({ "success": true, "data": SmtpView::from(settings) })))
}

async fn save_identity(
    auth: AuthUser,
    State(accounts): State<Arc<dyn AccountStore>>,
    JsonBody(req): JsonBody<IdentityRequest>,
) -> Result<Json<Value>> {
    if req.name.is_empty() || req.email.is_empty() {
        return Err(Error::Validation("name and email are required"));
    }

    let identity = SenderIdentity {
        name: req.name,
        email: req.email,
        reply_to: non_empty(req.reply_to),
        signature: non_empty(req.signature),
    };
    accounts.save_identity(auth.id, &identity).await?;

    Ok(Json(json!({ "success": true, "data": IdentityView::from(identity) })))
}
