use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use mailroom::auth::{hash_password, verify_password, AuthUser, JwtManager, Role};
use mailroom::request::null_as_default;
use mailroom::store::{UserRecord, UserStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::extract::JsonBody;
use crate::{AppState, Error, Result};

const MIN_PASSWORD_LEN: usize = 6;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/change-password", post(change_password))
}

/// Public view of an account.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    id: Uuid,
    username: String,
    name: String,
    role: Role,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<UserRecord> for UserView {
    fn from(user: UserRecord) -> Self {
        UserView {
            id: user.id,
            username: user.username,
            name: user.name,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    current_password: String,
    #[serde(default, deserialize_with = "null_as_default")]
    new_password: String,
}

async fn login(
    State(users): State<Arc<dyn UserStore>>,
    State(jwt): State<JwtManager>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<Value>> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(Error::Validation("username and password are required"));
    }

    let user = users
        .find_by_username(&req.username)
        .await?
        .ok_or(Error::InvalidCredentials)?;

    if !verify_password(req.password, user.password_hash.clone()).await? {
        tracing::info!(username = %req.username, "failed login");
        return Err(Error::InvalidCredentials);
    }

    let token = jwt.issue(&AuthUser {
        id: user.id,
        role: user.role,
    });
    tracing::info!(user_id = %user.id, "logged in");

    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": UserView::from(user),
    })))
}

async fn me(auth: AuthUser, State(users): State<Arc<dyn UserStore>>) -> Result<Json<Value>> {
    let user = users.find_by_id(auth.id).await?.ok_or(Error::UnknownUser)?;
    Ok(Json(json!({ "success": true, "user": UserView::from(user) })))
}

async fn change_password(
    auth: AuthUser,
    State(users): State<Arc<dyn UserStore>>,
    JsonBody(req): JsonBody<ChangePasswordRequest>,
) -> Result<Json<Value>> {
    if req.current_password.is_empty() || req.new_password.is_empty() {
        return Err(Error::Validation("current and new password are required"));
    }
    if req.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation("new password must be at least 6 characters"));
    }

    let user = users.find_by_id(auth.id).await?.ok_or(Error::UnknownUser)?;
    if !verify_password(req.current_password, user.password_hash).await? {
        return Err(Error::WrongPassword);
    }

    let password_hash = hash_password(req.new_password).await?;
    users.update_password(user.id, &password_hash).await?;

    Ok(Json(json!({ "success": true, "message": "password updated" })))
}
