//! Route handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{json, Value};
use tracing::info;

use crate::errors::{ApiError, Result};
use crate::http::AppState;
use crate::view::{AuthUser, JsonMap, View};

fn body_object(body: &Value) -> Result<&JsonMap> {
    body.as_object()
        .ok_or_else(|| ApiError::bad_request("expected a JSON object"))
}

fn body_str<'a>(body: &'a JsonMap, key: &str) -> Result<&'a str> {
    body.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::field(key, "missing or not a string"))
}

fn resolve_view<'a>(state: &'a AppState, key: &str) -> Result<&'a View> {
    state.views.get(key).ok_or(ApiError::NotFound)
}

/// POST /jwt-auth
pub async fn jwt_auth(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response> {
    let body = body_object(&body)?;
    let username = body_str(body, "username")?;
    let password = body_str(body, "password")?;
    let response = state.auth.login(&state.views, username, password).await?;
    Ok(Json(response).into_response())
}

/// POST /jwt-refresh
pub async fn jwt_refresh(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response> {
    let primary_key = user.primary_key().ok_or(ApiError::Unauthorized)?;
    let response = state.auth.relogin(&state.views, primary_key).await?;
    Ok(Json(response).into_response())
}

/// GET /auth
pub async fn current_user(Extension(user): Extension<AuthUser>) -> Response {
    Json(Value::Object(user.0)).into_response()
}

/// GET /config
pub async fn user_config(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    let configs: Vec<Value> = state
        .views
        .views()
        .map(|view| view.user_config(&user))
        .collect();
    Json(Value::Array(configs)).into_response()
}

/// GET /register-config
pub async fn register_config(State(state): State<AppState>) -> Result<Response> {
    let view = state
        .views
        .get(state.auth.view_key())
        .ok_or(ApiError::NotFound)?;
    Ok(Json(view.public_config().unwrap_or(Value::Null)).into_response())
}

/// POST /register
pub async fn register(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response> {
    let body = body_object(&body)?;
    state.auth.anti_spam().verify_answer(
        body.get("antiSpamToken").and_then(|v| v.as_str()),
        body.get("antiSpamAnswer").and_then(|v| v.as_str()),
    )?;

    let view = state
        .views
        .get(state.auth.view_key())
        .ok_or(ApiError::NotFound)?;
    view.create_register(&state.views, body).await?;
    info!("Registered new account");
    Ok(StatusCode::OK.into_response())
}

/// GET /anti-spam/
pub async fn anti_spam_challenge(State(state): State<AppState>) -> Response {
    Json(state.auth.anti_spam().challenge()).into_response()
}

/// POST /mail-login
pub async fn mail_login(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response> {
    let body = body_object(&body)?;
    let email = body_str(body, "email")?;

    let primary_key = state.auth.resolve_mail(&state.views, email).await?;
    let token = state.auth.auto_login(&state.views, &primary_key).await?;
    state.mailer.send_auto_login(email, &token).await?;
    Ok(StatusCode::OK.into_response())
}

/// GET /{view}
pub async fn view_list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(view_key): Path<String>,
) -> Result<Response> {
    let view = resolve_view(&state, &view_key)?;
    let entries = view.get_list(&user).await?;
    Ok(Json(entries).into_response())
}

/// POST /{view}
pub async fn view_create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(view_key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response> {
    let view = resolve_view(&state, &view_key)?;
    view.create_detail(&state.views, &user, body_object(&body)?).await?;
    Ok(StatusCode::OK.into_response())
}

/// GET /{view}/{primary_key}
pub async fn view_detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((view_key, primary_key)): Path<(String, String)>,
) -> Result<Response> {
    let view = resolve_view(&state, &view_key)?;
    let entry = view.get_detail_entry(&state.views, &user, &primary_key).await?;
    Ok(Json(Value::Object(entry)).into_response())
}

/// PATCH /{view}/{primary_key}
///
/// When callers edit their own entry the response carries a refreshed
/// token, because the edit may have rotated the timestamp attribute the
/// old token was bound to.
pub async fn view_update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((view_key, primary_key)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response> {
    let view = resolve_view(&state, &view_key)?;
    view.update_details(&state.views, &user, &primary_key, body_object(&body)?)
        .await?;

    if user.primary_key() == Some(primary_key.as_str()) {
        let response = state.auth.relogin(&state.views, &primary_key).await?;
        return Ok(Json(response).into_response());
    }
    Ok(StatusCode::OK.into_response())
}

/// DELETE /{view}/{primary_key}
pub async fn view_delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((view_key, primary_key)): Path<(String, String)>,
) -> Result<Response> {
    let view = resolve_view(&state, &view_key)?;
    view.delete(&user, &primary_key).await?;
    Ok(StatusCode::OK.into_response())
}

/// GET /{view}/self
pub async fn self_entry(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(view_key): Path<String>,
) -> Result<Response> {
    let view = resolve_view(&state, &view_key)?;
    let entry = view.get_self_entry(&state.views, &user).await?;
    Ok(Json(Value::Object(entry)).into_response())
}

/// PATCH /{view}/self
pub async fn self_update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(view_key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response> {
    let view = resolve_view(&state, &view_key)?;
    view.update_self(&state.views, &user, body_object(&body)?).await?;

    let primary_key = user.primary_key().ok_or(ApiError::Unauthorized)?;
    let response = state.auth.relogin(&state.views, primary_key).await?;
    Ok(Json(json!({"token": response.token, "user": response.user})).into_response())
}
