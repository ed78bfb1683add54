//! HTTP surface.
//!
//! Stateless axum handlers translating verbs into view operations, behind
//! a middleware chain: CORS, a ~1 MiB body limit, JSON content
//! negotiation, and bearer authentication for everything except the
//! explicitly public endpoints.

pub mod handlers;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::Auth;
use crate::errors::ApiError;
use crate::mail::Mailer;
use crate::view::registry::ViewRegistry;

/// Request bodies above this are rejected with 413.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared handler state, read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub views: Arc<ViewRegistry>,
    pub auth: Arc<Auth>,
    pub mailer: Arc<Mailer>,
}

/// The response side must be JSON-acceptable; mutating requests must
/// declare a JSON body.
async fn require_json(req: Request, next: Next) -> Response {
    if let Some(accept) = req.headers().get(ACCEPT).and_then(|v| v.to_str().ok()) {
        let accepts_json = accept
            .split(',')
            .map(|part| part.split(';').next().unwrap_or("").trim())
            .any(|mime| {
                mime == "application/json" || mime == "*/*" || mime == "application/*"
            });
        if !accepts_json {
            return ApiError::NotAcceptable.into_response();
        }
    }

    if matches!(req.method(), &Method::POST | &Method::PUT | &Method::PATCH) {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        if !is_json {
            return ApiError::UnsupportedMediaType.into_response();
        }
    }

    next.run(req).await
}

/// Decodes the bearer token and loads the authenticated user record for
/// downstream handlers.
async fn require_bearer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(token) = header.and_then(|h| state.auth.signer().strip_header(h)) else {
        return ApiError::Unauthorized.into_response();
    };

    match state.auth.authenticate(&state.views, token).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

fn cors_layer(allow_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
}

/// Builds the complete route tree.
///
/// ```text
/// /jwt-auth                 login (public)
/// /jwt-refresh              reissue token
/// /auth                     current user record
/// /config                   per-user view configs
/// /register-config          public register schema
/// /register                 create via register projection (public)
/// /anti-spam/               random challenge (public)
/// /mail-login               e-mail auto-login (public)
/// /{view}                   list, create
/// /{view}/self              self projection get, update
/// /{view}/{primary_key}     detail get, update, delete
/// ```
pub fn router(state: AppState, allow_origins: &[String]) -> Router {
    let public = Router::new()
        .route("/jwt-auth", post(handlers::jwt_auth))
        .route("/register-config", get(handlers::register_config))
        .route("/register", post(handlers::register))
        .route("/anti-spam/", get(handlers::anti_spam_challenge))
        .route("/mail-login", post(handlers::mail_login));

    let protected = Router::new()
        .route("/jwt-refresh", post(handlers::jwt_refresh))
        .route("/auth", get(handlers::current_user))
        .route("/config", get(handlers::user_config))
        .route(
            "/{view}",
            get(handlers::view_list).post(handlers::view_create),
        )
        .route(
            "/{view}/self",
            get(handlers::self_entry).patch(handlers::self_update),
        )
        .route(
            "/{view}/{primary_key}",
            get(handlers::view_detail)
                .patch(handlers::view_update)
                .delete(handlers::view_delete),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    public
        .merge(protected)
        .layer(middleware::from_fn(require_json))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(allow_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
