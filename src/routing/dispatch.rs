use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{health, models, v1, v2, RequestMeta};
use crate::error::GatewayError;
use crate::state::AppState;

/// Peer address of the connection a request arrived on, inserted as a
/// request extension by the accept loop.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteMatch<'a> {
    Health,
    Models,
    PullModel,
    DeleteModel(&'a str),
    Generate,
    Chat,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());

    let response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Models => models::handler(State(state)).await,
        RouteMatch::PullModel => {
            let body_bytes = match read_request_body(body, state.config.server.max_body_bytes).await
            {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            models::pull_handler(state, body_bytes, query_flag(parts.uri.query(), "stream")).await
        }
        RouteMatch::DeleteModel(name) => models::delete_handler(state, name).await,
        RouteMatch::Generate | RouteMatch::Chat => {
            let body_bytes = match read_request_body(body, state.config.server.max_body_bytes).await
            {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            let meta = RequestMeta {
                client_host: parts
                    .extensions
                    .get::<ClientAddr>()
                    .map(|addr| addr.0.ip().to_string()),
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
            };
            if route == RouteMatch::Generate {
                v1::handler(state, meta, body_bytes).await
            } else {
                v2::handler(state, meta, body_bytes).await
            }
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        let err = GatewayError::Validation(format!("Request body too large (max {limit} bytes)"));
        (StatusCode::PAYLOAD_TOO_LARGE, axum::Json(err.to_json())).into_response()
    })
}

/// Boolean query parameter; `true`, `1`, `yes` and `on` count as set.
fn query_flag(query: Option<&str>, key: &str) -> bool {
    query.is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes()).any(|(name, value)| {
            name == key
                && matches!(
                    value.to_ascii_lowercase().as_str(),
                    "true" | "1" | "yes" | "on"
                )
        })
    })
}

fn only<'a>(method: &Method, expected: &Method, route: RouteMatch<'a>) -> RouteMatch<'a> {
    if method == expected {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

pub(crate) fn match_route<'a>(method: &Method, path: &'a str, base_path: &str) -> RouteMatch<'a> {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path.trim_end_matches('/') {
        "/health" | "" => only(method, &Method::GET, RouteMatch::Health),
        "/api/v1/models" => only(method, &Method::GET, RouteMatch::Models),
        "/api/v1/models/pull" if *method == Method::POST => RouteMatch::PullModel,
        "/api/v1/generate" | "/api/v1/chat" => only(method, &Method::POST, RouteMatch::Generate),
        "/api/v2/chat" | "/api/v2/chat/completions" => {
            only(method, &Method::POST, RouteMatch::Chat)
        }
        other => match other.strip_prefix("/api/v1/models/") {
            Some(name) if !name.is_empty() => {
                only(method, &Method::DELETE, RouteMatch::DeleteModel(name))
            }
            _ => RouteMatch::NotFound,
        },
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}
