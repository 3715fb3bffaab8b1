//! HTTP + WebSocket surface of the codex-agent daemon: a path-parametric
//! route table dispatched from an axum fallback, bearer-token auth with
//! per-route permissions, CORS, and the `/ws` hub upgrade.

pub mod dispatch;
pub mod error;
mod handlers;
pub mod hub;
pub mod router;
mod routes;
pub mod state;

use std::sync::Arc;

use axum::extract::Request;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header;
use axum::middleware;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::dispatch::Endpoint;
use crate::dispatch::RequestCtx;
use crate::dispatch::parse_query;
use crate::error::ApiError;
use crate::router::Router;
use crate::state::AppState;

pub use crate::routes::route_table;

/// Generous enough for base64 image payloads; anything larger is a 400.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn build_app(state: Arc<AppState>) -> axum::Router {
    let table = Arc::new(route_table());
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    axum::Router::new()
        .route("/ws", axum::routing::get(ws_route))
        .fallback(move |state: State<Arc<AppState>>, request: Request| {
            let table = Arc::clone(&table);
            async move { dispatch_request(table, state.0, request).await }
        })
        .layer(cors)
        .layer(middleware::from_fn(preflight_status))
        .with_state(state)
}

async fn preflight_status(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let response = next.run(request).await;
    finalize_preflight(is_options, response)
}

/// The CORS layer answers preflights with 200; the surface contract is a
/// bodyless 204. Rewrites only responses that carry the preflight headers,
/// so a routed OPTIONS handler would pass through untouched.
fn finalize_preflight(is_options: bool, mut response: Response) -> Response {
    if is_options
        && response.status() == StatusCode::OK
        && response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS)
    {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

pub async fn serve(
    state: Arc<AppState>,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_route(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| {
        hub::handle_socket(
            Arc::clone(&state.hub),
            Arc::clone(&state.index),
            Arc::clone(&state.auth),
            socket,
        )
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn dispatch_request(
    table: Arc<Router<Endpoint>>,
    state: Arc<AppState>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let method = parts.method.as_str();

    let Some(matched) = table.match_route(method, &path) else {
        debug!("no route for {method} {path}");
        return ApiError::not_found(format!("no route for {method} {path}")).into_response();
    };

    if let Some(required) = matched.handler.permission {
        let Some(token) = bearer_token(&parts.headers) else {
            return ApiError::unauthorized("missing bearer token").into_response();
        };
        let verified = match state.auth.verify(token).await {
            Ok(verified) => verified,
            Err(err) => {
                debug!("token rejected for {method} {path}: {err}");
                return ApiError::unauthorized("invalid token").into_response();
            }
        };
        if !verified.allows(required) {
            return ApiError::forbidden(format!("requires {required}")).into_response();
        }
    }

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            return ApiError::bad_request(format!("unreadable request body: {err}"))
                .into_response();
        }
    };
    let ctx = RequestCtx {
        params: matched.params,
        query: parse_query(parts.uri.query()),
        body,
    };
    match matched.handler.call(state, ctx).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
