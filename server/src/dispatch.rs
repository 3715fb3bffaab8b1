//! Glue between the pure route table and the handlers: request context,
//! boxed endpoint futures, and small parsing helpers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Bytes;
use axum::response::Response;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub type HandlerResult = Result<Response, ApiError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type HandlerFn = dyn Fn(Arc<AppState>, RequestCtx) -> HandlerFuture + Send + Sync;

/// One routable operation: the permission it requires (None for public
/// routes) plus the handler.
pub struct Endpoint {
    pub permission: Option<&'static str>,
    handler: Arc<HandlerFn>,
}

impl Endpoint {
    pub fn call(&self, state: Arc<AppState>, ctx: RequestCtx) -> HandlerFuture {
        (self.handler)(state, ctx)
    }
}

pub fn endpoint<F, Fut>(permission: Option<&'static str>, handler: F) -> Endpoint
where
    F: Fn(Arc<AppState>, RequestCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Endpoint {
        permission,
        handler: Arc::new(move |state, ctx| Box::pin(handler(state, ctx))),
    }
}

pub struct RequestCtx {
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl RequestCtx {
    pub fn param(&self, name: &str) -> Result<&str, ApiError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ApiError::internal(format!("route is missing :{name}")))
    }

    pub fn param_uuid(&self, name: &str) -> Result<Uuid, ApiError> {
        let raw = self.param(name)?;
        Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("{name} must be a UUID")))
    }

    pub fn query_str(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_usize(&self, name: &str) -> Result<Option<usize>, ApiError> {
        self.query_parse(name)
    }

    pub fn query_u64(&self, name: &str) -> Result<Option<u64>, ApiError> {
        self.query_parse(name)
    }

    pub fn query_bool(&self, name: &str) -> Result<Option<bool>, ApiError> {
        match self.query_str(name) {
            None => Ok(None),
            Some("true") | Some("1") => Ok(Some(true)),
            Some("false") | Some("0") => Ok(Some(false)),
            Some(other) => Err(ApiError::bad_request(format!(
                "{name} must be a boolean, got {other:?}"
            ))),
        }
    }

    fn query_parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, ApiError> {
        match self.query_str(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::bad_request(format!("invalid value for {name}"))),
        }
    }

    /// Deserialize the JSON body; an empty body reads as `{}` so routes
    /// with all-optional inputs accept bare POSTs.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let bytes: &[u8] = if self.body.is_empty() {
            b"{}"
        } else {
            &self.body
        };
        serde_json::from_slice(bytes)
            .map_err(|err| ApiError::bad_request(format!("malformed request body: {err}")))
    }
}

/// Minimal query-string parser; keys and values are percent-decoded.
pub fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut query = HashMap::new();
    let Some(raw) = raw else {
        return query;
    };
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map(std::borrow::Cow::into_owned);
        let value =
            urlencoding::decode(&value.replace('+', " ")).map(std::borrow::Cow::into_owned);
        if let (Ok(key), Ok(value)) = (key, value) {
            query.insert(key, value);
        }
    }
    query
}

/// 200 with a JSON payload.
pub fn json_ok<T: serde::Serialize>(value: &T) -> HandlerResult {
    let body = serde_json::to_string(value)
        .map_err(|err| ApiError::internal(format!("serialization failed: {err}")))?;
    Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body))
        .map_err(|err| ApiError::internal(err.to_string()))
}
