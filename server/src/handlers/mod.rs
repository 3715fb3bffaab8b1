pub mod bookmarks;
pub mod files;
pub mod groups;
pub mod meta;
pub mod queues;
pub mod sessions;

use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::Response;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::dispatch::HandlerResult;
use crate::error::ApiError;

/// Stream a run's events as newline-delimited JSON. The client dropping
/// the response body closes the channel, which the producer observes on
/// its next send; that is the cancellation path.
pub fn ndjson_response<T: Serialize + Send + 'static>(
    rx: tokio::sync::mpsc::Receiver<T>,
) -> HandlerResult {
    let stream = ReceiverStream::new(rx).map(|event| {
        let mut line = serde_json::to_string(&event).unwrap_or_default();
        line.push('\n');
        Ok::<_, std::convert::Infallible>(line)
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::internal(err.to_string()))
}
