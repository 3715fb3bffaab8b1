use std::sync::Arc;

use chrono::Utc;
use codex_agent_protocol::Bookmark;
use codex_agent_protocol::BookmarkKind;
use serde::Deserialize;
use uuid::Uuid;

use crate::dispatch::HandlerResult;
use crate::dispatch::RequestCtx;
use crate::dispatch::json_ok;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_bookmarks(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let mut bookmarks = state.bookmarks.list().await;
    if let Some(raw) = ctx.query_str("sessionId") {
        let session_id = Uuid::parse_str(raw)
            .map_err(|_| ApiError::bad_request("sessionId must be a UUID"))?;
        bookmarks.retain(|bookmark| bookmark.session_id == session_id);
    }
    if let Some(tag) = ctx.query_str("tag") {
        bookmarks.retain(|bookmark| bookmark.tags.iter().any(|t| t == tag));
    }
    json_ok(&serde_json::json!({ "bookmarks": bookmarks }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookmarkBody {
    #[serde(rename = "type")]
    kind: BookmarkKind,
    session_id: Uuid,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    from_message_id: Option<String>,
    #[serde(default)]
    to_message_id: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub async fn create_bookmark(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let body: CreateBookmarkBody = ctx.json_body()?;
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("bookmark name must not be empty"));
    }
    // Tags keep insertion order, without duplicates.
    let mut tags: Vec<String> = Vec::new();
    for tag in body.tags {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    let now = Utc::now();
    let bookmark = Bookmark {
        id: Uuid::new_v4(),
        kind: body.kind,
        session_id: body.session_id,
        message_id: body.message_id,
        from_message_id: body.from_message_id,
        to_message_id: body.to_message_id,
        name: body.name,
        description: body.description,
        tags,
        created_at: now,
        updated_at: now,
    };
    let stored = state.bookmarks.add(bookmark).await?;
    json_ok(&stored)
}

pub async fn get_bookmark(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let id = ctx.param_uuid("id")?;
    let bookmark = state
        .bookmarks
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("bookmark {id} not found")))?;
    json_ok(&bookmark)
}

pub async fn delete_bookmark(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let id = ctx.param_uuid("id")?;
    let removed = state.bookmarks.delete(id).await?;
    json_ok(&serde_json::json!({ "deleted": removed.id }))
}
