use std::sync::Arc;

use codex_agent_core::file_changes::rebuild_index;
use codex_agent_core::file_changes::sessions_for_path;

use crate::dispatch::HandlerResult;
use crate::dispatch::RequestCtx;
use crate::dispatch::json_ok;
use crate::error::ApiError;
use crate::state::AppState;

/// Which sessions touched a path, per the durable index. Comparison is
/// literal against the tokens recorded from commands.
pub async fn find_file(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let path = ctx
        .query_str("path")
        .ok_or_else(|| ApiError::bad_request("missing query parameter path"))?;
    if path.is_empty() {
        return Err(ApiError::bad_request("path must not be empty"));
    }
    let index = state.files.load().await;
    let sessions: Vec<serde_json::Value> = sessions_for_path(&index, path)
        .into_iter()
        .map(|(session_id, change)| {
            serde_json::json!({ "sessionId": session_id, "change": change })
        })
        .collect();
    json_ok(&serde_json::json!({ "path": path, "sessions": sessions }))
}

pub async fn session_files(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let id = ctx.param_uuid("id")?;
    let files = state.files.session(id).await.unwrap_or_default();
    json_ok(&serde_json::json!({ "sessionId": id, "files": files }))
}

/// Rebuild the index from every discovered rollout and persist it.
pub async fn rebuild_files(state: Arc<AppState>, _ctx: RequestCtx) -> HandlerResult {
    let index = rebuild_index(&state.config.codex_home).await?;
    let stored = state.files.replace(index).await?;
    json_ok(&serde_json::json!({
        "sessions": stored.sessions.len(),
        "updatedAt": stored.updated_at,
    }))
}
