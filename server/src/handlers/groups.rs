use std::sync::Arc;

use codex_agent_core::group_run::GroupRunOptions;
use codex_agent_core::group_run::run_group;
use codex_agent_core::runner::ProcessOptions;
use codex_agent_protocol::SessionGroup;
use serde::Deserialize;
use uuid::Uuid;

use super::ndjson_response;
use crate::dispatch::HandlerResult;
use crate::dispatch::RequestCtx;
use crate::dispatch::json_ok;
use crate::error::ApiError;
use crate::state::AppState;

async fn resolve_group(state: &AppState, ctx: &RequestCtx) -> Result<SessionGroup, ApiError> {
    let key = ctx.param("id")?;
    state
        .groups
        .get(key)
        .await
        .ok_or_else(|| ApiError::not_found(format!("group {key} not found")))
}

pub async fn list_groups(state: Arc<AppState>, _ctx: RequestCtx) -> HandlerResult {
    json_ok(&serde_json::json!({ "groups": state.groups.list().await }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupBody {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    session_ids: Vec<Uuid>,
}

pub async fn create_group(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let body: CreateGroupBody = ctx.json_body()?;
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("group name must not be empty"));
    }
    let group = state
        .groups
        .create(body.name, body.description, body.session_ids)
        .await?;
    json_ok(&group)
}

pub async fn get_group(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    json_ok(&resolve_group(&state, &ctx).await?)
}

pub async fn delete_group(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let group = resolve_group(&state, &ctx).await?;
    let removed = state.groups.delete(group.id).await?;
    json_ok(&serde_json::json!({ "deleted": removed.id }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddSessionsBody {
    session_ids: Vec<Uuid>,
}

pub async fn add_group_sessions(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let group = resolve_group(&state, &ctx).await?;
    let body: AddSessionsBody = ctx.json_body()?;
    if body.session_ids.is_empty() {
        return Err(ApiError::bad_request("sessionIds must not be empty"));
    }
    let group = state.groups.add_sessions(group.id, body.session_ids).await?;
    json_ok(&group)
}

pub async fn remove_group_session(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let group = resolve_group(&state, &ctx).await?;
    let session_id = ctx.param_uuid("sessionId")?;
    let group = state.groups.remove_session(group.id, session_id).await?;
    json_ok(&group)
}

pub async fn pause_group(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let group = resolve_group(&state, &ctx).await?;
    json_ok(&state.groups.set_paused(group.id, true).await?)
}

pub async fn resume_group(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let group = resolve_group(&state, &ctx).await?;
    json_ok(&state.groups.set_paused(group.id, false).await?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunGroupBody {
    prompt: String,
    #[serde(default)]
    max_concurrent: Option<usize>,
    #[serde(default)]
    options: Option<ProcessOptions>,
}

/// Fan the prompt out across the group. The response streams the scheduler
/// events as NDJSON; dropping it cancels the run.
pub async fn run_group_handler(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let group = resolve_group(&state, &ctx).await?;
    let body: RunGroupBody = ctx.json_body()?;
    if body.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let mut options = GroupRunOptions {
        bin: state.config.agent_bin.clone(),
        ..Default::default()
    };
    if let Some(max_concurrent) = body.max_concurrent {
        if max_concurrent == 0 {
            return Err(ApiError::bad_request("maxConcurrent must be at least 1"));
        }
        options.max_concurrent = max_concurrent;
    }
    if let Some(process) = body.options {
        options.process = process;
    }
    let rx = run_group(group, body.prompt, options, Arc::clone(&state.groups))?;
    ndjson_response(rx)
}
