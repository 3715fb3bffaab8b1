use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use codex_agent_core::queue_run::QueueRunOptions;
use codex_agent_core::queue_run::StopSignal;
use codex_agent_core::queue_run::run_queue;
use codex_agent_core::runner::ProcessOptions;
use codex_agent_protocol::PromptMode;
use codex_agent_protocol::PromptQueue;
use serde::Deserialize;

use super::ndjson_response;
use crate::dispatch::HandlerResult;
use crate::dispatch::RequestCtx;
use crate::dispatch::json_ok;
use crate::error::ApiError;
use crate::state::AppState;

async fn resolve_queue(state: &AppState, ctx: &RequestCtx) -> Result<PromptQueue, ApiError> {
    let key = ctx.param("id")?;
    state
        .queues
        .get(key)
        .await
        .ok_or_else(|| ApiError::not_found(format!("queue {key} not found")))
}

pub async fn list_queues(state: Arc<AppState>, _ctx: RequestCtx) -> HandlerResult {
    json_ok(&serde_json::json!({ "queues": state.queues.list().await }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueueBody {
    name: String,
    project_path: PathBuf,
}

pub async fn create_queue(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let body: CreateQueueBody = ctx.json_body()?;
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("queue name must not be empty"));
    }
    let queue = state.queues.create(body.name, body.project_path).await?;
    json_ok(&queue)
}

pub async fn get_queue(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    json_ok(&resolve_queue(&state, &ctx).await?)
}

pub async fn delete_queue(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    let removed = state.queues.delete(queue.id).await?;
    json_ok(&serde_json::json!({ "deleted": removed.id }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagePayload {
    data: String,
    #[serde(default)]
    extension: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPromptBody {
    prompt: String,
    #[serde(default)]
    mode: Option<PromptMode>,
    #[serde(default)]
    images: Vec<PathBuf>,
    #[serde(default)]
    images_base64: Vec<ImagePayload>,
}

/// Base64 payloads are spilled to disk before the prompt is stored; the
/// runner only ever sees file paths.
fn spill_images(state: &AppState, payloads: &[ImagePayload]) -> Result<Vec<PathBuf>, ApiError> {
    let dir = state.config.config_dir.join("images");
    std::fs::create_dir_all(&dir)
        .map_err(|err| ApiError::internal(format!("cannot create image dir: {err}")))?;
    let mut paths = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let bytes = STANDARD
            .decode(payload.data.as_bytes())
            .map_err(|err| ApiError::bad_request(format!("invalid base64 image: {err}")))?;
        let extension = payload.extension.as_deref().unwrap_or("png");
        let path = dir.join(format!("{}.{extension}", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes)
            .map_err(|err| ApiError::internal(format!("cannot write image: {err}")))?;
        paths.push(path);
    }
    Ok(paths)
}

pub async fn add_prompt(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    let body: AddPromptBody = ctx.json_body()?;
    if body.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let mut images = body.images;
    images.extend(spill_images(&state, &body.images_base64)?);
    let images = if images.is_empty() {
        None
    } else {
        Some(images)
    };
    let prompt = state
        .queues
        .add_prompt(
            queue.id,
            body.prompt,
            body.mode.unwrap_or_default(),
            images,
        )
        .await?;
    json_ok(&prompt)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePromptBody {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    mode: Option<PromptMode>,
}

pub async fn update_prompt(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    let prompt_id = ctx.param_uuid("promptId")?;
    let body: UpdatePromptBody = ctx.json_body()?;
    let prompt = state
        .queues
        .update_prompt(queue.id, prompt_id, body.prompt, body.mode)
        .await?;
    json_ok(&prompt)
}

pub async fn remove_prompt(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    let prompt_id = ctx.param_uuid("promptId")?;
    let removed = state.queues.remove_prompt(queue.id, prompt_id).await?;
    json_ok(&serde_json::json!({ "deleted": removed.id }))
}

#[derive(Deserialize)]
struct MovePromptBody {
    index: usize,
}

pub async fn move_prompt(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    let prompt_id = ctx.param_uuid("promptId")?;
    let body: MovePromptBody = ctx.json_body()?;
    let queue = state
        .queues
        .move_prompt(queue.id, prompt_id, body.index)
        .await?;
    json_ok(&queue)
}

pub async fn pause_queue(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    json_ok(&state.queues.set_paused(queue.id, true).await?)
}

pub async fn resume_queue(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    json_ok(&state.queues.set_paused(queue.id, false).await?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunQueueBody {
    #[serde(default)]
    options: Option<ProcessOptions>,
}

/// Drain the queue sequentially, streaming events as NDJSON. The stop
/// signal is registered so `POST /:id/stop` can end the run after the
/// in-flight prompt.
pub async fn run_queue_handler(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    let body: RunQueueBody = ctx.json_body()?;
    let mut options = QueueRunOptions {
        bin: state.config.agent_bin.clone(),
        ..Default::default()
    };
    if let Some(process) = body.options {
        options.process = process;
    }
    let stop = StopSignal::new();
    state
        .queue_stops
        .lock()
        .await
        .insert(queue.id, stop.clone());
    let rx = run_queue(queue.id, Arc::clone(&state.queues), options, stop).await?;
    ndjson_response(rx)
}

pub async fn stop_queue(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let queue = resolve_queue(&state, &ctx).await?;
    let stops = state.queue_stops.lock().await;
    let Some(stop) = stops.get(&queue.id) else {
        return Err(ApiError::not_found(format!(
            "queue {} has no active run",
            queue.id
        )));
    };
    stop.stop();
    json_ok(&serde_json::json!({ "stopping": queue.id }))
}
