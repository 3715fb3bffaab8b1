use std::sync::Arc;

use crate::dispatch::HandlerResult;
use crate::dispatch::RequestCtx;
use crate::dispatch::json_ok;
use crate::state::AppState;

pub async fn health(_state: Arc<AppState>, _ctx: RequestCtx) -> HandlerResult {
    json_ok(&serde_json::json!({ "status": "ok" }))
}

pub async fn status(state: Arc<AppState>, _ctx: RequestCtx) -> HandlerResult {
    json_ok(&serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "codexHome": state.config.codex_home,
        "transport": state.config.transport.as_str(),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
}
