use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codex_agent_core::activity::fold_rollout_file;
use codex_agent_core::search::SearchQuery;
use codex_agent_core::search::SearchRole;
use codex_agent_core::search::search_rollout;
use codex_agent_core::sessions::PageRequest;
use codex_agent_core::sessions::SessionFilter;
use codex_agent_core::sessions::SortDir;
use codex_agent_core::sessions::SortKey;
use codex_agent_protocol::RolloutLine;
use codex_agent_protocol::SessionSource;
use codex_agent_protocol::parse_rollout_line;
use tokio::io::AsyncBufReadExt;

use crate::dispatch::HandlerResult;
use crate::dispatch::RequestCtx;
use crate::dispatch::json_ok;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_PAGE_LIMIT: usize = 500;
const DEFAULT_SEARCH_SESSIONS: usize = 20;

fn filter_from_query(ctx: &RequestCtx) -> Result<SessionFilter, ApiError> {
    let source = match ctx.query_str("source") {
        None => None,
        Some(raw) => {
            let source = SessionSource::from_db_str(raw);
            if source == SessionSource::Unknown && raw != "unknown" {
                return Err(ApiError::bad_request(format!("unknown source {raw:?}")));
            }
            Some(source)
        }
    };
    Ok(SessionFilter {
        source,
        cwd: ctx.query_str("cwd").map(PathBuf::from),
        git_branch: ctx.query_str("branch").map(str::to_string),
    })
}

fn sort_from_query(ctx: &RequestCtx) -> Result<(SortKey, SortDir), ApiError> {
    let key = match ctx.query_str("sortBy") {
        None | Some("created_at") => SortKey::CreatedAt,
        Some("updated_at") => SortKey::UpdatedAt,
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown sort key {other:?}")));
        }
    };
    let dir = match ctx.query_str("order") {
        None | Some("desc") => SortDir::Desc,
        Some("asc") => SortDir::Asc,
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown order {other:?}")));
        }
    };
    Ok((key, dir))
}

fn page_from_query(ctx: &RequestCtx) -> Result<PageRequest, ApiError> {
    let mut page = PageRequest::default();
    if let Some(limit) = ctx.query_usize("limit")? {
        page.limit = limit.min(MAX_PAGE_LIMIT);
    }
    if let Some(offset) = ctx.query_usize("offset")? {
        page.offset = offset;
    }
    Ok(page)
}

fn search_query_from_ctx(ctx: &RequestCtx) -> Result<SearchQuery, ApiError> {
    let raw = ctx
        .query_str("q")
        .ok_or_else(|| ApiError::bad_request("missing query parameter q"))?;
    let mut query = SearchQuery::new(raw);
    if query.query.trim().is_empty() {
        return Err(ApiError::bad_request("empty search query"));
    }
    query.role = match ctx.query_str("role") {
        None | Some("both") => SearchRole::Both,
        Some("user") => SearchRole::User,
        Some("assistant") => SearchRole::Assistant,
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown role {other:?}")));
        }
    };
    query.case_sensitive = ctx.query_bool("caseSensitive")?.unwrap_or(false);
    query.budget.max_bytes = ctx.query_u64("maxBytes")?;
    query.budget.max_events = ctx.query_u64("maxEvents")?;
    query.budget.timeout = ctx.query_u64("timeoutMs")?.map(Duration::from_millis);
    Ok(query)
}

pub async fn list_sessions(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let filter = filter_from_query(&ctx)?;
    let (sort_key, sort_dir) = sort_from_query(&ctx)?;
    let page = page_from_query(&ctx)?;
    let result = state.index.list(&filter, sort_key, sort_dir, page).await?;
    json_ok(&result)
}

pub async fn get_session(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let id = ctx.param_uuid("id")?;
    let session = state
        .index
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))?;
    let activity = fold_rollout_file(id, &session.rollout_path).await.ok();
    let mut body = serde_json::to_value(&session)
        .map_err(|err| ApiError::internal(err.to_string()))?;
    if let (Some(activity), Some(object)) = (activity, body.as_object_mut()) {
        object.insert(
            "activity".to_string(),
            serde_json::to_value(activity).map_err(|err| ApiError::internal(err.to_string()))?,
        );
    }
    json_ok(&body)
}

pub async fn session_events(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let id = ctx.param_uuid("id")?;
    let offset = ctx.query_usize("offset")?.unwrap_or(0);
    let limit = ctx.query_usize("limit")?.unwrap_or(200).min(2000);
    let path = state
        .index
        .rollout_path(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|err| ApiError::internal(format!("cannot read rollout: {err}")))?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();
    let mut events: Vec<RolloutLine> = Vec::new();
    let mut total = 0usize;
    while let Some(raw) = lines
        .next_line()
        .await
        .map_err(|err| ApiError::internal(format!("cannot read rollout: {err}")))?
    {
        let Some(parsed) = parse_rollout_line(&raw) else {
            continue;
        };
        if total >= offset && events.len() < limit {
            events.push(parsed);
        }
        total += 1;
    }
    json_ok(&serde_json::json!({
        "sessionId": id,
        "events": events,
        "offset": offset,
        "total": total,
    }))
}

pub async fn search_session(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let id = ctx.param_uuid("id")?;
    let query = search_query_from_ctx(&ctx)?;
    let path = state
        .index
        .rollout_path(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))?;
    let report = search_rollout(&path, &query).await?;
    json_ok(&serde_json::json!({ "sessionId": id, "report": report }))
}

/// Fan the transcript search across the newest sessions; each file gets the
/// caller's budget independently.
pub async fn search_sessions(state: Arc<AppState>, ctx: RequestCtx) -> HandlerResult {
    let query = search_query_from_ctx(&ctx)?;
    let max_sessions = ctx
        .query_usize("maxSessions")?
        .unwrap_or(DEFAULT_SEARCH_SESSIONS)
        .min(MAX_PAGE_LIMIT);
    let page = state
        .index
        .list(
            &SessionFilter::default(),
            SortKey::UpdatedAt,
            SortDir::Desc,
            PageRequest {
                limit: max_sessions,
                offset: 0,
            },
        )
        .await?;

    let mut results = Vec::new();
    for session in &page.sessions {
        match search_rollout(&session.rollout_path, &query).await {
            Ok(report) => results.push(serde_json::json!({
                "sessionId": session.id,
                "title": session.title,
                "report": report,
            })),
            Err(err) => {
                tracing::debug!("search skipped session {}: {err}", session.id);
            }
        }
    }
    json_ok(&serde_json::json!({
        "results": results,
        "scannedSessions": page.sessions.len(),
    }))
}
