//! Folds a rollout into a single activity entry: what the session is doing
//! right now, and when that last changed.

use std::path::Path;

use codex_agent_protocol::ActivityEntry;
use codex_agent_protocol::ActivityStatus;
use codex_agent_protocol::EventMsg;
use codex_agent_protocol::ResponseItem;
use codex_agent_protocol::RolloutItem;
use codex_agent_protocol::RolloutLine;
use codex_agent_protocol::parse_rollout_line;
use tokio::io::AsyncBufReadExt;
use uuid::Uuid;

/// Pure fold, starting from `idle`. Each matching line moves the status and
/// stamps `updatedAt` with that line's timestamp.
pub fn fold_activity<'a>(
    session_id: Uuid,
    lines: impl IntoIterator<Item = &'a RolloutLine>,
) -> ActivityEntry {
    let mut status = ActivityStatus::Idle;
    let mut updated_at: Option<String> = None;
    for line in lines {
        let next = transition(&line.item);
        if let Some(next) = next {
            status = next;
            updated_at = Some(line.timestamp.clone());
        }
    }
    ActivityEntry {
        session_id,
        status,
        updated_at,
    }
}

/// Streaming fold over a rollout file on disk.
pub async fn fold_rollout_file(
    session_id: Uuid,
    path: &Path,
) -> std::io::Result<ActivityEntry> {
    let file = tokio::fs::File::open(path).await?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();
    let mut status = ActivityStatus::Idle;
    let mut updated_at: Option<String> = None;
    while let Some(raw) = lines.next_line().await? {
        let Some(line) = parse_rollout_line(&raw) else {
            continue;
        };
        if let Some(next) = transition(&line.item) {
            status = next;
            updated_at = Some(line.timestamp);
        }
    }
    Ok(ActivityEntry {
        session_id,
        status,
        updated_at,
    })
}

fn transition(item: &RolloutItem) -> Option<ActivityStatus> {
    match item {
        RolloutItem::EventMsg(msg) => match msg {
            EventMsg::TurnStarted(_) | EventMsg::ExecCommandBegin(_) => {
                Some(ActivityStatus::Running)
            }
            EventMsg::TurnComplete(_) | EventMsg::ExecCommandEnd(_) => Some(ActivityStatus::Idle),
            EventMsg::TurnAborted(_) | EventMsg::Error(_) => Some(ActivityStatus::Failed),
            _ => None,
        },
        RolloutItem::ResponseItem(ResponseItem::LocalShellCall { status, .. }) => {
            let lower = status.to_lowercase();
            if lower.contains("approval") || lower.contains("consent") {
                Some(ActivityStatus::WaitingApproval)
            } else if lower == "in_progress" || lower == "running" {
                Some(ActivityStatus::Running)
            } else {
                None
            }
        }
        _ => None,
    }
}
