use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::event_msg::EventMsg;
use crate::response_item::ResponseItem;

/// One record of a rollout file: an RFC3339 timestamp plus a tagged item.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RolloutLine {
    pub timestamp: String,
    #[serde(flatten)]
    pub item: RolloutItem,
}

/// The closed set of record kinds codex writes. Unknown `type` values fail
/// deserialization; the codec maps that failure to `None` so callers skip
/// the line.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RolloutItem {
    SessionMeta(SessionMetaLine),
    ResponseItem(ResponseItem),
    Compacted(Value),
    TurnContext(TurnContextItem),
    EventMsg(EventMsg),
}

/// Payload of the mandatory first record of every rollout file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionMetaLine {
    #[serde(flatten)]
    pub meta: SessionMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionMeta {
    pub id: Uuid,
    pub timestamp: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub originator: String,
    #[serde(default)]
    pub cli_version: String,
    #[serde(default)]
    pub source: SessionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Cli,
    #[serde(rename = "vscode")]
    VsCode,
    Exec,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SessionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionSource::Cli => "cli",
            SessionSource::VsCode => "vscode",
            SessionSource::Exec => "exec",
            SessionSource::Unknown => "unknown",
        }
    }

    pub fn from_db_str(value: &str) -> Self {
        match value {
            "cli" => SessionSource::Cli,
            "vscode" => SessionSource::VsCode,
            "exec" => SessionSource::Exec,
            _ => SessionSource::Unknown,
        }
    }
}

/// Repository snapshot recorded alongside the session metadata. Codex has
/// written both `sha`/`origin_url` and `commit_hash`/`repository_url`
/// spellings over time; both parse, the short form is written.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
    #[serde(
        default,
        alias = "commit_hash",
        skip_serializing_if = "Option::is_none"
    )]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(
        default,
        alias = "repository_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_url: Option<String>,
}

/// Per-turn context snapshot. The policy fields are kept loosely typed;
/// codex serializes them as either bare strings or structured objects
/// depending on version and this layer never interprets them.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TurnContextItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_policy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_mode: Option<Value>,
}

/// Parse one JSONL record. Returns `None` for malformed JSON or an
/// unrecognized envelope; the caller decides whether to skip or stop.
pub fn parse_rollout_line(line: &str) -> Option<RolloutLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_session_meta_line() {
        let line = r#"{"timestamp":"2025-05-01T12:00:00Z","type":"session_meta","payload":{"id":"6f9a1af5-3de0-4e6e-bb8a-6a7c1bd9fa44","timestamp":"2025-05-01T12:00:00Z","cwd":"/work/repo","originator":"codex_cli_rs","cli_version":"0.44.0","source":"cli","git":{"sha":"abc123","branch":"main"}}}"#;
        let parsed = parse_rollout_line(line).expect("line should parse");
        assert_eq!(parsed.timestamp, "2025-05-01T12:00:00Z");
        match parsed.item {
            RolloutItem::SessionMeta(meta_line) => {
                assert_eq!(
                    meta_line.meta.id.to_string(),
                    "6f9a1af5-3de0-4e6e-bb8a-6a7c1bd9fa44"
                );
                assert_eq!(meta_line.meta.source, SessionSource::Cli);
                assert_eq!(meta_line.git.unwrap().branch.as_deref(), Some("main"));
            }
            other => panic!("expected session_meta, got {other:?}"),
        }
    }

    #[test]
    fn accepts_long_git_field_spellings() {
        let git: GitInfo = serde_json::from_str(
            r#"{"commit_hash":"deadbeef","branch":"dev","repository_url":"git@host:repo.git"}"#,
        )
        .unwrap();
        assert_eq!(git.sha.as_deref(), Some("deadbeef"));
        assert_eq!(git.origin_url.as_deref(), Some("git@host:repo.git"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let line = r#"{"timestamp":"2025-05-01T12:00:00Z","type":"surprise","payload":{}}"#;
        assert!(parse_rollout_line(line).is_none());
    }

    #[test]
    fn malformed_json_is_rejected_without_panic() {
        assert!(parse_rollout_line("{not json").is_none());
        assert!(parse_rollout_line("").is_none());
        assert!(parse_rollout_line("   ").is_none());
    }

    #[test]
    fn unknown_event_subtype_passes_through() {
        let line = r#"{"timestamp":"2025-05-01T12:00:01Z","type":"event_msg","payload":{"type":"ShinyNewEvent","detail":42}}"#;
        let parsed = parse_rollout_line(line).expect("envelope is valid");
        match parsed.item {
            RolloutItem::EventMsg(EventMsg::Other(value)) => {
                assert_eq!(value["type"], "ShinyNewEvent");
                assert_eq!(value["detail"], 42);
            }
            other => panic!("expected opaque event, got {other:?}"),
        }
    }

    #[test]
    fn compacted_payload_is_opaque() {
        let line = r#"{"timestamp":"2025-05-01T12:00:02Z","type":"compacted","payload":{"message":"squashed"}}"#;
        let parsed = parse_rollout_line(line).expect("envelope is valid");
        assert!(matches!(parsed.item, RolloutItem::Compacted(_)));
    }
}
