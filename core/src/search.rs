//! Streaming substring search over a rollout transcript, bounded by an
//! event/byte/deadline budget. Budget exhaustion is a successful result
//! with flags set, never an error.

use std::path::Path;
use std::time::Duration;
use std::time::Instant;

use codex_agent_protocol::ContentItem;
use codex_agent_protocol::EventMsg;
use codex_agent_protocol::ResponseItem;
use codex_agent_protocol::RolloutItem;
use codex_agent_protocol::RolloutLine;
use codex_agent_protocol::parse_rollout_line;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufReadExt;

use crate::AgentError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchRole {
    User,
    Assistant,
    #[default]
    Both,
}

impl SearchRole {
    fn wants_user(self) -> bool {
        matches!(self, SearchRole::User | SearchRole::Both)
    }

    fn wants_assistant(self) -> bool {
        matches!(self, SearchRole::Assistant | SearchRole::Both)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchBudget {
    pub max_bytes: Option<u64>,
    pub max_events: Option<u64>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub role: SearchRole,
    pub case_sensitive: bool,
    pub budget: SearchBudget,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            role: SearchRole::Both,
            case_sensitive: false,
            budget: SearchBudget::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReport {
    pub matched: bool,
    pub match_count: u64,
    pub scanned_bytes: u64,
    pub scanned_events: u64,
    pub truncated: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Scan one rollout file. `Invalid` if the query is empty after trimming.
pub async fn search_rollout(path: &Path, query: &SearchQuery) -> Result<SearchReport> {
    let needle_raw = query.query.trim();
    if needle_raw.is_empty() {
        return Err(AgentError::Invalid("empty search query".to_string()));
    }
    let needle = if query.case_sensitive {
        needle_raw.to_string()
    } else {
        needle_raw.to_lowercase()
    };

    let started = Instant::now();
    let deadline = query.budget.timeout.map(|timeout| started + timeout);

    let mut report = SearchReport {
        matched: false,
        match_count: 0,
        scanned_bytes: 0,
        scanned_events: 0,
        truncated: false,
        timed_out: false,
        duration_ms: 0,
    };

    let file = tokio::fs::File::open(path).await?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();

    while let Some(raw) = lines.next_line().await? {
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            report.timed_out = true;
            break;
        }
        let Some(line) = parse_rollout_line(&raw) else {
            continue;
        };
        if let Some(max_events) = query.budget.max_events
            && report.scanned_events + 1 > max_events
        {
            report.truncated = true;
            break;
        }
        let texts = extract_texts(&line, query.role);
        let text_bytes: u64 = texts.iter().map(|text| text.len() as u64).sum();
        if let Some(max_bytes) = query.budget.max_bytes
            && report.scanned_bytes + text_bytes > max_bytes
        {
            report.truncated = true;
            break;
        }
        report.scanned_events += 1;
        report.scanned_bytes += text_bytes;
        for text in texts {
            report.match_count += count_occurrences(text, &needle, query.case_sensitive);
        }
    }

    report.matched = report.match_count > 0;
    report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Ok(report)
}

fn count_occurrences(text: &str, needle: &str, case_sensitive: bool) -> u64 {
    if case_sensitive {
        text.matches(needle).count() as u64
    } else {
        text.to_lowercase().matches(needle).count() as u64
    }
}

/// Searchable text carried by one record, filtered by role.
fn extract_texts(line: &RolloutLine, role: SearchRole) -> Vec<&str> {
    let mut texts = Vec::new();
    match &line.item {
        RolloutItem::EventMsg(msg) => match msg {
            EventMsg::UserMessage(user) if role.wants_user() => {
                texts.push(user.message.as_str());
            }
            EventMsg::AgentMessage(agent) if role.wants_assistant() => {
                texts.push(agent.message.as_str());
            }
            EventMsg::AgentReasoning(reasoning) if role.wants_assistant() => {
                texts.push(reasoning.text.as_str());
            }
            EventMsg::TurnComplete(complete) if role.wants_assistant() => {
                if let Some(last) = &complete.last_agent_message {
                    texts.push(last.as_str());
                }
            }
            _ => {}
        },
        RolloutItem::ResponseItem(item) => match item {
            ResponseItem::Message { role: item_role, content } => {
                let wanted = if item_role == "user" {
                    role.wants_user()
                } else {
                    role.wants_assistant()
                };
                if wanted {
                    for part in content {
                        match part {
                            ContentItem::InputText { text }
                            | ContentItem::OutputText { text } => texts.push(text.as_str()),
                            ContentItem::Other(_) => {}
                        }
                    }
                }
            }
            ResponseItem::Reasoning { summary } if role.wants_assistant() => {
                for part in summary {
                    texts.push(part.text.as_str());
                }
            }
            _ => {}
        },
        _ => {}
    }
    texts
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn agent_line(ts: usize, message: &str) -> String {
        serde_json::json!({
            "timestamp": format!("2025-05-01T12:00:{:02}Z", ts % 60),
            "type": "event_msg",
            "payload": {"type": "AgentMessage", "message": message},
        })
        .to_string()
    }

    fn user_line(message: &str) -> String {
        serde_json::json!({
            "timestamp": "2025-05-01T12:00:00Z",
            "type": "event_msg",
            "payload": {"type": "UserMessage", "message": message},
        })
        .to_string()
    }

    async fn write_transcript(lines: &[String]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.jsonl");
        tokio::fs::write(&path, lines.join("\n") + "\n").await.unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn budgeted_scan_stops_before_the_needle() {
        let mut lines: Vec<String> = (0..2000).map(|i| agent_line(i, "filler text")).collect();
        lines[1990] = agent_line(1990, "the needle is here");
        let (_dir, path) = write_transcript(&lines).await;

        let mut query = SearchQuery::new("needle");
        query.budget.max_events = Some(200);
        let report = search_rollout(&path, &query).await.unwrap();
        assert!(!report.matched);
        assert!(report.truncated);
        assert_eq!(report.scanned_events, 200);

        let unbudgeted = search_rollout(&path, &SearchQuery::new("needle"))
            .await
            .unwrap();
        assert!(unbudgeted.matched);
        assert_eq!(unbudgeted.match_count, 1);
        assert!(unbudgeted.scanned_events >= 1990);
        assert!(!unbudgeted.truncated);
    }

    #[tokio::test]
    async fn case_insensitive_by_default_and_counts_occurrences() {
        let (_dir, path) = write_transcript(&[
            agent_line(0, "Alpha alpha ALPHA"),
            user_line("alpha"),
        ])
        .await;

        let report = search_rollout(&path, &SearchQuery::new("alpha")).await.unwrap();
        assert_eq!(report.match_count, 4);

        let mut sensitive = SearchQuery::new("alpha");
        sensitive.case_sensitive = true;
        let report = search_rollout(&path, &sensitive).await.unwrap();
        assert_eq!(report.match_count, 2);
    }

    #[tokio::test]
    async fn role_filter_restricts_sources() {
        let (_dir, path) = write_transcript(&[
            user_line("target from user"),
            agent_line(0, "target from assistant"),
        ])
        .await;

        let mut user_only = SearchQuery::new("target");
        user_only.role = SearchRole::User;
        let report = search_rollout(&path, &user_only).await.unwrap();
        assert_eq!(report.match_count, 1);

        let mut assistant_only = SearchQuery::new("target");
        assistant_only.role = SearchRole::Assistant;
        let report = search_rollout(&path, &assistant_only).await.unwrap();
        assert_eq!(report.match_count, 1);
    }

    #[tokio::test]
    async fn response_item_text_is_searchable() {
        let line = serde_json::json!({
            "timestamp": "2025-05-01T12:00:00Z",
            "type": "response_item",
            "payload": {
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": "hidden gem"}],
            },
        })
        .to_string();
        let (_dir, path) = write_transcript(&[line]).await;
        let report = search_rollout(&path, &SearchQuery::new("gem")).await.unwrap();
        assert!(report.matched);
    }

    #[tokio::test]
    async fn byte_budget_truncates_deterministically() {
        let (_dir, path) = write_transcript(&[
            agent_line(0, "0123456789"),
            agent_line(1, "needle"),
        ])
        .await;
        let mut query = SearchQuery::new("needle");
        query.budget.max_bytes = Some(12);
        let report = search_rollout(&path, &query).await.unwrap();
        assert!(report.truncated);
        assert!(!report.matched);
        assert_eq!(report.scanned_events, 1);
        assert_eq!(report.scanned_bytes, 10);
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let (_dir, path) = write_transcript(&[agent_line(0, "x")]).await;
        let result = search_rollout(&path, &SearchQuery::new("   ")).await;
        assert!(matches!(result, Err(AgentError::Invalid(_))));
    }
}
