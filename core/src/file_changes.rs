//! Infers which files a session touched from the commands recorded in its
//! rollout, and maintains the durable per-session file-change index.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use codex_agent_protocol::ChangedFile;
use codex_agent_protocol::EventMsg;
use codex_agent_protocol::FileChangeIndex;
use codex_agent_protocol::FileOperation;
use codex_agent_protocol::ResponseItem;
use codex_agent_protocol::RolloutItem;
use codex_agent_protocol::RolloutLine;
use codex_agent_protocol::parse_rollout_line;
use regex::Regex;
use tokio::io::AsyncBufReadExt;
use uuid::Uuid;

use crate::Result;
use crate::rollout_list::discover_rollout_files;

/// Prefix table, matched in declaration order against the space-joined
/// command; the first hit wins, anything else counts as a modification.
const PREFIX_RULES: &[(&str, FileOperation)] = &[
    ("rm ", FileOperation::Deleted),
    ("mv ", FileOperation::Modified),
    ("cp ", FileOperation::Modified),
    ("tee ", FileOperation::Modified),
    ("sed -i", FileOperation::Modified),
    ("apply_patch", FileOperation::Modified),
    ("git add ", FileOperation::Modified),
    ("git mv ", FileOperation::Modified),
    ("touch ", FileOperation::Created),
    ("cat >", FileOperation::Created),
    ("echo >", FileOperation::Created),
    ("git rm ", FileOperation::Deleted),
];

static PATH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(^|/)[A-Za-z0-9._-]+\.[A-Za-z0-9._-]+$").unwrap()
});

fn classify_command(joined: &str) -> FileOperation {
    for (prefix, operation) in PREFIX_RULES {
        if joined.starts_with(prefix) {
            return *operation;
        }
    }
    FileOperation::Modified
}

/// A token is a candidate file path iff it is not a flag, not a glob, not
/// quoted, and shaped like a dotted filename.
fn is_path_candidate(token: &str) -> bool {
    !token.starts_with('-')
        && !token.contains('*')
        && !token.starts_with('"')
        && !token.starts_with('\'')
        && PATH_TOKEN.is_match(token)
}

struct PathEntry {
    change: ChangedFile,
    ever_created: bool,
    /// A delete observed after a create is final.
    sticky_deleted: bool,
}

/// Accumulates per-path change records across the commands of one session,
/// preserving first-touch order.
#[derive(Default)]
pub struct FileChangeAccumulator {
    order: Vec<String>,
    by_path: HashMap<String, PathEntry>,
}

impl FileChangeAccumulator {
    pub fn observe_line(&mut self, line: &RolloutLine) {
        match &line.item {
            RolloutItem::EventMsg(EventMsg::ExecCommandBegin(begin)) => {
                self.observe_command(&begin.command, &line.timestamp);
            }
            // The begin event already counted the command; the end event
            // repeats the call id, not new work.
            RolloutItem::EventMsg(EventMsg::ExecCommandEnd(_)) => {}
            RolloutItem::ResponseItem(ResponseItem::LocalShellCall { action, .. }) => {
                self.observe_command(&action.command, &line.timestamp);
            }
            _ => {}
        }
    }

    pub fn observe_command(&mut self, argv: &[String], timestamp: &str) {
        if argv.is_empty() {
            return;
        }
        let joined = argv.join(" ");
        let operation = classify_command(&joined);
        for token in argv {
            if !is_path_candidate(token) {
                continue;
            }
            self.record(token, operation, timestamp);
        }
    }

    fn record(&mut self, path: &str, operation: FileOperation, timestamp: &str) {
        if let Some(entry) = self.by_path.get_mut(path) {
            entry.change.change_count += 1;
            entry.change.last_modified = timestamp.to_string();
            if operation == FileOperation::Created {
                entry.ever_created = true;
            }
            if operation == FileOperation::Deleted && entry.ever_created {
                entry.sticky_deleted = true;
            }
            // A delete after a create is final; otherwise the latest
            // operation wins.
            entry.change.operation = if entry.sticky_deleted {
                FileOperation::Deleted
            } else {
                operation
            };
        } else {
            self.order.push(path.to_string());
            self.by_path.insert(
                path.to_string(),
                PathEntry {
                    change: ChangedFile {
                        path: path.to_string(),
                        operation,
                        change_count: 1,
                        last_modified: timestamp.to_string(),
                    },
                    ever_created: operation == FileOperation::Created,
                    sticky_deleted: false,
                },
            );
        }
    }

    pub fn finish(mut self) -> Vec<ChangedFile> {
        self.order
            .iter()
            .filter_map(|path| self.by_path.remove(path))
            .map(|entry| entry.change)
            .collect()
    }
}

/// Pure fold over an in-memory line sequence.
pub fn extract_file_changes<'a>(
    lines: impl IntoIterator<Item = &'a RolloutLine>,
) -> Vec<ChangedFile> {
    let mut acc = FileChangeAccumulator::default();
    for line in lines {
        acc.observe_line(line);
    }
    acc.finish()
}

/// Stream one rollout file through the accumulator.
pub async fn session_changes(path: &Path) -> Result<Vec<ChangedFile>> {
    let file = tokio::fs::File::open(path).await?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();
    let mut acc = FileChangeAccumulator::default();
    while let Some(line) = lines.next_line().await? {
        if let Some(parsed) = parse_rollout_line(&line) {
            acc.observe_line(&parsed);
        }
    }
    Ok(acc.finish())
}

/// Rebuild the whole index by walking every discovered rollout. Sessions
/// whose rollouts yield no changes are left out of the index.
pub async fn rebuild_index(codex_home: &Path) -> Result<FileChangeIndex> {
    let mut index = FileChangeIndex::default();
    for file in discover_rollout_files(codex_home).await? {
        let changes = match session_changes(&file.path).await {
            Ok(changes) => changes,
            Err(err) => {
                tracing::debug!(
                    "skipping rollout {} while rebuilding file index: {err}",
                    file.path.display()
                );
                continue;
            }
        };
        if !changes.is_empty() {
            index.sessions.insert(file.id, changes);
        }
    }
    index.updated_at = Utc::now();
    Ok(index)
}

/// Sessions that touched `path`, by literal comparison of recorded tokens.
pub fn sessions_for_path<'a>(
    index: &'a FileChangeIndex,
    path: &str,
) -> Vec<(Uuid, &'a ChangedFile)> {
    index
        .sessions
        .iter()
        .flat_map(|(session_id, changes)| {
            changes
                .iter()
                .filter(|change| change.path == path)
                .map(|change| (*session_id, change))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn exec_line(ts: &str, call_id: &str, argv: &[&str]) -> RolloutLine {
        let command: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let json = serde_json::json!({
            "timestamp": ts,
            "type": "event_msg",
            "payload": {
                "type": "ExecCommandBegin",
                "call_id": call_id,
                "turn_id": "t1",
                "command": command,
                "cwd": "/work",
            },
        });
        parse_rollout_line(&json.to_string()).unwrap()
    }

    #[test]
    fn create_modify_delete_aggregation() {
        let lines = vec![
            exec_line("2025-05-01T12:00:00Z", "c1", &["touch", "src/new.ts"]),
            exec_line("2025-05-01T12:00:01Z", "c2", &["sed", "-i", "s/a/b/", "src/new.ts"]),
            exec_line("2025-05-01T12:00:02Z", "c3", &["rm", "src/old.ts"]),
        ];
        let changes = extract_file_changes(&lines);
        assert_eq!(
            changes,
            vec![
                ChangedFile {
                    path: "src/new.ts".to_string(),
                    operation: FileOperation::Modified,
                    change_count: 2,
                    last_modified: "2025-05-01T12:00:01Z".to_string(),
                },
                ChangedFile {
                    path: "src/old.ts".to_string(),
                    operation: FileOperation::Deleted,
                    change_count: 1,
                    last_modified: "2025-05-01T12:00:02Z".to_string(),
                },
            ]
        );
    }

    #[test]
    fn delete_sticks_after_create() {
        let lines = vec![
            exec_line("t1", "c1", &["touch", "a.rs"]),
            exec_line("t2", "c2", &["rm", "a.rs"]),
            exec_line("t3", "c3", &["git", "add", "a.rs"]),
        ];
        let changes = extract_file_changes(&lines);
        assert_eq!(changes[0].operation, FileOperation::Deleted);
        assert_eq!(changes[0].change_count, 3);
    }

    #[test]
    fn flags_globs_and_quoted_tokens_are_not_paths() {
        let lines = vec![exec_line(
            "t1",
            "c1",
            &["rm", "-rf", "*.log", "\"quoted.txt\"", "src/keep.rs"],
        )];
        let changes = extract_file_changes(&lines);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "src/keep.rs");
        assert_eq!(changes[0].operation, FileOperation::Deleted);
    }

    #[test]
    fn unknown_commands_default_to_modified() {
        let lines = vec![exec_line("t1", "c1", &["python", "scripts/gen.py"])];
        let changes = extract_file_changes(&lines);
        assert_eq!(changes[0].operation, FileOperation::Modified);
        assert_eq!(changes[0].path, "scripts/gen.py");
    }

    #[tokio::test]
    async fn rebuild_walks_every_rollout() {
        let home = tempfile::tempdir().unwrap();
        let day_dir = home.path().join("sessions/2025/05/01");
        tokio::fs::create_dir_all(&day_dir).await.unwrap();
        let id = "6f9a1af5-3de0-4e6e-bb8a-6a7c1bd9fa44";
        let meta = serde_json::json!({
            "timestamp": "2025-05-01T12:00:00Z",
            "type": "session_meta",
            "payload": {
                "id": id,
                "timestamp": "2025-05-01T12:00:00Z",
                "cwd": "/work",
                "originator": "codex_cli_rs",
                "cli_version": "0.44.0",
                "source": "cli",
            },
        });
        let exec = serde_json::json!({
            "timestamp": "2025-05-01T12:00:01Z",
            "type": "event_msg",
            "payload": {
                "type": "ExecCommandBegin",
                "call_id": "c1",
                "command": ["touch", "src/new.ts"],
            },
        });
        tokio::fs::write(
            day_dir.join(format!("rollout-2025-05-01T12-00-00-{id}.jsonl")),
            format!("{meta}\n{exec}\n"),
        )
        .await
        .unwrap();

        let index = rebuild_index(home.path()).await.unwrap();
        let session: uuid::Uuid = id.parse().unwrap();
        let changes = index.sessions.get(&session).unwrap();
        assert_eq!(changes[0].path, "src/new.ts");
        assert_eq!(changes[0].operation, FileOperation::Created);

        let hits = sessions_for_path(&index, "src/new.ts");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, session);
        assert!(sessions_for_path(&index, "src/other.ts").is_empty());
    }

    #[test]
    fn local_shell_calls_are_also_commands() {
        let json = serde_json::json!({
            "timestamp": "t9",
            "type": "response_item",
            "payload": {
                "type": "local_shell_call",
                "status": "completed",
                "action": {"command": ["touch", "notes.md"]},
            },
        });
        let line = parse_rollout_line(&json.to_string()).unwrap();
        let changes = extract_file_changes([&line]);
        assert_eq!(changes[0].path, "notes.md");
        assert_eq!(changes[0].operation, FileOperation::Created);
    }
}
