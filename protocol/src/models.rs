//! Management-layer data model served over the HTTP/WebSocket API and
//! persisted in the durable JSON documents. Client-facing field names are
//! camelCase; the rollout wire types in the sibling modules stay snake_case.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::rollout::GitInfo;
use crate::rollout::SessionSource;

/// One recorded run of the external agent, derived from the rollout head
/// plus filesystem stat. Immutable from this layer's perspective.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub rollout_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: SessionSource,
    pub cwd: PathBuf,
    pub cli_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    /// First user message when one was recorded, otherwise the id.
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_user_message: Option<String>,
    /// Set iff the rollout lives under the archived subtree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    pub total: usize,
}

/// A named, ordered set of existing session ids used as fan-out targets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionGroup {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub paused: bool,
    /// Insertion-ordered, duplicate-free.
    pub session_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A FIFO of prompts drained sequentially against one working directory.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PromptQueue {
    pub id: Uuid,
    pub name: String,
    pub project_path: PathBuf,
    pub prompts: Vec<QueuePrompt>,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueuePrompt {
    pub id: Uuid,
    pub prompt: String,
    pub status: PromptStatus,
    #[serde(default)]
    pub mode: PromptMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PromptResult>,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<PathBuf>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub exit_code: i32,
}

/// A named reference into the session corpus: a whole session, one message,
/// or a message range.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: BookmarkKind,
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_message_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkKind {
    Session,
    Message,
    Range,
}

impl Bookmark {
    /// Type-conditioned field invariants: `session` forbids message/range
    /// fields, `message` requires `messageId` and forbids the range pair,
    /// `range` requires both endpoints and forbids `messageId`.
    pub fn validate(&self) -> Result<(), String> {
        let has_range = self.from_message_id.is_some() || self.to_message_id.is_some();
        match self.kind {
            BookmarkKind::Session => {
                if self.message_id.is_some() || has_range {
                    return Err("session bookmarks carry no message fields".to_string());
                }
            }
            BookmarkKind::Message => {
                if self.message_id.is_none() {
                    return Err("message bookmarks require messageId".to_string());
                }
                if has_range {
                    return Err("message bookmarks carry no range fields".to_string());
                }
            }
            BookmarkKind::Range => {
                if self.from_message_id.is_none() || self.to_message_id.is_none() {
                    return Err("range bookmarks require both endpoints".to_string());
                }
                if self.message_id.is_some() {
                    return Err("range bookmarks carry no messageId".to_string());
                }
            }
        }
        Ok(())
    }
}

/// A capability-token record. The secret itself is never stored; only the
/// SHA-256 of it survives.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    pub token_hash: String,
}

/// Per-session aggregation of files the agent touched, inferred from the
/// commands in its rollout.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeIndex {
    pub sessions: BTreeMap<Uuid, Vec<ChangedFile>>,
    pub updated_at: DateTime<Utc>,
}

impl Default for FileChangeIndex {
    fn default() -> Self {
        Self {
            sessions: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFile {
    pub path: String,
    pub operation: FileOperation,
    pub change_count: u64,
    /// Timestamp of the rollout line that last touched the path.
    pub last_modified: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Created,
    Modified,
    Deleted,
}

/// One-entry projection of a rollout: what the session is doing right now.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub session_id: Uuid,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Idle,
    Running,
    WaitingApproval,
    Failed,
}

/// Snapshot of the four scheduler sets, attached to every group-run event.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRunSets {
    pub pending: Vec<Uuid>,
    pub running: Vec<Uuid>,
    pub completed: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GroupRunEvent {
    SessionStarted {
        session_id: Uuid,
        sets: GroupRunSets,
    },
    SessionCompleted {
        session_id: Uuid,
        exit_code: i32,
        sets: GroupRunSets,
    },
    SessionFailed {
        session_id: Uuid,
        exit_code: i32,
        sets: GroupRunSets,
    },
    GroupCompleted {
        sets: GroupRunSets,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum QueueRunEvent {
    PromptStarted {
        prompt_id: Uuid,
    },
    PromptCompleted {
        prompt_id: Uuid,
        exit_code: i32,
    },
    PromptFailed {
        prompt_id: Uuid,
        exit_code: i32,
    },
    QueueStopped {
        completed: Vec<Uuid>,
        pending: Vec<Uuid>,
        failed: Vec<Uuid>,
    },
    QueueCompleted,
}
