//! Durable JSON documents under the config dir: groups, queues, bookmarks,
//! tokens, and the file-change index.
//!
//! Writes are atomic at the process-crash level: serialize to a randomly
//! suffixed temp file in the same directory, fsync best effort, rename over
//! the target. Loads tolerate missing or corrupt files by yielding the
//! empty default. Each document has exactly one logical writer; in-process
//! read-modify-write cycles are serialized by a per-document mutex.

use std::io;
use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;

use chrono::Utc;
use codex_agent_protocol::Bookmark;
use codex_agent_protocol::ChangedFile;
use codex_agent_protocol::FileChangeIndex;
use codex_agent_protocol::PromptMode;
use codex_agent_protocol::PromptQueue;
use codex_agent_protocol::PromptResult;
use codex_agent_protocol::PromptStatus;
use codex_agent_protocol::QueuePrompt;
use codex_agent_protocol::SessionGroup;
use codex_agent_protocol::TokenRecord;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::AgentError;
use crate::Result;
use crate::config::AgentConfig;

pub struct DocStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Default + Serialize + DeserializeOwned> DocStore<T> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            _doc: PhantomData,
        }
    }

    /// Missing file and malformed JSON both yield the empty default.
    pub async fn load(&self) -> T {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }

    pub async fn save(&self, doc: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        write_atomically(self.path.clone(), bytes).await
    }

    /// Serialized read-modify-write. The mutation may refuse (e.g. id not
    /// found), in which case nothing is written.
    pub async fn try_update<R>(&self, mutate: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await;
        let out = mutate(&mut doc)?;
        self.save(&doc).await?;
        Ok(out)
    }
}

async fn write_atomically(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::other("document path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".doc-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(&bytes)?;
        let _ = tmp.as_file().sync_all();
        tmp.persist(&path).map_err(|err| err.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)??;
    Ok(())
}

fn push_unique(ids: &mut Vec<Uuid>, new_ids: impl IntoIterator<Item = Uuid>) {
    for id in new_ids {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Groups

#[derive(Debug, Default, Serialize, serde::Deserialize)]
pub struct GroupsDoc {
    #[serde(default)]
    pub groups: Vec<SessionGroup>,
}

pub struct GroupStore {
    store: DocStore<GroupsDoc>,
}

impl GroupStore {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            store: DocStore::new(config.groups_path()),
        }
    }

    pub async fn list(&self) -> Vec<SessionGroup> {
        self.store.load().await.groups
    }

    /// Lookup by id, or by name as an alias.
    pub async fn get(&self, key: &str) -> Option<SessionGroup> {
        let groups = self.store.load().await.groups;
        if let Ok(id) = Uuid::parse_str(key) {
            return groups.into_iter().find(|group| group.id == id);
        }
        groups.into_iter().find(|group| group.name == key)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Option<SessionGroup> {
        self.store
            .load()
            .await
            .groups
            .into_iter()
            .find(|group| group.id == id)
    }

    pub async fn create(
        &self,
        name: String,
        description: Option<String>,
        session_ids: Vec<Uuid>,
    ) -> Result<SessionGroup> {
        self.store
            .try_update(|doc| {
                if doc.groups.iter().any(|group| group.name == name) {
                    return Err(AgentError::Conflict(format!(
                        "group name {name:?} is already taken"
                    )));
                }
                let now = Utc::now();
                let mut ids = Vec::new();
                push_unique(&mut ids, session_ids.iter().copied());
                let group = SessionGroup {
                    id: Uuid::new_v4(),
                    name: name.clone(),
                    description: description.clone(),
                    paused: false,
                    session_ids: ids,
                    created_at: now,
                    updated_at: now,
                };
                doc.groups.push(group.clone());
                Ok(group)
            })
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<SessionGroup> {
        self.store
            .try_update(|doc| {
                let idx = doc
                    .groups
                    .iter()
                    .position(|group| group.id == id)
                    .ok_or_else(|| AgentError::NotFound(format!("group {id}")))?;
                Ok(doc.groups.remove(idx))
            })
            .await
    }

    pub async fn add_sessions(&self, id: Uuid, session_ids: Vec<Uuid>) -> Result<SessionGroup> {
        self.mutate_group(id, |group| {
            push_unique(&mut group.session_ids, session_ids.iter().copied());
        })
        .await
    }

    pub async fn remove_session(&self, id: Uuid, session_id: Uuid) -> Result<SessionGroup> {
        self.mutate_group(id, |group| {
            group.session_ids.retain(|existing| *existing != session_id);
        })
        .await
    }

    pub async fn set_paused(&self, id: Uuid, paused: bool) -> Result<SessionGroup> {
        self.mutate_group(id, |group| group.paused = paused).await
    }

    async fn mutate_group(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut SessionGroup),
    ) -> Result<SessionGroup> {
        self.store
            .try_update(|doc| {
                let group = doc
                    .groups
                    .iter_mut()
                    .find(|group| group.id == id)
                    .ok_or_else(|| AgentError::NotFound(format!("group {id}")))?;
                mutate(group);
                group.updated_at = Utc::now();
                Ok(group.clone())
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Queues

#[derive(Debug, Default, Serialize, serde::Deserialize)]
pub struct QueuesDoc {
    #[serde(default)]
    pub queues: Vec<PromptQueue>,
}

pub struct QueueStore {
    store: DocStore<QueuesDoc>,
}

impl QueueStore {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            store: DocStore::new(config.queues_path()),
        }
    }

    pub async fn list(&self) -> Vec<PromptQueue> {
        self.store.load().await.queues
    }

    pub async fn get(&self, key: &str) -> Option<PromptQueue> {
        let queues = self.store.load().await.queues;
        if let Ok(id) = Uuid::parse_str(key) {
            return queues.into_iter().find(|queue| queue.id == id);
        }
        queues.into_iter().find(|queue| queue.name == key)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Option<PromptQueue> {
        self.store
            .load()
            .await
            .queues
            .into_iter()
            .find(|queue| queue.id == id)
    }

    pub async fn create(&self, name: String, project_path: PathBuf) -> Result<PromptQueue> {
        self.store
            .try_update(|doc| {
                if doc.queues.iter().any(|queue| queue.name == name) {
                    return Err(AgentError::Conflict(format!(
                        "queue name {name:?} is already taken"
                    )));
                }
                let queue = PromptQueue {
                    id: Uuid::new_v4(),
                    name: name.clone(),
                    project_path: project_path.clone(),
                    prompts: Vec::new(),
                    paused: false,
                    created_at: Utc::now(),
                };
                doc.queues.push(queue.clone());
                Ok(queue)
            })
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<PromptQueue> {
        self.store
            .try_update(|doc| {
                let idx = doc
                    .queues
                    .iter()
                    .position(|queue| queue.id == id)
                    .ok_or_else(|| AgentError::NotFound(format!("queue {id}")))?;
                Ok(doc.queues.remove(idx))
            })
            .await
    }

    pub async fn set_paused(&self, id: Uuid, paused: bool) -> Result<PromptQueue> {
        self.mutate_queue(id, |queue| {
            queue.paused = paused;
            Ok(queue.clone())
        })
        .await
    }

    pub async fn add_prompt(
        &self,
        queue_id: Uuid,
        prompt: String,
        mode: PromptMode,
        images: Option<Vec<PathBuf>>,
    ) -> Result<QueuePrompt> {
        let added = QueuePrompt {
            id: Uuid::new_v4(),
            prompt,
            status: PromptStatus::Pending,
            mode,
            result: None,
            added_at: Utc::now(),
            started_at: None,
            completed_at: None,
            images,
        };
        let to_insert = added.clone();
        self.mutate_queue(queue_id, move |queue| {
            queue.prompts.push(to_insert);
            Ok(())
        })
        .await?;
        Ok(added)
    }

    /// Edits apply to the stored prompt; a currently running process is not
    /// interrupted and sees the edit only on its next observation.
    pub async fn update_prompt(
        &self,
        queue_id: Uuid,
        prompt_id: Uuid,
        text: Option<String>,
        mode: Option<PromptMode>,
    ) -> Result<QueuePrompt> {
        self.mutate_prompt(queue_id, prompt_id, |prompt| {
            if let Some(text) = text {
                prompt.prompt = text;
            }
            if let Some(mode) = mode {
                prompt.mode = mode;
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_prompt(&self, queue_id: Uuid, prompt_id: Uuid) -> Result<QueuePrompt> {
        self.mutate_queue(queue_id, |queue| {
            let idx = queue
                .prompts
                .iter()
                .position(|prompt| prompt.id == prompt_id)
                .ok_or_else(|| AgentError::NotFound(format!("prompt {prompt_id}")))?;
            Ok(queue.prompts.remove(idx))
        })
        .await
    }

    /// Reorder a prompt. `pending -> pending` moves leave timestamps alone.
    pub async fn move_prompt(
        &self,
        queue_id: Uuid,
        prompt_id: Uuid,
        new_index: usize,
    ) -> Result<PromptQueue> {
        self.mutate_queue(queue_id, |queue| {
            let idx = queue
                .prompts
                .iter()
                .position(|prompt| prompt.id == prompt_id)
                .ok_or_else(|| AgentError::NotFound(format!("prompt {prompt_id}")))?;
            let prompt = queue.prompts.remove(idx);
            let target = new_index.min(queue.prompts.len());
            queue.prompts.insert(target, prompt);
            Ok(())
        })
        .await?;
        self.get_by_id(queue_id)
            .await
            .ok_or_else(|| AgentError::NotFound(format!("queue {queue_id}")))
    }

    /// `pending -> running`; refuses while another prompt is running so the
    /// single-runner invariant also holds in the persisted snapshots.
    pub async fn mark_running(&self, queue_id: Uuid, prompt_id: Uuid) -> Result<QueuePrompt> {
        self.mutate_queue(queue_id, |queue| {
            if let Some(running) = queue
                .prompts
                .iter()
                .find(|prompt| prompt.status == PromptStatus::Running)
            {
                return Err(AgentError::Conflict(format!(
                    "prompt {} is already running",
                    running.id
                )));
            }
            let prompt = queue
                .prompts
                .iter_mut()
                .find(|prompt| prompt.id == prompt_id)
                .ok_or_else(|| AgentError::NotFound(format!("prompt {prompt_id}")))?;
            if prompt.status != PromptStatus::Pending {
                return Err(AgentError::Conflict(format!(
                    "prompt {prompt_id} is not pending"
                )));
            }
            prompt.status = PromptStatus::Running;
            prompt.started_at = Some(Utc::now());
            Ok(prompt.clone())
        })
        .await
    }

    /// `running -> pending`, for a run that was cancelled before its child
    /// ever spawned.
    pub async fn reset_running(&self, queue_id: Uuid, prompt_id: Uuid) -> Result<QueuePrompt> {
        self.mutate_prompt(queue_id, prompt_id, |prompt| {
            if prompt.status != PromptStatus::Running {
                return Err(AgentError::Conflict(format!(
                    "prompt {prompt_id} is not running"
                )));
            }
            prompt.status = PromptStatus::Pending;
            prompt.started_at = None;
            Ok(())
        })
        .await
    }

    /// `running -> completed | failed` with the exit code recorded.
    pub async fn mark_finished(
        &self,
        queue_id: Uuid,
        prompt_id: Uuid,
        exit_code: i32,
    ) -> Result<QueuePrompt> {
        self.mutate_prompt(queue_id, prompt_id, |prompt| {
            if prompt.status != PromptStatus::Running {
                return Err(AgentError::Conflict(format!(
                    "prompt {prompt_id} is not running"
                )));
            }
            prompt.status = if exit_code == 0 {
                PromptStatus::Completed
            } else {
                PromptStatus::Failed
            };
            prompt.result = Some(PromptResult { exit_code });
            prompt.completed_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    async fn mutate_queue<R>(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut PromptQueue) -> Result<R>,
    ) -> Result<R> {
        self.store
            .try_update(|doc| {
                let queue = doc
                    .queues
                    .iter_mut()
                    .find(|queue| queue.id == id)
                    .ok_or_else(|| AgentError::NotFound(format!("queue {id}")))?;
                mutate(queue)
            })
            .await
    }

    async fn mutate_prompt(
        &self,
        queue_id: Uuid,
        prompt_id: Uuid,
        mutate: impl FnOnce(&mut QueuePrompt) -> Result<()>,
    ) -> Result<QueuePrompt> {
        self.mutate_queue(queue_id, |queue| {
            let prompt = queue
                .prompts
                .iter_mut()
                .find(|prompt| prompt.id == prompt_id)
                .ok_or_else(|| AgentError::NotFound(format!("prompt {prompt_id}")))?;
            mutate(prompt)?;
            Ok(prompt.clone())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Bookmarks

#[derive(Debug, Default, Serialize, serde::Deserialize)]
pub struct BookmarksDoc {
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
}

pub struct BookmarkStore {
    store: DocStore<BookmarksDoc>,
}

impl BookmarkStore {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            store: DocStore::new(config.bookmarks_path()),
        }
    }

    pub async fn list(&self) -> Vec<Bookmark> {
        self.store.load().await.bookmarks
    }

    pub async fn get(&self, id: Uuid) -> Option<Bookmark> {
        self.store
            .load()
            .await
            .bookmarks
            .into_iter()
            .find(|bookmark| bookmark.id == id)
    }

    pub async fn add(&self, bookmark: Bookmark) -> Result<Bookmark> {
        bookmark.validate().map_err(AgentError::Invalid)?;
        self.store
            .try_update(|doc| {
                doc.bookmarks.push(bookmark.clone());
                Ok(bookmark.clone())
            })
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<Bookmark> {
        self.store
            .try_update(|doc| {
                let idx = doc
                    .bookmarks
                    .iter()
                    .position(|bookmark| bookmark.id == id)
                    .ok_or_else(|| AgentError::NotFound(format!("bookmark {id}")))?;
                Ok(doc.bookmarks.remove(idx))
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Tokens

#[derive(Debug, Default, Serialize, serde::Deserialize)]
pub struct TokensDoc {
    #[serde(default)]
    pub tokens: Vec<TokenRecord>,
}

pub struct TokenStore {
    store: DocStore<TokensDoc>,
}

impl TokenStore {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            store: DocStore::new(config.tokens_path()),
        }
    }

    pub async fn list(&self) -> Vec<TokenRecord> {
        self.store.load().await.tokens
    }

    pub async fn get(&self, id: Uuid) -> Option<TokenRecord> {
        self.store
            .load()
            .await
            .tokens
            .into_iter()
            .find(|record| record.id == id)
    }

    pub async fn add(&self, record: TokenRecord) -> Result<TokenRecord> {
        self.store
            .try_update(|doc| {
                doc.tokens.push(record.clone());
                Ok(record.clone())
            })
            .await
    }

    pub async fn mutate(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut TokenRecord) -> Result<()>,
    ) -> Result<TokenRecord> {
        self.store
            .try_update(|doc| {
                let record = doc
                    .tokens
                    .iter_mut()
                    .find(|record| record.id == id)
                    .ok_or_else(|| AgentError::NotFound(format!("token {id}")))?;
                mutate(record)?;
                Ok(record.clone())
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// File-change index

pub struct FileChangeStore {
    store: DocStore<FileChangeIndex>,
}

impl FileChangeStore {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            store: DocStore::new(config.file_changes_path()),
        }
    }

    pub async fn load(&self) -> FileChangeIndex {
        self.store.load().await
    }

    pub async fn replace(&self, index: FileChangeIndex) -> Result<FileChangeIndex> {
        self.store
            .try_update(|doc| {
                *doc = index.clone();
                Ok(index.clone())
            })
            .await
    }

    pub async fn session(&self, id: Uuid) -> Option<Vec<ChangedFile>> {
        self.store.load().await.sessions.get(&id).cloned()
    }
}
