//! Bounded parallel fan-out of one prompt across the sessions of a group.
//!
//! The scheduler keeps four disjoint sets (pending, running, completed,
//! failed) and never lets `running` exceed the concurrency cap. Pause is
//! re-read from the store before every promotion. The consumer cancels by
//! dropping the event receiver; in-flight children are then killed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use codex_agent_protocol::GroupRunEvent;
use codex_agent_protocol::GroupRunSets;
use codex_agent_protocol::SessionGroup;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;
use uuid::Uuid;

use crate::AgentError;
use crate::Result;
use crate::config::DEFAULT_AGENT_BIN;
use crate::runner::AgentInvocation;
use crate::runner::ProcessOptions;
use crate::runner::RunMode;
use crate::store::GroupStore;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
const EVENT_CHANNEL_CAPACITY: usize = 64;
const PAUSE_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct GroupRunOptions {
    pub max_concurrent: usize,
    pub process: ProcessOptions,
    pub bin: String,
}

impl Default for GroupRunOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            process: ProcessOptions::default(),
            bin: DEFAULT_AGENT_BIN.to_string(),
        }
    }
}

/// Start a group run. Rejects a paused group at entry; thereafter pause
/// only gates promotion of further sessions.
pub fn run_group(
    group: SessionGroup,
    prompt: String,
    options: GroupRunOptions,
    store: Arc<GroupStore>,
) -> Result<mpsc::Receiver<GroupRunEvent>> {
    if group.paused {
        return Err(AgentError::Conflict(format!(
            "group {} is paused",
            group.id
        )));
    }
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(scheduler_loop(group, prompt, options, store, tx));
    Ok(rx)
}

struct SchedulerSets {
    pending: VecDeque<Uuid>,
    running: Vec<Uuid>,
    completed: Vec<Uuid>,
    failed: Vec<Uuid>,
}

impl SchedulerSets {
    fn snapshot(&self) -> GroupRunSets {
        GroupRunSets {
            pending: self.pending.iter().copied().collect(),
            running: self.running.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
        }
    }
}

async fn scheduler_loop(
    group: SessionGroup,
    prompt: String,
    options: GroupRunOptions,
    store: Arc<GroupStore>,
    tx: mpsc::Sender<GroupRunEvent>,
) {
    let group_id = group.id;
    let max_concurrent = options.max_concurrent.max(1);
    let mut sets = SchedulerSets {
        pending: group.session_ids.into_iter().collect(),
        running: Vec::new(),
        completed: Vec::new(),
        failed: Vec::new(),
    };
    let mut children: JoinSet<(Uuid, i32)> = JoinSet::new();

    loop {
        // Promote from the head of `pending` in original order. Pause is
        // checked against the live document before every promotion.
        while sets.running.len() < max_concurrent && !sets.pending.is_empty() {
            if is_paused(&store, group_id).await {
                break;
            }
            let Some(session_id) = sets.pending.pop_front() else {
                break;
            };
            let invocation = AgentInvocation::new(
                options.bin.as_str(),
                RunMode::Resume { session_id },
                prompt.as_str(),
            )
            .with_options(options.process.clone());
            children.spawn(async move {
                match invocation.spawn_exec().await {
                    Ok(outcome) => (session_id, outcome.exit_code),
                    // Spawn failures count as exit 1.
                    Err(err) => {
                        debug!("spawn failed for session {session_id}: {err}");
                        (session_id, 1)
                    }
                }
            });
            sets.running.push(session_id);
            let event = GroupRunEvent::SessionStarted {
                session_id,
                sets: sets.snapshot(),
            };
            if tx.send(event).await.is_err() {
                children.abort_all();
                return;
            }
        }

        if sets.pending.is_empty() && sets.running.is_empty() {
            break;
        }
        if sets.running.is_empty() {
            // Paused with nothing in flight: wait for unpause, or for the
            // consumer to walk away.
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(PAUSE_BACKOFF).await;
            continue;
        }

        match children.join_next().await {
            Some(Ok((session_id, exit_code))) => {
                sets.running.retain(|id| *id != session_id);
                let event = if exit_code == 0 {
                    sets.completed.push(session_id);
                    GroupRunEvent::SessionCompleted {
                        session_id,
                        exit_code,
                        sets: sets.snapshot(),
                    }
                } else {
                    sets.failed.push(session_id);
                    GroupRunEvent::SessionFailed {
                        session_id,
                        exit_code,
                        sets: sets.snapshot(),
                    }
                };
                if tx.send(event).await.is_err() {
                    children.abort_all();
                    return;
                }
            }
            Some(Err(join_err)) => {
                debug!("group child task ended abnormally: {join_err}");
            }
            None => {}
        }
    }

    let _ = tx
        .send(GroupRunEvent::GroupCompleted {
            sets: sets.snapshot(),
        })
        .await;
}

async fn is_paused(store: &GroupStore, group_id: Uuid) -> bool {
    store
        .get_by_id(group_id)
        .await
        .map(|group| group.paused)
        .unwrap_or(false)
}
