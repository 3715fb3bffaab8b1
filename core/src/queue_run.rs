//! Sequential drain of a prompt queue against one working directory.
//!
//! One prompt runs at a time. Pause is a live-reloaded value from the
//! store: the drain idles with backoff until unpaused or stopped. `manual`
//! prompts are left pending for external triggering and skipped over.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use codex_agent_protocol::PromptMode;
use codex_agent_protocol::PromptQueue;
use codex_agent_protocol::PromptStatus;
use codex_agent_protocol::QueueRunEvent;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::AgentError;
use crate::Result;
use crate::config::DEFAULT_AGENT_BIN;
use crate::runner::AgentInvocation;
use crate::runner::ProcessOptions;
use crate::runner::RunMode;
use crate::store::QueueStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Cooperative stop flag: the drain finishes the in-flight prompt, then
/// emits `queue_stopped` and exits.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct QueueRunOptions {
    pub process: ProcessOptions,
    pub bin: String,
    pub pause_backoff: Duration,
}

impl Default for QueueRunOptions {
    fn default() -> Self {
        Self {
            process: ProcessOptions::default(),
            bin: DEFAULT_AGENT_BIN.to_string(),
            pause_backoff: Duration::from_millis(500),
        }
    }
}

pub async fn run_queue(
    queue_id: Uuid,
    store: Arc<QueueStore>,
    options: QueueRunOptions,
    stop: StopSignal,
) -> Result<mpsc::Receiver<QueueRunEvent>> {
    if store.get_by_id(queue_id).await.is_none() {
        return Err(AgentError::NotFound(format!("queue {queue_id}")));
    }
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(drain_loop(queue_id, store, options, stop, tx));
    Ok(rx)
}

fn stop_snapshot(queue: &PromptQueue) -> QueueRunEvent {
    let by_status = |status: PromptStatus| -> Vec<Uuid> {
        queue
            .prompts
            .iter()
            .filter(|prompt| prompt.status == status)
            .map(|prompt| prompt.id)
            .collect()
    };
    QueueRunEvent::QueueStopped {
        completed: by_status(PromptStatus::Completed),
        pending: by_status(PromptStatus::Pending),
        failed: by_status(PromptStatus::Failed),
    }
}

async fn drain_loop(
    queue_id: Uuid,
    store: Arc<QueueStore>,
    options: QueueRunOptions,
    stop: StopSignal,
    tx: mpsc::Sender<QueueRunEvent>,
) {
    loop {
        let Some(queue) = store.get_by_id(queue_id).await else {
            // Deleted out from under the run.
            return;
        };
        if stop.stopped() {
            let _ = tx.send(stop_snapshot(&queue)).await;
            return;
        }
        if queue.paused {
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(options.pause_backoff).await;
            continue;
        }

        let Some(next) = queue
            .prompts
            .iter()
            .find(|prompt| {
                prompt.status == PromptStatus::Pending && prompt.mode == PromptMode::Auto
            })
            .cloned()
        else {
            let _ = tx.send(QueueRunEvent::QueueCompleted).await;
            return;
        };

        let running = match store.mark_running(queue_id, next.id).await {
            Ok(prompt) => prompt,
            Err(err) => {
                // A stale running prompt or a lost queue; stop rather than
                // spin against the store.
                debug!("queue {queue_id} could not start prompt {}: {err}", next.id);
                return;
            }
        };
        if tx
            .send(QueueRunEvent::PromptStarted {
                prompt_id: running.id,
            })
            .await
            .is_err()
        {
            // Consumer left before the child was spawned; put the prompt
            // back so a later drain picks it up.
            let _ = store.reset_running(queue_id, running.id).await;
            return;
        }

        let mut process = options.process.clone();
        process.cwd = Some(queue.project_path.clone());
        if let Some(images) = &running.images {
            process.images = images.clone();
        }
        let invocation =
            AgentInvocation::new(options.bin.as_str(), RunMode::Fresh, running.prompt.as_str())
                .with_options(process);
        let exit_code = match invocation.spawn_exec().await {
            Ok(outcome) => outcome.exit_code,
            Err(err) => {
                debug!("queue {queue_id} spawn failed: {err}");
                1
            }
        };
        if let Err(err) = store.mark_finished(queue_id, running.id, exit_code).await {
            debug!("queue {queue_id} could not persist prompt result: {err}");
            return;
        }
        let event = if exit_code == 0 {
            QueueRunEvent::PromptCompleted {
                prompt_id: running.id,
                exit_code,
            }
        } else {
            QueueRunEvent::PromptFailed {
                prompt_id: running.id,
                exit_code,
            }
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::AgentConfig;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tokio::time::timeout;

    fn test_store(dir: &tempfile::TempDir) -> Arc<QueueStore> {
        let config = AgentConfig::with_dirs(dir.path().join("h"), dir.path().join("c"));
        Arc::new(QueueStore::new(&config))
    }

    fn options_with_bin(bin: &str) -> QueueRunOptions {
        QueueRunOptions {
            bin: bin.to_string(),
            pause_backoff: Duration::from_millis(20),
            ..Default::default()
        }
    }

    async fn collect_events(mut rx: mpsc::Receiver<QueueRunEvent>) -> Vec<QueueRunEvent> {
        let mut events = Vec::new();
        while let Some(event) = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("queue run should keep emitting")
        {
            events.push(event);
        }
        events
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn drains_auto_prompts_in_order_and_skips_manual() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let queue = store
            .create("q".to_string(), PathBuf::from("/tmp"))
            .await
            .unwrap();
        let first = store
            .add_prompt(queue.id, "one".to_string(), PromptMode::Auto, None)
            .await
            .unwrap();
        let manual = store
            .add_prompt(queue.id, "hold".to_string(), PromptMode::Manual, None)
            .await
            .unwrap();
        let second = store
            .add_prompt(queue.id, "two".to_string(), PromptMode::Auto, None)
            .await
            .unwrap();

        let rx = run_queue(
            queue.id,
            Arc::clone(&store),
            options_with_bin("true"),
            StopSignal::new(),
        )
        .await
        .unwrap();
        let events = collect_events(rx).await;

        assert_eq!(
            events,
            vec![
                QueueRunEvent::PromptStarted { prompt_id: first.id },
                QueueRunEvent::PromptCompleted {
                    prompt_id: first.id,
                    exit_code: 0
                },
                QueueRunEvent::PromptStarted {
                    prompt_id: second.id
                },
                QueueRunEvent::PromptCompleted {
                    prompt_id: second.id,
                    exit_code: 0
                },
                QueueRunEvent::QueueCompleted,
            ]
        );

        let reloaded = store.get_by_id(queue.id).await.unwrap();
        let status_of = |id: Uuid| {
            reloaded
                .prompts
                .iter()
                .find(|prompt| prompt.id == id)
                .unwrap()
                .status
        };
        assert_eq!(status_of(first.id), PromptStatus::Completed);
        assert_eq!(status_of(manual.id), PromptStatus::Pending);
        assert_eq!(status_of(second.id), PromptStatus::Completed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_prompts_record_their_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let queue = store
            .create("q".to_string(), PathBuf::from("/tmp"))
            .await
            .unwrap();
        let prompt = store
            .add_prompt(queue.id, "boom".to_string(), PromptMode::Auto, None)
            .await
            .unwrap();

        let rx = run_queue(
            queue.id,
            Arc::clone(&store),
            options_with_bin("false"),
            StopSignal::new(),
        )
        .await
        .unwrap();
        let events = collect_events(rx).await;
        assert!(events.iter().any(|event| matches!(
            event,
            QueueRunEvent::PromptFailed { prompt_id, .. } if *prompt_id == prompt.id
        )));
        let reloaded = store.get_by_id(queue.id).await.unwrap();
        assert_eq!(reloaded.prompts[0].status, PromptStatus::Failed);
    }

    #[tokio::test]
    async fn stop_signal_ends_the_run_with_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let queue = store
            .create("q".to_string(), PathBuf::from("/tmp"))
            .await
            .unwrap();
        let prompt = store
            .add_prompt(queue.id, "later".to_string(), PromptMode::Auto, None)
            .await
            .unwrap();

        let stop = StopSignal::new();
        stop.stop();
        let rx = run_queue(
            queue.id,
            Arc::clone(&store),
            options_with_bin("true"),
            stop,
        )
        .await
        .unwrap();
        let events = collect_events(rx).await;
        assert_eq!(
            events,
            vec![QueueRunEvent::QueueStopped {
                completed: Vec::new(),
                pending: vec![prompt.id],
                failed: Vec::new(),
            }]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn paused_queue_waits_until_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let queue = store
            .create("q".to_string(), PathBuf::from("/tmp"))
            .await
            .unwrap();
        store
            .add_prompt(queue.id, "wait".to_string(), PromptMode::Auto, None)
            .await
            .unwrap();
        store.set_paused(queue.id, true).await.unwrap();

        let mut rx = run_queue(
            queue.id,
            Arc::clone(&store),
            options_with_bin("true"),
            StopSignal::new(),
        )
        .await
        .unwrap();

        // Nothing while paused.
        assert!(
            timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
            "paused queue must not emit"
        );
        store.set_paused(queue.id, false).await.unwrap();
        let first = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("resumed queue should emit")
            .unwrap();
        assert!(matches!(first, QueueRunEvent::PromptStarted { .. }));
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let result = run_queue(
            Uuid::new_v4(),
            store,
            QueueRunOptions::default(),
            StopSignal::new(),
        )
        .await;
        assert!(matches!(result, Err(AgentError::NotFound(_))));
    }
}
