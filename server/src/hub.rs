//! WebSocket hub: per-connection subscription sets multiplexing shared,
//! reference-counted tailers, plus new-session detection over the sessions
//! directory.
//!
//! Backpressure is per connection: a bounded outbound queue that drops the
//! oldest pending event when full. Ordering within one session holds as
//! long as nothing is dropped.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use codex_agent_core::auth::TokenAuthenticator;
use codex_agent_core::sessions::SessionIndex;
use codex_agent_core::tail::RolloutTailer;
use codex_agent_core::tail::TailEvent;
use notify::RecursiveMode;
use notify::Watcher;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Bounded FIFO that drops the oldest element on overflow. The explicit
/// queue keeps the drop policy visible and testable.
pub struct OutboundQueue {
    items: std::sync::Mutex<VecDeque<String>>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Never blocks; evicts the oldest pending item when full.
    pub fn push(&self, item: String) {
        {
            let mut items = match self.items.lock() {
                Ok(items) => items,
                Err(poisoned) => poisoned.into_inner(),
            };
            if items.len() == self.capacity {
                items.pop_front();
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<String> {
        match self.items.lock() {
            Ok(mut items) => items.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    pub async fn pop(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }
}

struct TailerEntry {
    tailer: RolloutTailer,
    subscribers: usize,
}

/// Shared hub state: one tailer per rollout path, reference-counted across
/// connections, and the fan-out list for new-session notifications.
pub struct WsHub {
    tailers: tokio::sync::Mutex<HashMap<Uuid, TailerEntry>>,
    new_session_txs: std::sync::Mutex<Vec<mpsc::UnboundedSender<PathBuf>>>,
    _watcher: Option<std::sync::Mutex<notify::RecommendedWatcher>>,
}

impl WsHub {
    pub fn new(codex_home: PathBuf) -> Arc<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = start_sessions_watcher(&codex_home, raw_tx);
        let hub = Arc::new(Self {
            tailers: tokio::sync::Mutex::new(HashMap::new()),
            new_session_txs: std::sync::Mutex::new(Vec::new()),
            _watcher: watcher.map(std::sync::Mutex::new),
        });
        hub.clone().spawn_new_session_loop(raw_rx);
        hub
    }

    /// Ensure a tailer exists for the session's rollout and register one
    /// more subscriber on it.
    pub async fn subscribe_session(
        &self,
        session_id: Uuid,
        rollout_path: PathBuf,
    ) -> mpsc::UnboundedReceiver<TailEvent> {
        let mut tailers = self.tailers.lock().await;
        let entry = tailers.entry(session_id).or_insert_with(|| TailerEntry {
            tailer: RolloutTailer::spawn(rollout_path),
            subscribers: 0,
        });
        entry.subscribers += 1;
        entry.tailer.subscribe()
    }

    /// Drop one subscriber; the tailer stops once its count reaches zero.
    pub async fn unsubscribe_session(&self, session_id: Uuid) {
        let mut tailers = self.tailers.lock().await;
        if let Some(entry) = tailers.get_mut(&session_id) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                tailers.remove(&session_id);
            }
        }
    }

    pub fn subscribe_new_sessions(&self) -> mpsc::UnboundedReceiver<PathBuf> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.new_session_txs.lock() {
            Ok(mut txs) => txs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    fn spawn_new_session_loop(
        self: Arc<Self>,
        mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    ) {
        tokio::spawn(async move {
            while let Some(result) = raw_rx.recv().await {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("sessions watcher error: {err}");
                        continue;
                    }
                };
                if !matches!(event.kind, notify::EventKind::Create(_)) {
                    continue;
                }
                for path in event.paths {
                    if !is_rollout_file(&path) {
                        continue;
                    }
                    let mut txs = match self.new_session_txs.lock() {
                        Ok(txs) => txs,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    txs.retain(|tx| tx.send(path.clone()).is_ok());
                }
            }
        });
    }

    pub async fn tailer_count(&self) -> usize {
        self.tailers.lock().await.len()
    }
}

fn is_rollout_file(path: &std::path::Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("rollout-") && name.ends_with(".jsonl"))
}

fn start_sessions_watcher(
    codex_home: &std::path::Path,
    raw_tx: mpsc::UnboundedSender<notify::Result<notify::Event>>,
) -> Option<notify::RecommendedWatcher> {
    let sessions_dir = codex_home.join(codex_agent_core::rollout_list::SESSIONS_SUBDIR);
    if !sessions_dir.is_dir() {
        debug!(
            "sessions dir {} missing; new-session events disabled",
            sessions_dir.display()
        );
        return None;
    }
    let mut watcher = match notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    }) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!("failed to create sessions watcher: {err}");
            return None;
        }
    };
    if let Err(err) = watcher.watch(&sessions_dir, RecursiveMode::Recursive) {
        warn!("failed to watch {}: {err}", sessions_dir.display());
        return None;
    }
    Some(watcher)
}

// ---------------------------------------------------------------------------
// Per-connection protocol

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ClientMessage {
    SubscribeSession { session_id: Uuid },
    UnsubscribeSession { session_id: Uuid },
    SubscribeNewSessions,
    UnsubscribeNewSessions,
    Auth { token: String },
}

/// Drive one WebSocket connection until it closes.
pub async fn handle_socket(
    hub: Arc<WsHub>,
    index: Arc<SessionIndex>,
    auth: Arc<TokenAuthenticator>,
    socket: WebSocket,
) {
    use futures::SinkExt;
    use futures::StreamExt;

    let (mut sink, mut stream) = socket.split();
    let outbound = Arc::new(OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY));

    let writer_outbound = Arc::clone(&outbound);
    let writer: JoinHandle<()> = tokio::spawn(async move {
        loop {
            let message = writer_outbound.pop().await;
            if sink.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session_forwards: HashMap<Uuid, JoinHandle<()>> = HashMap::new();
    let mut new_session_forward: Option<JoinHandle<()>> = None;

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                outbound.push(
                    serde_json::json!({"type": "error", "error": format!("bad message: {err}")})
                        .to_string(),
                );
                continue;
            }
        };
        match parsed {
            ClientMessage::SubscribeSession { session_id } => {
                if session_forwards.contains_key(&session_id) {
                    continue;
                }
                let rollout_path = match index.rollout_path(session_id).await {
                    Ok(Some(path)) => path,
                    _ => {
                        outbound.push(
                            serde_json::json!({
                                "type": "error",
                                "error": format!("session {session_id} not found"),
                            })
                            .to_string(),
                        );
                        continue;
                    }
                };
                let mut rx = hub.subscribe_session(session_id, rollout_path).await;
                let forward_outbound = Arc::clone(&outbound);
                let handle = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        let payload = match event {
                            TailEvent::Line(line) => serde_json::json!({
                                "type": "session_event",
                                "sessionId": session_id,
                                "line": line,
                            }),
                            TailEvent::Error(error) => serde_json::json!({
                                "type": "session_error",
                                "sessionId": session_id,
                                "error": error,
                            }),
                        };
                        forward_outbound.push(payload.to_string());
                    }
                });
                session_forwards.insert(session_id, handle);
            }
            ClientMessage::UnsubscribeSession { session_id } => {
                if let Some(handle) = session_forwards.remove(&session_id) {
                    handle.abort();
                    hub.unsubscribe_session(session_id).await;
                }
            }
            ClientMessage::SubscribeNewSessions => {
                if new_session_forward.is_some() {
                    continue;
                }
                let mut rx = hub.subscribe_new_sessions();
                let forward_outbound = Arc::clone(&outbound);
                new_session_forward = Some(tokio::spawn(async move {
                    while let Some(path) = rx.recv().await {
                        forward_outbound.push(
                            serde_json::json!({
                                "type": "new_session",
                                "path": path,
                            })
                            .to_string(),
                        );
                    }
                }));
            }
            ClientMessage::UnsubscribeNewSessions => {
                if let Some(handle) = new_session_forward.take() {
                    handle.abort();
                }
            }
            ClientMessage::Auth { token } => {
                // The socket itself needs no credential; a presented one is
                // still verified so clients learn about bad tokens early.
                let result = auth.verify(&token).await;
                outbound.push(
                    serde_json::json!({
                        "type": "auth_result",
                        "ok": result.is_ok(),
                    })
                    .to_string(),
                );
            }
        }
    }

    for (session_id, handle) in session_forwards {
        handle.abort();
        hub.unsubscribe_session(session_id).await;
    }
    if let Some(handle) = new_session_forward {
        handle.abort();
    }
    writer.abort();
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn outbound_queue_drops_oldest_on_overflow() {
        let queue = OutboundQueue::new(3);
        for i in 0..5 {
            queue.push(format!("m{i}"));
        }
        assert_eq!(queue.pop().await, "m2");
        assert_eq!(queue.pop().await, "m3");
        assert_eq!(queue.pop().await, "m4");
    }

    #[tokio::test]
    async fn outbound_queue_wakes_a_waiting_pop() {
        let queue = Arc::new(OutboundQueue::new(8));
        let waiter = Arc::clone(&queue);
        let handle = tokio::spawn(async move { waiter.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push("wake".to_string());
        let got = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "wake");
    }

    #[tokio::test]
    async fn tailer_refcount_insert_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let rollout = dir.path().join("rollout.jsonl");
        tokio::fs::write(&rollout, "").await.unwrap();

        let hub = WsHub::new(dir.path().to_path_buf());
        let id = Uuid::new_v4();
        let _rx1 = hub.subscribe_session(id, rollout.clone()).await;
        let _rx2 = hub.subscribe_session(id, rollout).await;
        assert_eq!(hub.tailer_count().await, 1);

        hub.unsubscribe_session(id).await;
        assert_eq!(hub.tailer_count().await, 1);
        hub.unsubscribe_session(id).await;
        assert_eq!(hub.tailer_count().await, 0);
    }

    #[test]
    fn rollout_filename_filter() {
        assert!(is_rollout_file(std::path::Path::new(
            "/x/sessions/2025/05/01/rollout-2025-05-01T10-00-00-abc.jsonl"
        )));
        assert!(!is_rollout_file(std::path::Path::new("/x/notes.jsonl")));
        assert!(!is_rollout_file(std::path::Path::new("/x/rollout-1.txt")));
    }

    #[test]
    fn client_messages_parse_with_camel_case_fields() {
        let id = Uuid::new_v4();
        let msg: ClientMessage = serde_json::from_str(&format!(
            r#"{{"type":"subscribe_session","sessionId":"{id}"}}"#
        ))
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SubscribeSession { session_id } if session_id == id
        ));
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe_new_sessions"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SubscribeNewSessions));
    }
}
