//! Live tailer for a single growing rollout file.
//!
//! Emits every complete line appended after the watcher starts, parsed
//! through the rollout codec. Survives truncation (offset reset) and
//! rotation (inode change). Parse failures are dropped silently so a
//! corrupt line never stalls the stream.

use std::io;
use std::ops::ControlFlow;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use codex_agent_protocol::RolloutLine;
use codex_agent_protocol::parse_rollout_line;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tokio::sync::mpsc;
use tracing::trace;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub enum TailEvent {
    Line(RolloutLine),
    Error(String),
}

enum Cmd {
    Subscribe(mpsc::UnboundedSender<TailEvent>),
}

/// Handle to a spawned tailer task. The task stops when every handle clone
/// is dropped; subscriber removal is eventually consistent (a line already
/// in flight may still be delivered).
#[derive(Clone)]
pub struct RolloutTailer {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
}

impl RolloutTailer {
    pub fn spawn(path: PathBuf) -> Self {
        Self::spawn_with_interval(path, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_interval(path: PathBuf, poll_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(tail_loop(path, poll_interval, cmd_rx));
        Self { cmd_tx }
    }

    /// Register a subscriber. Events start flowing from the next poll; the
    /// receiver closing unregisters it on the following emission.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TailEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.cmd_tx.send(Cmd::Subscribe(tx));
        rx
    }
}

#[derive(Default)]
struct TailState {
    /// Byte offset consumed from the file so far.
    offset: u64,
    /// (dev, ino) of the file at the last poll, where the platform exposes it.
    file_id: Option<(u64, u64)>,
    /// Trailing bytes of an incomplete final line.
    partial: Vec<u8>,
    /// A stat has succeeded at least once.
    seen_file: bool,
    /// Last reported error message, to avoid repeating it every poll.
    last_error: Option<String>,
}

async fn tail_loop(path: PathBuf, poll_interval: Duration, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
    let mut subscribers: Vec<mpsc::UnboundedSender<TailEvent>> = Vec::new();
    let mut state = TailState::default();
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Cmd::Subscribe(tx)) => subscribers.push(tx),
                None => break,
            },
            _ = interval.tick() => {
                // Register subscriptions that raced with this tick so the
                // very first poll cannot outrun a just-sent subscribe.
                while let Ok(Cmd::Subscribe(tx)) = cmd_rx.try_recv() {
                    subscribers.push(tx);
                }
                if poll_once(&path, &mut state, &mut subscribers).await.is_break() {
                    break;
                }
            }
        }
    }
    trace!("tailer for {} stopped", path.display());
}

async fn poll_once(
    path: &Path,
    state: &mut TailState,
    subscribers: &mut Vec<mpsc::UnboundedSender<TailEvent>>,
) -> ControlFlow<()> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if state.seen_file {
                // The file may reappear after a rotation; keep polling.
                return ControlFlow::Continue(());
            }
            broadcast(
                subscribers,
                TailEvent::Error(format!("rollout not found: {}", path.display())),
            );
            return ControlFlow::Break(());
        }
        Err(err) => {
            report_error(state, subscribers, &err);
            return ControlFlow::Continue(());
        }
    };

    let len = meta.len();
    let file_id = file_identity(&meta);
    if !state.seen_file {
        // First sight of the file: emit only what is appended from here on.
        state.seen_file = true;
        state.offset = len;
        state.file_id = file_id;
        return ControlFlow::Continue(());
    }
    state.last_error = None;

    if state.file_id.is_some() && file_id.is_some() && state.file_id != file_id {
        // Rotation: a different file now sits at this path.
        state.offset = 0;
        state.partial.clear();
    }
    state.file_id = file_id;

    if len < state.offset {
        // Truncation.
        state.offset = 0;
        state.partial.clear();
    }
    if len == state.offset {
        return ControlFlow::Continue(());
    }

    let new_bytes = match read_range(path, state.offset, len).await {
        Ok(bytes) => bytes,
        Err(err) => {
            report_error(state, subscribers, &err);
            return ControlFlow::Continue(());
        }
    };
    state.offset += new_bytes.len() as u64;
    state.partial.extend_from_slice(&new_bytes);

    while let Some(newline) = state.partial.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = state.partial.drain(..=newline).collect();
        let Ok(text) = std::str::from_utf8(&line) else {
            continue;
        };
        if let Some(parsed) = parse_rollout_line(text) {
            broadcast(subscribers, TailEvent::Line(parsed));
        }
    }
    ControlFlow::Continue(())
}

async fn read_range(path: &Path, from: u64, to: u64) -> io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(io::SeekFrom::Start(from)).await?;
    let mut buf = Vec::with_capacity(usize::try_from(to.saturating_sub(from)).unwrap_or(0));
    file.take(to.saturating_sub(from)).read_to_end(&mut buf).await?;
    Ok(buf)
}

fn report_error(
    state: &mut TailState,
    subscribers: &mut Vec<mpsc::UnboundedSender<TailEvent>>,
    err: &io::Error,
) {
    let message = err.to_string();
    if state.last_error.as_deref() == Some(message.as_str()) {
        return;
    }
    state.last_error = Some(message.clone());
    broadcast(subscribers, TailEvent::Error(message));
}

fn broadcast(subscribers: &mut Vec<mpsc::UnboundedSender<TailEvent>>, event: TailEvent) {
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use codex_agent_protocol::EventMsg;
    use codex_agent_protocol::RolloutItem;
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(10);
    const SETTLE: Duration = Duration::from_millis(60);

    fn event_line(ts: &str, message: &str) -> String {
        format!(
            r#"{{"timestamp":"{ts}","type":"event_msg","payload":{{"type":"AgentMessage","message":"{message}"}}}}"#
        )
    }

    async fn append(path: &Path, content: &str) {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(content.as_bytes()).await.unwrap();
        file.flush().await.unwrap();
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<TailEvent>) -> String {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("tailer should emit in time")
            .expect("tailer channel open");
        match event {
            TailEvent::Line(line) => match line.item {
                RolloutItem::EventMsg(EventMsg::AgentMessage(msg)) => msg.message,
                other => panic!("unexpected item: {other:?}"),
            },
            TailEvent::Error(message) => panic!("unexpected error: {message}"),
        }
    }

    #[tokio::test]
    async fn emits_appended_lines_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.jsonl");
        tokio::fs::write(&path, format!("{}\n", event_line("t0", "before start")))
            .await
            .unwrap();

        let tailer = RolloutTailer::spawn_with_interval(path.clone(), POLL);
        let mut rx = tailer.subscribe();
        tokio::time::sleep(SETTLE).await;

        append(&path, &format!("{}\n{}\n", event_line("t1", "one"), event_line("t2", "two"))).await;
        assert_eq!(next_message(&mut rx).await, "one");
        assert_eq!(next_message(&mut rx).await, "two");
    }

    #[tokio::test]
    async fn buffers_partial_lines_until_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.jsonl");
        tokio::fs::write(&path, "").await.unwrap();

        let tailer = RolloutTailer::spawn_with_interval(path.clone(), POLL);
        let mut rx = tailer.subscribe();
        tokio::time::sleep(SETTLE).await;

        let full = event_line("t1", "split");
        let (head, tail) = full.split_at(20);
        append(&path, head).await;
        tokio::time::sleep(SETTLE).await;
        assert!(rx.try_recv().is_err(), "incomplete line must not be emitted");
        append(&path, &format!("{tail}\n")).await;
        assert_eq!(next_message(&mut rx).await, "split");
    }

    #[tokio::test]
    async fn truncation_resets_the_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.jsonl");
        tokio::fs::write(&path, "x".repeat(512)).await.unwrap();

        let tailer = RolloutTailer::spawn_with_interval(path.clone(), POLL);
        let mut rx = tailer.subscribe();
        tokio::time::sleep(SETTLE).await;

        tokio::fs::write(&path, format!("{}\n", event_line("t1", "fresh")))
            .await
            .unwrap();
        assert_eq!(next_message(&mut rx).await, "fresh");
    }

    #[tokio::test]
    async fn unparseable_lines_are_dropped_without_stalling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.jsonl");
        tokio::fs::write(&path, "").await.unwrap();

        let tailer = RolloutTailer::spawn_with_interval(path.clone(), POLL);
        let mut rx = tailer.subscribe();
        tokio::time::sleep(SETTLE).await;

        append(&path, &format!("not json at all\n{}\n", event_line("t1", "after"))).await;
        assert_eq!(next_message(&mut rx).await, "after");
    }

    #[tokio::test]
    async fn missing_file_is_a_terminal_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-created.jsonl");
        let tailer = RolloutTailer::spawn_with_interval(path, POLL);
        let mut rx = tailer.subscribe();

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("tailer should emit in time")
            .expect("tailer channel open");
        assert!(matches!(event, TailEvent::Error(_)));
        let closed = timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(closed.expect("channel should close").is_none());
    }
}
