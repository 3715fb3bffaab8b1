//! Spawns the external agent binary (`codex exec …`) and turns its stdout
//! JSONL into rollout lines. The binary may print either the native rollout
//! schema or the exec-stream schema; both normalize to `RolloutLine`.

use std::path::PathBuf;
use std::process::Stdio;

use chrono::SecondsFormat;
use chrono::Utc;
use codex_agent_protocol::AgentMessageEvent;
use codex_agent_protocol::AgentReasoningEvent;
use codex_agent_protocol::ErrorEvent;
use codex_agent_protocol::EventMsg;
use codex_agent_protocol::ExecCommandBeginEvent;
use codex_agent_protocol::ExecCommandEndEvent;
use codex_agent_protocol::ExecStreamEvent;
use codex_agent_protocol::RolloutItem;
use codex_agent_protocol::RolloutLine;
use codex_agent_protocol::StreamItemDetails;
use codex_agent_protocol::TurnCompleteEvent;
use codex_agent_protocol::TurnStartedEvent;
use codex_agent_protocol::parse_rollout_line;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

/// Exit code reported when the child terminated without one (signal) or
/// could not be waited on.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxMode {
    pub fn as_flag(self) -> &'static str {
        match self {
            SandboxMode::ReadOnly => "read-only",
            SandboxMode::WorkspaceWrite => "workspace-write",
            SandboxMode::DangerFullAccess => "danger-full-access",
        }
    }
}

/// Flag surface passed through to the agent binary. Image attachments must
/// already be on disk; callers holding base64 payloads spill them to temp
/// files first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessOptions {
    pub model: Option<String>,
    pub sandbox: Option<SandboxMode>,
    pub approval: Option<String>,
    pub full_auto: bool,
    pub images: Vec<PathBuf>,
    /// Raw `-c key=value` overrides.
    pub config_overrides: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum RunMode {
    Fresh,
    Resume { session_id: Uuid },
    Fork { session_id: Uuid, nth_message: u32 },
}

#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub bin: String,
    pub mode: RunMode,
    pub prompt: String,
    pub options: ProcessOptions,
}

impl AgentInvocation {
    pub fn new(bin: impl Into<String>, mode: RunMode, prompt: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            mode,
            prompt: prompt.into(),
            options: ProcessOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["exec".to_string()];
        match &self.mode {
            RunMode::Fresh => {}
            RunMode::Resume { session_id } => {
                args.push("resume".to_string());
                args.push(session_id.to_string());
            }
            RunMode::Fork {
                session_id,
                nth_message,
            } => {
                args.push("resume".to_string());
                args.push(session_id.to_string());
                args.push("--nth-message".to_string());
                args.push(nth_message.to_string());
            }
        }
        args.push("--json".to_string());
        args.push("--skip-git-repo-check".to_string());
        if let Some(model) = &self.options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(sandbox) = self.options.sandbox {
            args.push("--sandbox".to_string());
            args.push(sandbox.as_flag().to_string());
        }
        if let Some(approval) = &self.options.approval {
            args.push("--ask-for-approval".to_string());
            args.push(approval.clone());
        }
        if self.options.full_auto {
            args.push("--full-auto".to_string());
        }
        for image in &self.options.images {
            args.push("--image".to_string());
            args.push(image.display().to_string());
        }
        for kv in &self.options.config_overrides {
            args.push("-c".to_string());
            args.push(kv.clone());
        }
        args.push(self.prompt.clone());
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(self.build_args());
        if let Some(cwd) = &self.options.cwd {
            cmd.current_dir(cwd);
        }
        // No stdin: the prompt travels in argv, and an open pipe makes
        // some tools wait for input. Stderr is the binary's human log;
        // discard it rather than risk a full pipe stalling the child.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Fire-and-watch: the caller owns the child.
    pub fn spawn(&self) -> std::io::Result<tokio::process::Child> {
        trace!("spawning {} {:?}", self.bin, self.build_args());
        self.command().spawn()
    }

    /// Run to completion, buffering every parseable stdout line.
    pub async fn spawn_exec(&self) -> std::io::Result<ExecOutcome> {
        let mut run = self.spawn_stream()?;
        let mut lines = Vec::new();
        while let Some(line) = run.lines.recv().await {
            lines.push(line);
        }
        let exit_code = run.wait().await;
        Ok(ExecOutcome { exit_code, lines })
    }

    /// Spawn and stream parsed lines as they appear. Dropping the returned
    /// handle aborts the pump task, which kills the child.
    pub fn spawn_stream(&self) -> std::io::Result<StreamingRun> {
        let mut child = self.spawn()?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut reader = tokio::io::BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Some(parsed) = parse_stdout_line(&line)
                        && line_tx.send(parsed).is_err()
                    {
                        break;
                    }
                }
            }
            let exit_code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(EXIT_CODE_UNKNOWN),
                Err(_) => EXIT_CODE_UNKNOWN,
            };
            let _ = exit_tx.send(exit_code);
        });
        Ok(StreamingRun {
            pid,
            lines: line_rx,
            completion: Some(exit_rx),
            task,
        })
    }
}

#[derive(Debug)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub lines: Vec<RolloutLine>,
}

pub struct StreamingRun {
    pub pid: Option<u32>,
    pub lines: mpsc::UnboundedReceiver<RolloutLine>,
    completion: Option<oneshot::Receiver<i32>>,
    task: JoinHandle<()>,
}

impl StreamingRun {
    /// Await the child's exit code. Resolves once even if called after the
    /// stream drained.
    pub async fn wait(&mut self) -> i32 {
        match self.completion.take() {
            Some(rx) => rx.await.unwrap_or(EXIT_CODE_UNKNOWN),
            None => EXIT_CODE_UNKNOWN,
        }
    }

    /// Best-effort cancellation; the pump task owns the child and drops it
    /// with kill-on-drop set.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for StreamingRun {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parse one stdout line: native rollout records pass straight through,
/// exec-stream records are rewritten into the rollout envelope, anything
/// else is dropped.
pub fn parse_stdout_line(line: &str) -> Option<RolloutLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(native) = parse_rollout_line(trimmed) {
        return Some(native);
    }
    let event: ExecStreamEvent = serde_json::from_str(trimmed).ok()?;
    normalize_stream_event(event).map(|msg| RolloutLine {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        item: RolloutItem::EventMsg(msg),
    })
}

fn normalize_stream_event(event: ExecStreamEvent) -> Option<EventMsg> {
    match event {
        ExecStreamEvent::ThreadStarted(started) => Some(EventMsg::Other(serde_json::json!({
            "type": "thread.started",
            "thread_id": started.thread_id,
        }))),
        ExecStreamEvent::TurnStarted(_) => {
            Some(EventMsg::TurnStarted(TurnStartedEvent { turn_id: None }))
        }
        ExecStreamEvent::TurnCompleted(_) => Some(EventMsg::TurnComplete(TurnCompleteEvent {
            turn_id: None,
            last_agent_message: None,
        })),
        ExecStreamEvent::TurnFailed(failed) => Some(EventMsg::Error(ErrorEvent {
            message: failed.error.message,
        })),
        ExecStreamEvent::Error(err) => Some(EventMsg::Error(ErrorEvent {
            message: err.message,
        })),
        ExecStreamEvent::ItemStarted(ev) => match ev.item.details {
            StreamItemDetails::CommandExecution { command, .. } => {
                Some(EventMsg::ExecCommandBegin(ExecCommandBeginEvent {
                    call_id: ev.item.id,
                    turn_id: None,
                    command: vec![command],
                    cwd: None,
                }))
            }
            _ => None,
        },
        ExecStreamEvent::ItemUpdated(_) => None,
        ExecStreamEvent::ItemCompleted(ev) => match ev.item.details {
            StreamItemDetails::AgentMessage { text } => {
                Some(EventMsg::AgentMessage(AgentMessageEvent { message: text }))
            }
            StreamItemDetails::Reasoning { text } => {
                Some(EventMsg::AgentReasoning(AgentReasoningEvent { text }))
            }
            StreamItemDetails::CommandExecution { exit_code, .. } => {
                Some(EventMsg::ExecCommandEnd(ExecCommandEndEvent {
                    call_id: ev.item.id,
                    turn_id: None,
                    exit_code,
                }))
            }
            StreamItemDetails::Error { message } => Some(EventMsg::Error(ErrorEvent { message })),
            StreamItemDetails::Other(_) => None,
        },
        ExecStreamEvent::Other(value) => Some(EventMsg::Other(value)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_args_carry_flags_and_trailing_prompt() {
        let invocation = AgentInvocation::new("codex", RunMode::Fresh, "do it").with_options(
            ProcessOptions {
                model: Some("gpt-5".to_string()),
                sandbox: Some(SandboxMode::WorkspaceWrite),
                full_auto: true,
                images: vec![PathBuf::from("/tmp/a.png")],
                config_overrides: vec!["approval_policy=never".to_string()],
                ..Default::default()
            },
        );
        assert_eq!(
            invocation.build_args(),
            vec![
                "exec",
                "--json",
                "--skip-git-repo-check",
                "--model",
                "gpt-5",
                "--sandbox",
                "workspace-write",
                "--full-auto",
                "--image",
                "/tmp/a.png",
                "-c",
                "approval_policy=never",
                "do it",
            ]
        );
    }

    #[test]
    fn resume_and_fork_argv_shapes() {
        let id: Uuid = "6f9a1af5-3de0-4e6e-bb8a-6a7c1bd9fa44".parse().unwrap();
        let resume = AgentInvocation::new("codex", RunMode::Resume { session_id: id }, "go");
        assert_eq!(
            &resume.build_args()[..3],
            &["exec", "resume", "6f9a1af5-3de0-4e6e-bb8a-6a7c1bd9fa44"]
        );
        let fork = AgentInvocation::new(
            "codex",
            RunMode::Fork {
                session_id: id,
                nth_message: 7,
            },
            "go",
        );
        let args = fork.build_args();
        assert_eq!(
            &args[..5],
            &[
                "exec",
                "resume",
                "6f9a1af5-3de0-4e6e-bb8a-6a7c1bd9fa44",
                "--nth-message",
                "7"
            ]
        );
        assert_eq!(args.last().map(String::as_str), Some("go"));
    }

    #[test]
    fn native_rollout_lines_pass_through() {
        let line = r#"{"timestamp":"2025-05-01T12:00:00Z","type":"event_msg","payload":{"type":"AgentMessage","message":"hi"}}"#;
        let parsed = parse_stdout_line(line).unwrap();
        assert_eq!(parsed.timestamp, "2025-05-01T12:00:00Z");
    }

    #[test]
    fn exec_stream_agent_message_normalizes() {
        let line = r#"{"type":"item.completed","item":{"id":"item_0","type":"agent_message","text":"done"}}"#;
        let parsed = parse_stdout_line(line).unwrap();
        match parsed.item {
            RolloutItem::EventMsg(EventMsg::AgentMessage(msg)) => {
                assert_eq!(msg.message, "done");
            }
            other => panic!("expected AgentMessage, got {other:?}"),
        }
    }

    #[test]
    fn exec_stream_command_lifecycle_normalizes() {
        let begin = parse_stdout_line(
            r#"{"type":"item.started","item":{"id":"item_1","type":"command_execution","command":"cargo test","aggregated_output":"","status":"in_progress"}}"#,
        )
        .unwrap();
        assert!(matches!(
            begin.item,
            RolloutItem::EventMsg(EventMsg::ExecCommandBegin(_))
        ));
        let end = parse_stdout_line(
            r#"{"type":"item.completed","item":{"id":"item_1","type":"command_execution","command":"cargo test","aggregated_output":"ok","exit_code":0,"status":"completed"}}"#,
        )
        .unwrap();
        match end.item {
            RolloutItem::EventMsg(EventMsg::ExecCommandEnd(ev)) => {
                assert_eq!(ev.exit_code, Some(0));
                assert_eq!(ev.call_id.as_deref(), Some("item_1"));
            }
            other => panic!("expected ExecCommandEnd, got {other:?}"),
        }
    }

    #[test]
    fn non_json_stdout_is_dropped() {
        assert!(parse_stdout_line("building...").is_none());
        assert!(parse_stdout_line("").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_exec_reports_the_exit_code() {
        let invocation = AgentInvocation::new("false", RunMode::Fresh, "ignored");
        let outcome = invocation.spawn_exec().await.unwrap();
        assert_ne!(outcome.exit_code, 0);
        assert!(outcome.lines.is_empty());

        let invocation = AgentInvocation::new("true", RunMode::Fresh, "ignored");
        let outcome = invocation.spawn_exec().await.unwrap();
        assert_eq!(outcome.exit_code, 0);
    }
}
