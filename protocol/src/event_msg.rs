use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// `event_msg` payload union. The tag set is open on the wire; subtypes this
/// layer does not interpret land in the trailing untagged arm and round-trip
/// unchanged. Snake-case aliases cover records written by older codex
/// versions.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum EventMsg {
    #[serde(alias = "user_message")]
    UserMessage(UserMessageEvent),
    #[serde(alias = "agent_message")]
    AgentMessage(AgentMessageEvent),
    #[serde(alias = "agent_reasoning")]
    AgentReasoning(AgentReasoningEvent),
    #[serde(alias = "turn_started", alias = "task_started")]
    TurnStarted(TurnStartedEvent),
    #[serde(alias = "turn_complete", alias = "task_complete")]
    TurnComplete(TurnCompleteEvent),
    #[serde(alias = "turn_aborted")]
    TurnAborted(TurnAbortedEvent),
    #[serde(alias = "token_count")]
    TokenCount(TokenCountEvent),
    #[serde(alias = "exec_command_begin")]
    ExecCommandBegin(ExecCommandBeginEvent),
    #[serde(alias = "exec_command_end")]
    ExecCommandEnd(ExecCommandEndEvent),
    #[serde(alias = "error")]
    Error(ErrorEvent),
    #[serde(untagged)]
    Other(Value),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserMessageEvent {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentMessageEvent {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentReasoningEvent {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TurnStartedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TurnCompleteEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TurnAbortedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Usage counters. Only the total is read here; the remaining counters are
/// preserved so the record re-serializes losslessly.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TokenCountEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecCommandBeginEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecCommandEndEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorEvent {
    pub message: String,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pascal_and_snake_tags_both_parse() {
        let pascal: EventMsg =
            serde_json::from_str(r#"{"type":"TurnStarted","turn_id":"t1"}"#).unwrap();
        let snake: EventMsg =
            serde_json::from_str(r#"{"type":"turn_started","turn_id":"t1"}"#).unwrap();
        for msg in [pascal, snake] {
            match msg {
                EventMsg::TurnStarted(ev) => assert_eq!(ev.turn_id.as_deref(), Some("t1")),
                other => panic!("expected TurnStarted, got {other:?}"),
            }
        }
    }

    #[test]
    fn exec_begin_carries_argv() {
        let msg: EventMsg = serde_json::from_str(
            r#"{"type":"ExecCommandBegin","call_id":"c1","turn_id":"t1","command":["rm","a.txt"],"cwd":"/work"}"#,
        )
        .unwrap();
        match msg {
            EventMsg::ExecCommandBegin(ev) => assert_eq!(ev.command, vec!["rm", "a.txt"]),
            other => panic!("expected ExecCommandBegin, got {other:?}"),
        }
    }

    #[test]
    fn token_count_keeps_unread_counters() {
        let msg: EventMsg = serde_json::from_str(
            r#"{"type":"TokenCount","total_tokens":10,"input_tokens":7,"output_tokens":3}"#,
        )
        .unwrap();
        let EventMsg::TokenCount(ev) = msg else {
            panic!("expected TokenCount");
        };
        assert_eq!(ev.total_tokens, Some(10));
        assert_eq!(ev.rest["input_tokens"], 7);
        let round_trip = serde_json::to_value(EventMsg::TokenCount(ev)).unwrap();
        assert_eq!(round_trip["output_tokens"], 3);
    }
}
