use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Top-level JSONL events printed by `codex exec --json`. The process
/// runner normalizes these into rollout records so downstream consumers see
/// one schema regardless of which format the binary emitted.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ExecStreamEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted(ThreadStartedEvent),
    #[serde(rename = "turn.started")]
    TurnStarted(EmptyEvent),
    #[serde(rename = "turn.completed")]
    TurnCompleted(TurnCompletedEvent),
    #[serde(rename = "turn.failed")]
    TurnFailed(TurnFailedEvent),
    #[serde(rename = "item.started")]
    ItemStarted(ItemEvent),
    #[serde(rename = "item.updated")]
    ItemUpdated(ItemEvent),
    #[serde(rename = "item.completed")]
    ItemCompleted(ItemEvent),
    #[serde(rename = "error")]
    Error(StreamErrorEvent),
    #[serde(untagged)]
    Other(Value),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ThreadStartedEvent {
    pub thread_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EmptyEvent {}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TurnCompletedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TurnFailedEvent {
    pub error: StreamErrorEvent,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ItemEvent {
    pub item: StreamItem,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StreamErrorEvent {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StreamItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub details: StreamItemDetails,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamItemDetails {
    AgentMessage {
        text: String,
    },
    Reasoning {
        text: String,
    },
    CommandExecution {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    Error {
        message: String,
    },
    #[serde(untagged)]
    Other(Value),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dotted_tags_parse() {
        let ev: ExecStreamEvent =
            serde_json::from_str(r#"{"type":"thread.started","thread_id":"abc"}"#).unwrap();
        assert!(matches!(ev, ExecStreamEvent::ThreadStarted(t) if t.thread_id == "abc"));
    }

    #[test]
    fn completed_agent_message_item_parses() {
        let ev: ExecStreamEvent = serde_json::from_str(
            r#"{"type":"item.completed","item":{"id":"item_0","type":"agent_message","text":"done"}}"#,
        )
        .unwrap();
        let ExecStreamEvent::ItemCompleted(item_ev) = ev else {
            panic!("expected item.completed");
        };
        assert_eq!(item_ev.item.id.as_deref(), Some("item_0"));
        assert!(matches!(
            item_ev.item.details,
            StreamItemDetails::AgentMessage { text } if text == "done"
        ));
    }

    #[test]
    fn unknown_item_kind_is_opaque() {
        let ev: ExecStreamEvent = serde_json::from_str(
            r#"{"type":"item.completed","item":{"id":"item_1","type":"todo_list","items":[]}}"#,
        )
        .unwrap();
        let ExecStreamEvent::ItemCompleted(item_ev) = ev else {
            panic!("expected item.completed");
        };
        assert!(matches!(item_ev.item.details, StreamItemDetails::Other(_)));
    }
}
