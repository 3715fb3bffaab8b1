//! Wire types shared across the codex-agent workspace.
//!
//! `rollout` mirrors the JSONL records the codex CLI appends to its rollout
//! files; `exec_stream` mirrors the event schema `codex exec --json` prints
//! on stdout; `models` is the management-layer data model served over HTTP.

mod event_msg;
mod exec_stream;
mod models;
mod response_item;
mod rollout;

pub use event_msg::AgentMessageEvent;
pub use event_msg::AgentReasoningEvent;
pub use event_msg::ErrorEvent;
pub use event_msg::EventMsg;
pub use event_msg::ExecCommandBeginEvent;
pub use event_msg::ExecCommandEndEvent;
pub use event_msg::TokenCountEvent;
pub use event_msg::TurnAbortedEvent;
pub use event_msg::TurnCompleteEvent;
pub use event_msg::TurnStartedEvent;
pub use event_msg::UserMessageEvent;
pub use exec_stream::ExecStreamEvent;
pub use exec_stream::StreamItem;
pub use exec_stream::StreamItemDetails;
pub use exec_stream::ThreadStartedEvent;
pub use models::ActivityEntry;
pub use models::ActivityStatus;
pub use models::Bookmark;
pub use models::BookmarkKind;
pub use models::ChangedFile;
pub use models::FileChangeIndex;
pub use models::FileOperation;
pub use models::GroupRunEvent;
pub use models::GroupRunSets;
pub use models::PromptMode;
pub use models::PromptQueue;
pub use models::PromptResult;
pub use models::PromptStatus;
pub use models::QueuePrompt;
pub use models::QueueRunEvent;
pub use models::Session;
pub use models::SessionGroup;
pub use models::SessionPage;
pub use models::TokenRecord;
pub use response_item::ContentItem;
pub use response_item::LocalShellAction;
pub use response_item::ResponseItem;
pub use response_item::SummaryPart;
pub use rollout::GitInfo;
pub use rollout::RolloutItem;
pub use rollout::RolloutLine;
pub use rollout::SessionMeta;
pub use rollout::SessionMetaLine;
pub use rollout::SessionSource;
pub use rollout::TurnContextItem;
pub use rollout::parse_rollout_line;
