use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// `response_item` payload union. Only the subtypes the management layer
/// reads are modeled; everything else is preserved opaquely.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message {
        role: String,
        #[serde(default)]
        content: Vec<ContentItem>,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<SummaryPart>,
    },
    LocalShellCall {
        #[serde(default)]
        status: String,
        #[serde(default)]
        action: LocalShellAction,
    },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    InputText { text: String },
    OutputText { text: String },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SummaryPart {
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LocalShellAction {
    #[serde(default)]
    pub command: Vec<String>,
}
