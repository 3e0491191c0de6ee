use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Name of an action the assistant asked to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub name: String,
}

/// One entry of the conversation history. Never mutated once appended.
///
/// Tool messages carry the tool name as `sender`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            sender: None,
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// An assistant turn. Empty text is stored as `None`.
    pub fn assistant(sender: impl Into<String>, content: &str, tool_calls: Vec<ToolCallRef>) -> Self {
        Self {
            role: Role::Assistant,
            sender: Some(sender.into()),
            content: (!content.is_empty()).then(|| content.to_string()),
            tool_calls,
        }
    }

    pub fn tool(tool_name: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            sender: Some(tool_name.into()),
            content: Some(result.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}
