//! Conversation messages and the content shapes the agent loop produces.
//!
//! A [`Message`] pairs a [`Sender`] with a list of [`Content`] items. `Content` is a
//! closed sum type: plain text, a structured text block, a tool invocation, or a
//! [`ToolResult`]. Rendering and relaying match on it exhaustively.
//!
//! ```rust
//! use wirtual::message::{Content, Message, Sender};
//!
//! let msg = Message::user_text("open a new tab");
//! assert_eq!(msg.role, Sender::User);
//! assert_eq!(msg.content[0].to_string(), "open a new tab");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    Tool,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
            Sender::Tool => "tool",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured text block as returned by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Provider-assigned invocation id, echoed back with the result.
    pub id: String,
    /// Tool name, e.g. `computer` or `bash`.
    pub name: String,
    /// Raw JSON input payload.
    pub input: serde_json::Value,
}

/// Outcome of executing a tool invocation.
///
/// Output and error are alternatives for display purposes; an image may ride along
/// with either or stand alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded PNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_image: Option<String>,
    /// Out-of-band note for the model, e.g. "tool must be restarted".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl ToolResult {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn image(base64_image: impl Into<String>) -> Self {
        Self {
            base64_image: Some(base64_image.into()),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, base64_image: impl Into<String>) -> Self {
        self.base64_image = Some(base64_image.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn has_output(&self) -> bool {
        self.output.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn has_image(&self) -> bool {
        self.base64_image
            .as_deref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// True when the result carries nothing at all.
    pub fn is_empty(&self) -> bool {
        !self.has_output() && !self.has_error() && !self.has_image() && self.system.is_none()
    }
}

/// One piece of content inside a [`Message`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    Plain(String),
    Text(TextBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResult),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(TextBlock { text: text.into() })
    }

    /// Plain or block text with nothing in it.
    pub fn is_blank(&self) -> bool {
        match self {
            Content::Plain(s) => s.is_empty(),
            Content::Text(block) => block.text.is_empty(),
            Content::ToolUse(_) => false,
            Content::ToolResult(result) => result.is_empty(),
        }
    }
}

impl From<ToolResult> for Content {
    fn from(result: ToolResult) -> Self {
        Content::ToolResult(result)
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(output) = self.output.as_deref().filter(|s| !s.is_empty()) {
            return f.write_str(output);
        }
        if let Some(error) = self.error.as_deref().filter(|s| !s.is_empty()) {
            return write!(f, "Error: {}", error);
        }
        if self.has_image() {
            return f.write_str("[screenshot]");
        }
        if let Some(system) = &self.system {
            return f.write_str(system);
        }
        Ok(())
    }
}

/// The plain-text form used on the event stream.
impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Plain(s) => f.write_str(s),
            Content::Text(block) => f.write_str(&block.text),
            Content::ToolUse(block) => {
                write!(f, "Tool Use: {}\nInput: {}", block.name, block.input)
            }
            Content::ToolResult(result) => result.fmt(f),
        }
    }
}

/// A single conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Sender,
    pub content: Vec<Content>,
}

impl Message {
    pub fn new(role: Sender, content: Vec<Content>) -> Self {
        Self { role, content }
    }

    /// A user turn holding one text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Sender::User, vec![Content::text(text)])
    }
}
