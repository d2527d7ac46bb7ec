//! Tools the agent loop can execute on the host.
//!
//! - **computer**: mouse, keyboard and screenshots through `xdotool` and ImageMagick
//!   `import`, confined to one selected display
//! - **bash**: one-shot shell commands with a timeout
//! - **str_replace_editor**: view, create and edit files by absolute path
//!
//! Tools are grouped in a [`ToolCollection`], which dispatches a model's tool invocation
//! by name and turns every failure into a [`ToolResult`] carrying the error, so the
//! model sees what went wrong instead of the loop aborting.

pub mod bash;
pub mod computer;
pub mod edit;

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::wirtual::message::ToolResult;
use crate::wirtual::screens::ScreenGeometry;

pub use bash::BashTool;
pub use computer::{ComputerAction, ComputerTool};
pub use edit::EditTool;

/// Errors raised by tool implementations.
#[derive(Debug)]
pub enum ToolError {
    /// The model supplied input the tool cannot act on.
    InvalidInput(String),
    /// The underlying command or operation failed.
    Execution(String),
    /// The operation exceeded its time budget.
    Timeout(String),
    /// I/O failure.
    Io(std::io::Error),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::InvalidInput(msg) => f.write_str(msg),
            ToolError::Execution(msg) => f.write_str(msg),
            ToolError::Timeout(msg) => write!(f, "timed out: {}", msg),
            ToolError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Io(err)
    }
}

/// A tool exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to invoke the tool.
    fn name(&self) -> &'static str;

    /// Provider tool definition sent with each request.
    fn to_params(&self) -> Value;

    /// Execute one invocation.
    async fn call(&self, input: Value) -> Result<ToolResult, ToolError>;
}

/// The set of tools available to one agent-loop run.
pub struct ToolCollection {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolCollection {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// computer + bash + editor, with the computer tool bound to `screen`.
    pub fn standard(screen: Option<ScreenGeometry>) -> Self {
        Self::new(vec![
            Box::new(ComputerTool::new(screen)),
            Box::new(BashTool::new()),
            Box::new(EditTool::new()),
        ])
    }

    pub fn to_params(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.to_params()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Run the tool called `name`. Never fails: errors come back inside the result.
    pub async fn run(&self, name: &str, input: Value) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return ToolResult::error(format!("Tool {} is invalid", name));
        };
        match tool.call(input).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("tool '{}' failed: {}", name, e);
                ToolResult::error(e.to_string())
            }
        }
    }
}

/// Read a required string field from a tool input.
pub(crate) fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("{} is required", field)))
}

pub(crate) fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}
