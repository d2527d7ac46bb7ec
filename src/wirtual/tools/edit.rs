//! File viewing and editing tool (`str_replace_editor`).
//!
//! Commands: `view`, `create`, `str_replace`, `insert` and `undo_edit`. Every path must
//! be absolute. Each successful write records the previous file contents so
//! `undo_edit` can step back one edit at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::wirtual::message::ToolResult;
use crate::wirtual::tools::{optional_str, required_str, Tool, ToolError};

/// Lines of context shown around an edit.
const SNIPPET_LINES: usize = 4;

#[derive(Default)]
pub struct EditTool {
    history: Mutex<HashMap<PathBuf, Vec<String>>>,
}

impl EditTool {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_path(&self, command: &str, path: &str) -> Result<PathBuf, ToolError> {
        let path = PathBuf::from(path);
        if !path.is_absolute() {
            return Err(ToolError::InvalidInput(format!(
                "The path {} is not an absolute path, it should start with `/`.",
                path.display()
            )));
        }
        let exists = path.exists();
        if command == "create" {
            if exists {
                return Err(ToolError::InvalidInput(format!(
                    "File already exists at: {}. Cannot overwrite files using command `create`.",
                    path.display()
                )));
            }
            return Ok(path);
        }
        if !exists {
            return Err(ToolError::InvalidInput(format!(
                "The path {} does not exist. Please provide a valid path.",
                path.display()
            )));
        }
        if path.is_dir() && command != "view" {
            return Err(ToolError::InvalidInput(format!(
                "The path {} is a directory and only the `view` command can be used on directories",
                path.display()
            )));
        }
        Ok(path)
    }

    fn push_history(&self, path: &Path, previous: String) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(path.to_path_buf())
            .or_default()
            .push(previous);
    }

    fn pop_history(&self, path: &Path) -> Option<String> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(path)
            .and_then(Vec::pop)
    }

    async fn view(&self, path: &Path, view_range: Option<&Value>) -> Result<ToolResult, ToolError> {
        if path.is_dir() {
            if view_range.is_some() {
                return Err(ToolError::InvalidInput(
                    "The `view_range` parameter is not allowed when `path` points to a directory."
                        .to_string(),
                ));
            }
            let mut entries = Vec::new();
            list_directory(path, 2, &mut entries)?;
            entries.sort();
            return Ok(ToolResult::output(format!(
                "Here's the files and directories up to 2 levels deep in {}, excluding hidden items:\n{}\n",
                path.display(),
                entries.join("\n")
            )));
        }

        let content = tokio::fs::read_to_string(path).await?;
        let lines: Vec<&str> = content.split('\n').collect();
        let (start, end) = match view_range {
            None => (1, lines.len()),
            Some(range) => parse_view_range(range, lines.len())?,
        };
        let shown = lines[start - 1..end].join("\n");
        Ok(ToolResult::output(make_output(
            &shown,
            &path.display().to_string(),
            start,
        )))
    }

    async fn create(&self, path: &Path, file_text: &str) -> Result<ToolResult, ToolError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, file_text).await?;
        self.push_history(path, String::new());
        Ok(ToolResult::output(format!(
            "File created successfully at: {}",
            path.display()
        )))
    }

    async fn str_replace(
        &self,
        path: &Path,
        old_str: &str,
        new_str: &str,
    ) -> Result<ToolResult, ToolError> {
        let content = tokio::fs::read_to_string(path).await?;
        let occurrences = content.matches(old_str).count();
        if occurrences == 0 {
            return Err(ToolError::InvalidInput(format!(
                "No replacement was performed, old_str `{}` did not appear verbatim in {}.",
                old_str,
                path.display()
            )));
        }
        if occurrences > 1 {
            let lines: Vec<String> = content
                .split('\n')
                .enumerate()
                .filter(|(_, line)| line.contains(old_str))
                .map(|(i, _)| (i + 1).to_string())
                .collect();
            return Err(ToolError::InvalidInput(format!(
                "No replacement was performed. Multiple occurrences of old_str `{}` in lines {}. Please ensure it is unique",
                old_str,
                lines.join(", ")
            )));
        }

        let new_content = content.replacen(old_str, new_str, 1);
        tokio::fs::write(path, &new_content).await?;
        self.push_history(path, content.clone());

        let prefix = content.split(old_str).next().unwrap_or_default();
        let replacement_line = prefix.matches('\n').count();
        let start = replacement_line.saturating_sub(SNIPPET_LINES);
        let end = replacement_line + SNIPPET_LINES + new_str.matches('\n').count();
        let snippet = snippet(&new_content, start, end);
        Ok(ToolResult::output(format!(
            "The file {} has been edited. {}Review the changes and make sure they are as expected. Edit the file again if necessary.",
            path.display(),
            make_output(&snippet, &format!("a snippet of {}", path.display()), start + 1)
        )))
    }

    async fn insert(
        &self,
        path: &Path,
        insert_line: usize,
        new_str: &str,
    ) -> Result<ToolResult, ToolError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut lines: Vec<&str> = content.split('\n').collect();
        if insert_line > lines.len() {
            return Err(ToolError::InvalidInput(format!(
                "Invalid `insert_line` parameter: {}. It should be within the range of lines of the file: [0, {}]",
                insert_line,
                lines.len()
            )));
        }
        let inserted: Vec<&str> = new_str.split('\n').collect();
        let inserted_len = inserted.len();
        lines.splice(insert_line..insert_line, inserted);
        let new_content = lines.join("\n");
        tokio::fs::write(path, &new_content).await?;
        self.push_history(path, content);

        let start = insert_line.saturating_sub(SNIPPET_LINES);
        let end = insert_line + inserted_len + SNIPPET_LINES;
        let snippet = snippet(&new_content, start, end);
        Ok(ToolResult::output(format!(
            "The file {} has been edited. {}Review the changes and make sure they are as expected (correct indentation, no duplicate lines, etc). Edit the file again if necessary.",
            path.display(),
            make_output(&snippet, "a snippet of the edited file", start + 1)
        )))
    }

    async fn undo_edit(&self, path: &Path) -> Result<ToolResult, ToolError> {
        let previous = self.pop_history(path).ok_or_else(|| {
            ToolError::InvalidInput(format!("No edit history found for {}.", path.display()))
        })?;
        tokio::fs::write(path, &previous).await?;
        Ok(ToolResult::output(format!(
            "Last edit to {} undone successfully. {}",
            path.display(),
            make_output(&previous, &path.display().to_string(), 1)
        )))
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &'static str {
        "str_replace_editor"
    }

    fn to_params(&self) -> Value {
        json!({"type": "text_editor_20241022", "name": "str_replace_editor"})
    }

    async fn call(&self, input: Value) -> Result<ToolResult, ToolError> {
        let command = required_str(&input, "command")?;
        let path = self.validate_path(command, required_str(&input, "path")?)?;
        match command {
            "view" => self.view(&path, input.get("view_range")).await,
            "create" => {
                let file_text = optional_str(&input, "file_text").ok_or_else(|| {
                    ToolError::InvalidInput(
                        "Parameter `file_text` is required for command: create".to_string(),
                    )
                })?;
                self.create(&path, file_text).await
            }
            "str_replace" => {
                let old_str = optional_str(&input, "old_str").ok_or_else(|| {
                    ToolError::InvalidInput(
                        "Parameter `old_str` is required for command: str_replace".to_string(),
                    )
                })?;
                let new_str = optional_str(&input, "new_str").unwrap_or_default();
                self.str_replace(&path, old_str, new_str).await
            }
            "insert" => {
                let insert_line = input
                    .get("insert_line")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        ToolError::InvalidInput(
                            "Parameter `insert_line` is required for command: insert".to_string(),
                        )
                    })?;
                let new_str = optional_str(&input, "new_str").ok_or_else(|| {
                    ToolError::InvalidInput(
                        "Parameter `new_str` is required for command: insert".to_string(),
                    )
                })?;
                let insert_line = usize::try_from(insert_line).map_err(|_| {
                    ToolError::InvalidInput(format!("Invalid `insert_line` parameter: {}", insert_line))
                })?;
                self.insert(&path, insert_line, new_str).await
            }
            "undo_edit" => self.undo_edit(&path).await,
            other => Err(ToolError::InvalidInput(format!(
                "Unrecognized command {}. The allowed commands for the {} tool are: view, create, str_replace, insert, undo_edit",
                other,
                self.name()
            ))),
        }
    }
}

/// `[start, end]` with 1-based lines; `end == -1` means through the last line.
fn parse_view_range(range: &Value, line_count: usize) -> Result<(usize, usize), ToolError> {
    let invalid = |why: &str| ToolError::InvalidInput(format!("Invalid `view_range`: {}", why));
    let items = range
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| invalid("it should be a list of two integers"))?;
    let start = items[0]
        .as_i64()
        .ok_or_else(|| invalid("start must be an integer"))?;
    let end = items[1]
        .as_i64()
        .ok_or_else(|| invalid("end must be an integer"))?;

    if start < 1 || start as usize > line_count {
        return Err(invalid(&format!(
            "its first element `{}` should be within the range of lines of the file: [1, {}]",
            start, line_count
        )));
    }
    let start = start as usize;
    if end == -1 {
        return Ok((start, line_count));
    }
    if end < start as i64 || end as usize > line_count {
        return Err(invalid(&format!(
            "its second element `{}` should be -1 or within [{}, {}]",
            end, start, line_count
        )));
    }
    Ok((start, end as usize))
}

fn snippet(content: &str, start: usize, end: usize) -> String {
    content
        .split('\n')
        .skip(start)
        .take(end.saturating_sub(start) + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `cat -n` style listing headed by a description of what is shown.
fn make_output(content: &str, descriptor: &str, first_line: usize) -> String {
    let numbered: Vec<String> = content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:6}\t{}", i + first_line, line))
        .collect();
    format!(
        "Here's the result of running `cat -n` on {}:\n{}\n",
        descriptor,
        numbered.join("\n")
    )
}

fn list_directory(dir: &Path, depth: usize, out: &mut Vec<String>) -> Result<(), ToolError> {
    if depth == 0 {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        out.push(path.display().to_string());
        if path.is_dir() {
            list_directory(&path, depth - 1, out)?;
        }
    }
    Ok(())
}
