//! Mouse, keyboard and screenshot control of an X display.
//!
//! Input actions are executed with `xdotool`; screenshots are taken with ImageMagick's
//! `import`, cropped to the selected screen. Coordinates from the model are relative to
//! that screen and are offset into the full X root window before use.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::wirtual::message::ToolResult;
use crate::wirtual::screens::ScreenGeometry;
use crate::wirtual::tools::{optional_str, Tool, ToolError};

/// Characters sent per `xdotool type` invocation.
const TYPING_GROUP_SIZE: usize = 50;
const TYPING_DELAY_MS: u32 = 12;

/// Settle time before the follow-up screenshot of an input action.
const SCREENSHOT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputerAction {
    Key,
    Type,
    MouseMove,
    LeftClick,
    LeftClickDrag,
    RightClick,
    MiddleClick,
    DoubleClick,
    Screenshot,
    CursorPosition,
}

impl ComputerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputerAction::Key => "key",
            ComputerAction::Type => "type",
            ComputerAction::MouseMove => "mouse_move",
            ComputerAction::LeftClick => "left_click",
            ComputerAction::LeftClickDrag => "left_click_drag",
            ComputerAction::RightClick => "right_click",
            ComputerAction::MiddleClick => "middle_click",
            ComputerAction::DoubleClick => "double_click",
            ComputerAction::Screenshot => "screenshot",
            ComputerAction::CursorPosition => "cursor_position",
        }
    }

    fn needs_text(&self) -> bool {
        matches!(self, ComputerAction::Key | ComputerAction::Type)
    }

    fn needs_coordinate(&self) -> bool {
        matches!(self, ComputerAction::MouseMove | ComputerAction::LeftClickDrag)
    }
}

impl fmt::Display for ComputerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputerAction {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "key" => ComputerAction::Key,
            "type" => ComputerAction::Type,
            "mouse_move" => ComputerAction::MouseMove,
            "left_click" => ComputerAction::LeftClick,
            "left_click_drag" => ComputerAction::LeftClickDrag,
            "right_click" => ComputerAction::RightClick,
            "middle_click" => ComputerAction::MiddleClick,
            "double_click" => ComputerAction::DoubleClick,
            "screenshot" => ComputerAction::Screenshot,
            "cursor_position" => ComputerAction::CursorPosition,
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "Invalid action: {}",
                    other
                )))
            }
        })
    }
}

/// A validated computer-tool invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputerCommand {
    pub action: ComputerAction,
    pub text: Option<String>,
    pub coordinate: Option<(i32, i32)>,
}

impl ComputerCommand {
    /// Validate raw model input: `text` only for key/type, `coordinate` only for
    /// mouse_move/left_click_drag, both required where used.
    pub fn parse(input: &Value) -> Result<Self, ToolError> {
        let action: ComputerAction = optional_str(input, "action")
            .ok_or_else(|| ToolError::InvalidInput("action is required".to_string()))?
            .parse()?;
        let text = optional_str(input, "text").map(str::to_string);
        let coordinate = match input.get("coordinate") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_coordinate(value)?),
        };

        if action.needs_text() {
            if text.is_none() {
                return Err(ToolError::InvalidInput(format!("text is required for {}", action)));
            }
        } else if text.is_some() {
            return Err(ToolError::InvalidInput(format!("text is not accepted for {}", action)));
        }

        if action.needs_coordinate() {
            if coordinate.is_none() {
                return Err(ToolError::InvalidInput(format!(
                    "coordinate is required for {}",
                    action
                )));
            }
        } else if coordinate.is_some() {
            return Err(ToolError::InvalidInput(format!(
                "coordinate is not accepted for {}",
                action
            )));
        }

        Ok(Self {
            action,
            text,
            coordinate,
        })
    }
}

fn parse_coordinate(value: &Value) -> Result<(i32, i32), ToolError> {
    let invalid = || ToolError::InvalidInput(format!("{} must be a tuple of non-negative ints", value));
    let items = value.as_array().filter(|a| a.len() == 2).ok_or_else(invalid)?;
    let x = items[0].as_i64().filter(|v| *v >= 0).ok_or_else(invalid)?;
    let y = items[1].as_i64().filter(|v| *v >= 0).ok_or_else(invalid)?;
    Ok((
        i32::try_from(x).map_err(|_| invalid())?,
        i32::try_from(y).map_err(|_| invalid())?,
    ))
}

pub struct ComputerTool {
    screen: ScreenGeometry,
}

impl ComputerTool {
    /// Bind the tool to `screen`, or to the default 1280x800 screen when none is
    /// selected.
    pub fn new(screen: Option<ScreenGeometry>) -> Self {
        let screen = screen.unwrap_or_else(|| ScreenGeometry {
            name: "default".to_string(),
            width: 1280,
            height: 800,
            x: 0,
            y: 0,
        });
        Self { screen }
    }

    /// `xdotool` argument lists for an input action, one list per invocation.
    ///
    /// Returns an empty list for screenshot and cursor_position, which are not input
    /// actions. A coordinate outside the selected screen is rejected.
    pub fn xdotool_invocations(
        &self,
        command: &ComputerCommand,
    ) -> Result<Vec<Vec<String>>, ToolError> {
        let abs = match command.coordinate {
            Some(point) => {
                let (x, y) = self.to_root(point)?;
                Some((x.to_string(), y.to_string()))
            }
            None => None,
        };
        let args = to_args;

        let invocations = match command.action {
            ComputerAction::Key => {
                let text = command.text.as_deref().unwrap_or_default();
                vec![args(&["key", "--", text])]
            }
            ComputerAction::Type => {
                let text = command.text.as_deref().unwrap_or_default();
                let delay = TYPING_DELAY_MS.to_string();
                chunk_chars(text, TYPING_GROUP_SIZE)
                    .iter()
                    .map(|chunk| args(&["type", "--delay", delay.as_str(), "--", chunk.as_str()]))
                    .collect()
            }
            ComputerAction::MouseMove => match abs {
                Some((x, y)) => vec![args(&["mousemove", "--sync", x.as_str(), y.as_str()])],
                None => Vec::new(),
            },
            ComputerAction::LeftClickDrag => match abs {
                Some((x, y)) => vec![args(&[
                    "mousedown",
                    "1",
                    "mousemove",
                    "--sync",
                    x.as_str(),
                    y.as_str(),
                    "mouseup",
                    "1",
                ])],
                None => Vec::new(),
            },
            ComputerAction::LeftClick => vec![args(&["click", "1"])],
            ComputerAction::RightClick => vec![args(&["click", "3"])],
            ComputerAction::MiddleClick => vec![args(&["click", "2"])],
            ComputerAction::DoubleClick => {
                vec![args(&["click", "--repeat", "2", "--delay", "500", "1"])]
            }
            ComputerAction::Screenshot | ComputerAction::CursorPosition => Vec::new(),
        };
        Ok(invocations)
    }

    /// Map a screen-relative point into root-window coordinates.
    fn to_root(&self, (x, y): (i32, i32)) -> Result<(i32, i32), ToolError> {
        let inside = |v: i32, extent: u32| u32::try_from(v).map(|v| v < extent).unwrap_or(false);
        if !inside(x, self.screen.width) || !inside(y, self.screen.height) {
            return Err(ToolError::InvalidInput(format!(
                "Coordinates ({}, {}) are out of bounds for the {}x{} screen {}",
                x, y, self.screen.width, self.screen.height, self.screen.name
            )));
        }
        match (x.checked_add(self.screen.x), y.checked_add(self.screen.y)) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(ToolError::InvalidInput(format!(
                "Coordinates ({}, {}) overflow the root window",
                x, y
            ))),
        }
    }

    /// ImageMagick geometry string for the selected screen.
    pub fn crop_geometry(&self) -> String {
        format!(
            "{}x{}+{}+{}",
            self.screen.width, self.screen.height, self.screen.x, self.screen.y
        )
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>, ToolError> {
        log::debug!("{} {}", program, args.join(" "));
        let output = self.command(program).args(args).output().await?;
        if !output.status.success() {
            return Err(ToolError::Execution(format!(
                "{} failed: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Capture the selected screen as base64 PNG.
    pub async fn screenshot(&self) -> Result<ToolResult, ToolError> {
        let args = vec![
            "-window".to_string(),
            "root".to_string(),
            "-crop".to_string(),
            self.crop_geometry(),
            "png:-".to_string(),
        ];
        let png = self.run("import", &args).await?;
        if png.is_empty() {
            return Err(ToolError::Execution("Failed to take screenshot".to_string()));
        }
        Ok(ToolResult::image(STANDARD.encode(png)))
    }

    async fn cursor_position(&self) -> Result<ToolResult, ToolError> {
        let args = vec!["getmouselocation".to_string(), "--shell".to_string()];
        let stdout = self.run("xdotool", &args).await?;
        let (x, y) = parse_mouse_location(&String::from_utf8_lossy(&stdout)).ok_or_else(|| {
            ToolError::Execution("could not parse xdotool mouse location".to_string())
        })?;
        Ok(ToolResult::output(format!(
            "X={},Y={}",
            x.saturating_sub(self.screen.x),
            y.saturating_sub(self.screen.y)
        )))
    }
}

#[async_trait]
impl Tool for ComputerTool {
    fn name(&self) -> &'static str {
        "computer"
    }

    fn to_params(&self) -> Value {
        json!({
            "type": "computer_20241022",
            "name": "computer",
            "display_width_px": self.screen.width,
            "display_height_px": self.screen.height,
            "display_number": Value::Null,
        })
    }

    async fn call(&self, input: Value) -> Result<ToolResult, ToolError> {
        let command = ComputerCommand::parse(&input)?;
        match command.action {
            ComputerAction::Screenshot => self.screenshot().await,
            ComputerAction::CursorPosition => self.cursor_position().await,
            _ => {
                let mut output = String::new();
                for args in self.xdotool_invocations(&command)? {
                    let stdout = self.run("xdotool", &args).await?;
                    output.push_str(&String::from_utf8_lossy(&stdout));
                }
                tokio::time::sleep(SCREENSHOT_DELAY).await;
                let shot = self.screenshot().await?;
                let mut result = if output.trim().is_empty() {
                    ToolResult::default()
                } else {
                    ToolResult::output(output.trim().to_string())
                };
                result.base64_image = shot.base64_image;
                Ok(result)
            }
        }
    }
}

fn to_args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Parse `xdotool getmouselocation --shell` output into root-window coordinates.
fn parse_mouse_location(text: &str) -> Option<(i32, i32)> {
    let mut x = None;
    let mut y = None;
    for line in text.lines() {
        if let Some(v) = line.strip_prefix("X=") {
            x = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("Y=") {
            y = v.trim().parse().ok();
        }
    }
    Some((x?, y?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn second_screen() -> ComputerTool {
        ComputerTool::new(Some(ScreenGeometry {
            name: "HDMI-1".into(),
            width: 1920,
            height: 1080,
            x: 2560,
            y: 0,
        }))
    }

    #[test]
    fn test_parse_validates_argument_shape() {
        assert!(ComputerCommand::parse(&json!({"action": "screenshot"})).is_ok());
        assert!(ComputerCommand::parse(&json!({"action": "type"})).is_err());
        assert!(ComputerCommand::parse(&json!({"action": "left_click", "text": "x"})).is_err());
        assert!(ComputerCommand::parse(&json!({"action": "mouse_move"})).is_err());
        assert!(
            ComputerCommand::parse(&json!({"action": "mouse_move", "coordinate": [-1, 4]}))
                .is_err()
        );
        assert!(ComputerCommand::parse(&json!({"action": "fly"})).is_err());

        let cmd =
            ComputerCommand::parse(&json!({"action": "mouse_move", "coordinate": [10, 20]}))
                .unwrap();
        assert_eq!(cmd.coordinate, Some((10, 20)));
    }

    #[test]
    fn test_coordinates_are_offset_to_selected_screen() {
        let tool = second_screen();
        let cmd = ComputerCommand::parse(&json!({"action": "mouse_move", "coordinate": [10, 20]}))
            .unwrap();
        assert_eq!(
            tool.xdotool_invocations(&cmd).unwrap(),
            vec![vec!["mousemove", "--sync", "2570", "20"]]
        );
        assert_eq!(tool.crop_geometry(), "1920x1080+2560+0");
    }

    #[test]
    fn test_coordinates_outside_the_screen_are_rejected() {
        let tool = second_screen();
        for coordinate in [json!([2147483647, 0]), json!([1920, 0]), json!([0, 1080])] {
            let cmd = ComputerCommand::parse(
                &json!({"action": "mouse_move", "coordinate": coordinate}),
            )
            .unwrap();
            match tool.xdotool_invocations(&cmd) {
                Err(ToolError::InvalidInput(msg)) => assert!(msg.contains("out of bounds")),
                other => panic!("expected InvalidInput, got {:?}", other),
            }
        }

        let edge = ComputerCommand::parse(
            &json!({"action": "left_click_drag", "coordinate": [1919, 1079]}),
        )
        .unwrap();
        let invocations = tool.xdotool_invocations(&edge).unwrap();
        assert_eq!(invocations[0][4], "4479");
        assert_eq!(invocations[0][5], "1079");
    }

    #[tokio::test]
    async fn test_huge_coordinate_becomes_error_result() {
        let result = second_screen()
            .call(json!({"action": "mouse_move", "coordinate": [2147483647, 0]}))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn test_typing_is_chunked() {
        let tool = ComputerTool::new(None);
        let text: String = "a".repeat(120);
        let cmd = ComputerCommand::parse(&json!({"action": "type", "text": text})).unwrap();
        let invocations = tool.xdotool_invocations(&cmd).unwrap();
        assert_eq!(invocations.len(), 3);
        assert_eq!(invocations[0].last().map(String::len), Some(50));
        assert_eq!(invocations[2].last().map(String::len), Some(20));
    }

    #[test]
    fn test_mouse_location_parsing() {
        let out = "X=2600\nY=40\nSCREEN=0\nWINDOW=123\n";
        assert_eq!(parse_mouse_location(out), Some((2600, 40)));
        assert_eq!(parse_mouse_location("garbage"), None);
    }

    #[test]
    fn test_params_advertise_screen_size() {
        let params = second_screen().to_params();
        assert_eq!(params["display_width_px"], 1920);
        assert_eq!(params["display_height_px"], 1080);
        assert_eq!(params["type"], "computer_20241022");
    }
}
