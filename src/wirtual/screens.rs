//! Display discovery for the computer tool.
//!
//! The layout is detected once at startup and then copied into each request, so the
//! screen a request operates on is part of that request rather than shared state.

use std::fmt;

use tokio::process::Command;

/// Position and size of one physical display in the virtual desktop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
}

impl fmt::Display for ScreenGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{} at {},{})",
            self.name, self.width, self.height, self.x, self.y
        )
    }
}

/// All known displays plus the index of the primary one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenLayout {
    pub screens: Vec<ScreenGeometry>,
    pub primary: usize,
}

impl Default for ScreenLayout {
    /// A single 1280x800 display, used when detection is unavailable.
    fn default() -> Self {
        Self {
            screens: vec![ScreenGeometry {
                name: "default".to_string(),
                width: 1280,
                height: 800,
                x: 0,
                y: 0,
            }],
            primary: 0,
        }
    }
}

impl ScreenLayout {
    pub fn names(&self) -> Vec<String> {
        self.screens.iter().map(|s| s.name.clone()).collect()
    }

    pub fn primary_screen(&self) -> Option<&ScreenGeometry> {
        self.screens.get(self.primary)
    }

    /// Query `xrandr --listmonitors`, falling back to [`Default`] when it is missing or
    /// reports nothing usable.
    pub async fn detect() -> Self {
        let output = match Command::new("xrandr").arg("--listmonitors").output().await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                log::warn!(
                    "xrandr exited with {}; using default screen layout",
                    output.status
                );
                return Self::default();
            }
            Err(e) => {
                log::warn!("xrandr unavailable ({}); using default screen layout", e);
                return Self::default();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_listmonitors(&stdout) {
            Some(layout) => {
                log::info!(
                    "Detected {} screen(s): {:?}",
                    layout.screens.len(),
                    layout.names()
                );
                layout
            }
            None => Self::default(),
        }
    }
}

/// Parse `xrandr --listmonitors` output.
///
/// ```text
/// Monitors: 2
///  0: +*DP-1 2560/597x1440/336+0+0  DP-1
///  1: +HDMI-1 1920/527x1080/296+2560+0  HDMI-1
/// ```
pub fn parse_listmonitors(text: &str) -> Option<ScreenLayout> {
    let mut screens = Vec::new();
    let mut primary = 0;

    for line in text.lines().skip_while(|l| l.starts_with("Monitors:")) {
        let mut parts = line.split_whitespace();
        let (Some(_index), Some(flags), Some(geometry)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Some((width, height, x, y)) = parse_geometry(geometry) else {
            continue;
        };
        let is_primary = flags.contains('*');
        let name = parts
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| flags.trim_start_matches(['+', '*']).to_string());
        if is_primary {
            primary = screens.len();
        }
        screens.push(ScreenGeometry {
            name,
            width,
            height,
            x,
            y,
        });
    }

    if screens.is_empty() {
        None
    } else {
        Some(ScreenLayout { screens, primary })
    }
}

/// `2560/597x1440/336+0+0` → (2560, 1440, 0, 0).
fn parse_geometry(token: &str) -> Option<(u32, u32, i32, i32)> {
    let (size, offsets) = token.split_at(token.find(['+', '-'])?);
    let (w, h) = size.split_once('x')?;
    let width = w.split('/').next()?.parse().ok()?;
    let height = h.split('/').next()?.parse().ok()?;
    let (x, y) = split_offsets(offsets)?;
    Some((width, height, x, y))
}

/// `+0+0` or `-1920+0` → (x, y).
fn split_offsets(s: &str) -> Option<(i32, i32)> {
    let second = s.get(1..)?.find(['+', '-'])? + 1;
    let x = s[..second].parse().ok()?;
    let y = s[second..].parse().ok()?;
    Some((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_monitors() {
        let text = "Monitors: 2\n 0: +DP-1 2560/597x1440/336+0+0  DP-1\n 1: +*HDMI-1 1920/527x1080/296+2560+0  HDMI-1\n";
        let layout = parse_listmonitors(text).unwrap();
        assert_eq!(layout.screens.len(), 2);
        assert_eq!(layout.primary, 1);
        assert_eq!(layout.names(), vec!["DP-1", "HDMI-1"]);
        assert_eq!(layout.screens[1].x, 2560);
        assert_eq!(layout.screens[1].width, 1920);
        assert_eq!(layout.primary_screen().map(|s| s.name.as_str()), Some("HDMI-1"));
    }

    #[test]
    fn test_negative_offsets() {
        assert_eq!(
            parse_geometry("1920/527x1080/296-1920+0"),
            Some((1920, 1080, -1920, 0))
        );
    }

    #[test]
    fn test_garbage_yields_none() {
        assert_eq!(parse_listmonitors("Monitors: 0\n"), None);
        assert_eq!(parse_listmonitors("nothing useful"), None);
    }
}
