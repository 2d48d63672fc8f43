//! OS automation boundary
//!
//! `Desktop` is the only thing that touches the pointer, keyboard and screen.
//! `CommandDesktop` drives the platform helper programs as child processes:
//! `screencapture` + `cliclick` on macOS, `import` + `xdotool` on X11.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument};

use super::action::{MouseButton, Point, ScrollDirection};

/// Per-command timeout for helper programs
const COMMAND_TIMEOUT_SECS: u64 = 10;

/// Delay between typed characters, in milliseconds
const TYPE_DELAY_MS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Primitive OS operations
#[async_trait]
pub trait Desktop: Send + Sync {
    async fn screen_size(&self) -> Result<ScreenSize>;
    /// PNG bytes of the whole screen
    async fn capture_screen(&self) -> Result<Vec<u8>>;
    async fn pointer_position(&self) -> Result<Point>;
    async fn move_pointer(&self, to: Point) -> Result<()>;
    async fn click(&self, at: Point, button: MouseButton, count: u8) -> Result<()>;
    async fn drag(&self, from: Point, to: Point) -> Result<()>;
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn send_key(&self, combo: &str) -> Result<()>;
    async fn scroll(&self, at: Point, direction: ScrollDirection, amount: u32) -> Result<()>;

    /// What one unit of `scroll` amounts to on this desktop
    fn scroll_unit(&self, _direction: ScrollDirection) -> &'static str {
        "wheel click(s)"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    X11,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::X11
        }
    }

    fn input_program(&self) -> &'static str {
        match self {
            Platform::MacOs => "cliclick",
            Platform::X11 => "xdotool",
        }
    }

    fn capture_program(&self) -> &'static str {
        match self {
            Platform::MacOs => "screencapture",
            Platform::X11 => "import",
        }
    }
}

/// Desktop driven through helper programs
#[derive(Debug, Clone)]
pub struct CommandDesktop {
    platform: Platform,
    input: PathBuf,
    capture: PathBuf,
}

impl CommandDesktop {
    /// Locate the helper programs for the current platform
    pub fn detect() -> Result<Self> {
        let platform = Platform::current();
        let input = which::which(platform.input_program()).with_context(|| {
            format!(
                "'{}' not found on PATH; it is required to control the pointer and keyboard",
                platform.input_program()
            )
        })?;
        let capture = which::which(platform.capture_program()).with_context(|| {
            format!(
                "'{}' not found on PATH; it is required to capture screenshots",
                platform.capture_program()
            )
        })?;

        debug!(?platform, input = %input.display(), capture = %capture.display(), "Desktop helpers located");
        Ok(Self { platform, input, capture })
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<String> {
        debug!(program = %program.display(), ?args, "Running desktop helper");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), cmd.output())
            .await
            .with_context(|| {
                format!("{} timed out after {} seconds", program.display(), COMMAND_TIMEOUT_SECS)
            })?
            .with_context(|| format!("Failed to run {}", program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn input(&self, args: Vec<String>) -> Result<String> {
        self.run(&self.input, &args).await
    }
}

#[async_trait]
impl Desktop for CommandDesktop {
    async fn screen_size(&self) -> Result<ScreenSize> {
        match self.platform {
            Platform::X11 => {
                let out = self.input(vec!["getdisplaygeometry".to_string()]).await?;
                parse_geometry(&out)
            }
            Platform::MacOs => {
                let osascript = which::which("osascript").context("'osascript' not found")?;
                let out = self
                    .run(
                        &osascript,
                        &[
                            "-e".to_string(),
                            "tell application \"Finder\" to get bounds of window of desktop".to_string(),
                        ],
                    )
                    .await?;
                parse_bounds(&out)
            }
        }
    }

    #[instrument(skip(self))]
    async fn capture_screen(&self) -> Result<Vec<u8>> {
        let file = tempfile::Builder::new()
            .prefix("pilot-screen-")
            .suffix(".png")
            .tempfile()
            .context("Failed to create screenshot file")?;
        let path = file.path().to_string_lossy().into_owned();

        let args = match self.platform {
            Platform::MacOs => vec!["-x".to_string(), "-C".to_string(), path],
            Platform::X11 => vec!["-window".to_string(), "root".to_string(), path],
        };
        self.run(&self.capture, &args).await?;

        let bytes = tokio::fs::read(file.path())
            .await
            .context("Failed to read captured screenshot")?;
        if bytes.is_empty() {
            anyhow::bail!("Screenshot capture produced an empty file");
        }
        Ok(bytes)
    }

    async fn pointer_position(&self) -> Result<Point> {
        match self.platform {
            Platform::X11 => {
                let out = self
                    .input(vec!["getmouselocation".to_string(), "--shell".to_string()])
                    .await?;
                parse_xdotool_location(&out)
            }
            Platform::MacOs => {
                let out = self.input(vec!["p".to_string()]).await?;
                parse_pair(out.trim(), ',')
            }
        }
    }

    async fn move_pointer(&self, to: Point) -> Result<()> {
        self.input(move_args(self.platform, to)).await.map(drop)
    }

    async fn click(&self, at: Point, button: MouseButton, count: u8) -> Result<()> {
        self.input(click_args(self.platform, at, button, count)?).await.map(drop)
    }

    async fn drag(&self, from: Point, to: Point) -> Result<()> {
        self.input(drag_args(self.platform, from, to)).await.map(drop)
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.input(type_args(self.platform, text)).await.map(drop)
    }

    async fn send_key(&self, combo: &str) -> Result<()> {
        self.input(key_args(self.platform, combo)?).await.map(drop)
    }

    fn scroll_unit(&self, direction: ScrollDirection) -> &'static str {
        match (self.platform, direction) {
            (Platform::X11, _) => "wheel click(s)",
            (Platform::MacOs, ScrollDirection::Up | ScrollDirection::Down) => "page(s), sent as page keys",
            (Platform::MacOs, _) => "arrow key press(es)",
        }
    }

    async fn scroll(&self, at: Point, direction: ScrollDirection, amount: u32) -> Result<()> {
        match self.platform {
            Platform::X11 => {
                self.move_pointer(at).await?;
                self.input(x11_scroll_args(direction, amount)).await.map(drop)
            }
            // cliclick has no wheel support; page keys are the closest effect
            Platform::MacOs => {
                self.move_pointer(at).await?;
                let key = match direction {
                    ScrollDirection::Up => "page-up",
                    ScrollDirection::Down => "page-down",
                    ScrollDirection::Left => "arrow-left",
                    ScrollDirection::Right => "arrow-right",
                };
                let presses: Vec<String> = (0..amount.max(1)).map(|_| format!("kp:{}", key)).collect();
                self.input(presses).await.map(drop)
            }
        }
    }
}

fn move_args(platform: Platform, to: Point) -> Vec<String> {
    match platform {
        Platform::X11 => vec!["mousemove".into(), to.x.to_string(), to.y.to_string()],
        Platform::MacOs => vec![format!("m:{},{}", to.x, to.y)],
    }
}

fn click_args(platform: Platform, at: Point, button: MouseButton, count: u8) -> Result<Vec<String>> {
    match platform {
        Platform::X11 => {
            let code = match button {
                MouseButton::Left => "1",
                MouseButton::Middle => "2",
                MouseButton::Right => "3",
            };
            Ok(vec![
                "mousemove".into(),
                at.x.to_string(),
                at.y.to_string(),
                "click".into(),
                "--repeat".into(),
                count.max(1).to_string(),
                code.into(),
            ])
        }
        Platform::MacOs => {
            let verb = match (button, count) {
                (MouseButton::Left, 2) => "dc",
                (MouseButton::Left, 3) => "tc",
                (MouseButton::Left, _) => "c",
                (MouseButton::Right, _) => "rc",
                (MouseButton::Middle, _) => anyhow::bail!("middle click is not supported by cliclick"),
            };
            Ok(vec![format!("{}:{},{}", verb, at.x, at.y)])
        }
    }
}

fn drag_args(platform: Platform, from: Point, to: Point) -> Vec<String> {
    match platform {
        Platform::X11 => vec![
            "mousemove".into(),
            from.x.to_string(),
            from.y.to_string(),
            "mousedown".into(),
            "1".into(),
            "mousemove".into(),
            "--sync".into(),
            to.x.to_string(),
            to.y.to_string(),
            "mouseup".into(),
            "1".into(),
        ],
        Platform::MacOs => vec![
            format!("dd:{},{}", from.x, from.y),
            format!("dm:{},{}", to.x, to.y),
            format!("du:{},{}", to.x, to.y),
        ],
    }
}

fn type_args(platform: Platform, text: &str) -> Vec<String> {
    match platform {
        Platform::X11 => vec![
            "type".into(),
            "--delay".into(),
            TYPE_DELAY_MS.to_string(),
            "--".into(),
            text.to_string(),
        ],
        Platform::MacOs => vec![format!("t:{}", text)],
    }
}

fn key_args(platform: Platform, combo: &str) -> Result<Vec<String>> {
    match platform {
        // xdotool understands the combo syntax the model uses
        Platform::X11 => Ok(vec!["key".into(), "--".into(), combo.to_string()]),
        Platform::MacOs => mac_key_args(combo),
    }
}

fn mac_key_args(combo: &str) -> Result<Vec<String>> {
    let lowered = combo.to_lowercase();
    let parts: Vec<&str> = lowered.split('+').map(str::trim).filter(|p| !p.is_empty()).collect();
    let (key, modifiers) = parts
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("empty key combination"))?;

    let modifiers = modifiers
        .iter()
        .map(|m| match *m {
            "ctrl" | "control" | "cmd" | "command" | "super" | "meta" => Ok("cmd"),
            "alt" | "option" => Ok("alt"),
            "shift" => Ok("shift"),
            "fn" => Ok("fn"),
            other => Err(anyhow::anyhow!("unknown modifier '{}'", other)),
        })
        .collect::<Result<Vec<_>>>()?;

    let press = if key.chars().count() == 1 {
        format!("t:{}", key)
    } else {
        let name = match *key {
            "return" | "enter" => "return",
            "escape" | "esc" => "esc",
            "tab" => "tab",
            "space" => "space",
            "backspace" => "delete",
            "delete" => "fwd-delete",
            "up" => "arrow-up",
            "down" => "arrow-down",
            "left" => "arrow-left",
            "right" => "arrow-right",
            "page_up" | "pageup" => "page-up",
            "page_down" | "pagedown" => "page-down",
            "home" => "home",
            "end" => "end",
            f if f.starts_with('f') && f[1..].parse::<u8>().map_or(false, |n| (1..=16).contains(&n)) => f,
            other => anyhow::bail!("unknown key '{}'", other),
        };
        format!("kp:{}", name)
    };

    let mut args = Vec::new();
    if !modifiers.is_empty() {
        args.push(format!("kd:{}", modifiers.join(",")));
    }
    args.push(press);
    if !modifiers.is_empty() {
        args.push(format!("ku:{}", modifiers.join(",")));
    }
    Ok(args)
}

fn x11_scroll_args(direction: ScrollDirection, amount: u32) -> Vec<String> {
    let button = match direction {
        ScrollDirection::Up => "4",
        ScrollDirection::Down => "5",
        ScrollDirection::Left => "6",
        ScrollDirection::Right => "7",
    };
    vec![
        "click".into(),
        "--repeat".into(),
        amount.max(1).to_string(),
        button.into(),
    ]
}

fn parse_pair(text: &str, sep: char) -> Result<Point> {
    let (x, y) = text
        .split_once(sep)
        .ok_or_else(|| anyhow::anyhow!("unexpected pointer output: {}", text))?;
    Ok(Point {
        x: x.trim().parse().context("invalid x coordinate")?,
        y: y.trim().parse().context("invalid y coordinate")?,
    })
}

fn parse_geometry(text: &str) -> Result<ScreenSize> {
    let mut parts = text.split_whitespace().map(str::parse::<u32>);
    match (parts.next(), parts.next()) {
        (Some(Ok(width)), Some(Ok(height))) if width > 0 && height > 0 => Ok(ScreenSize { width, height }),
        _ => anyhow::bail!("unexpected display geometry: {}", text.trim()),
    }
}

/// Parses Finder desktop bounds, e.g. "0, 0, 1512, 982"
fn parse_bounds(text: &str) -> Result<ScreenSize> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<i64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("unexpected desktop bounds: {}", text.trim()))?;

    match values.as_slice() {
        [left, top, right, bottom] if right > left && bottom > top => Ok(ScreenSize {
            width: u32::try_from(right - left)?,
            height: u32::try_from(bottom - top)?,
        }),
        _ => anyhow::bail!("unexpected desktop bounds: {}", text.trim()),
    }
}

fn parse_xdotool_location(text: &str) -> Result<Point> {
    let mut x = None;
    let mut y = None;
    for line in text.lines() {
        if let Some(v) = line.strip_prefix("X=") {
            x = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("Y=") {
            y = v.trim().parse().ok();
        }
    }
    match (x, y) {
        (Some(x), Some(y)) => Ok(Point { x, y }),
        _ => anyhow::bail!("unexpected pointer output: {}", text.trim()),
    }
}
