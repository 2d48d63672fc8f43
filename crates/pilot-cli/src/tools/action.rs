//! Parsing of computer-tool input into typed actions

use pilot_core::COMPUTER_TOOL_NAME;
use serde_json::Value;

use super::{ActionError, ActionRequest};

/// Longest `wait` the model may request, in seconds
pub const MAX_WAIT_SECS: f64 = 60.0;

/// Default scroll distance in wheel clicks
pub const DEFAULT_SCROLL_AMOUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn parse(name: &str) -> Result<Self, ActionError> {
        match name {
            "left" | "primary" => Ok(MouseButton::Left),
            "right" | "secondary" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(ActionError::InvalidInput(format!("unknown mouse button '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    fn parse(name: &str) -> Result<Self, ActionError> {
        match name {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(ActionError::InvalidInput(format!("invalid scroll direction '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        }
    }
}

/// Screen coordinate as sent by the model; may be out of range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Screenshot,
    CursorPosition,
    MouseMove(Point),
    Click {
        at: Point,
        button: MouseButton,
        count: u8,
    },
    Drag {
        from: Point,
        to: Point,
    },
    Type(String),
    Key(String),
    Scroll {
        at: Point,
        direction: ScrollDirection,
        amount: u32,
    },
    Wait(f64),
}

impl Action {
    /// Parse a request, rejecting foreign tools and unknown actions
    pub fn parse(request: &ActionRequest) -> Result<Self, ActionError> {
        if request.tool != COMPUTER_TOOL_NAME {
            return Err(ActionError::Unsupported(format!("unknown tool '{}'", request.tool)));
        }

        let input = &request.input;
        match request.action_name() {
            "screenshot" => Ok(Action::Screenshot),
            "cursor_position" => Ok(Action::CursorPosition),
            "mouse_move" | "move" => Ok(Action::MouseMove(coordinate(input, "coordinate")?)),
            "left_click" => click(input, MouseButton::Left, 1),
            "click" => {
                let button = match input.get("button").and_then(|v| v.as_str()) {
                    Some(name) => MouseButton::parse(name)?,
                    None => MouseButton::Left,
                };
                click(input, button, 1)
            }
            "right_click" => click(input, MouseButton::Right, 1),
            "middle_click" => click(input, MouseButton::Middle, 1),
            "double_click" => click(input, MouseButton::Left, 2),
            "triple_click" => click(input, MouseButton::Left, 3),
            "left_click_drag" => Ok(Action::Drag {
                from: coordinate(input, "start_coordinate")?,
                to: coordinate(input, "coordinate")?,
            }),
            "type" => Ok(Action::Type(string(input, &["text"])?)),
            "key" => {
                let combo = string(input, &["text", "key"])?;
                if combo.trim().is_empty() {
                    return Err(ActionError::InvalidInput("key must not be empty".to_string()));
                }
                Ok(Action::Key(combo))
            }
            "scroll" => {
                let at = coordinate(input, "coordinate")?;
                let direction = ScrollDirection::parse(&string(input, &["scroll_direction"])?)?;
                let amount = match input.get("scroll_amount") {
                    None | Some(Value::Null) => DEFAULT_SCROLL_AMOUNT,
                    Some(v) => v
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| {
                            ActionError::InvalidInput("scroll_amount must be a non-negative integer".to_string())
                        })?,
                };
                Ok(Action::Scroll { at, direction, amount })
            }
            "wait" => {
                let secs = match input.get("duration") {
                    None | Some(Value::Null) => 1.0,
                    Some(v) => v.as_f64().ok_or_else(|| {
                        ActionError::InvalidInput("duration must be a number of seconds".to_string())
                    })?,
                };
                if !(0.0..=MAX_WAIT_SECS).contains(&secs) {
                    return Err(ActionError::InvalidInput(format!(
                        "duration must be between 0 and {} seconds",
                        MAX_WAIT_SECS
                    )));
                }
                Ok(Action::Wait(secs))
            }
            "" => Err(ActionError::InvalidInput("missing 'action' field".to_string())),
            other => Err(ActionError::Unsupported(other.to_string())),
        }
    }

    /// Read-only actions do not need operator approval
    pub fn is_read_only(&self) -> bool {
        matches!(self, Action::Screenshot | Action::CursorPosition | Action::Wait(_))
    }

    /// All coordinates the action touches
    pub fn points(&self) -> Vec<Point> {
        match self {
            Action::MouseMove(p) => vec![*p],
            Action::Click { at, .. } | Action::Scroll { at, .. } => vec![*at],
            Action::Drag { from, to } => vec![*from, *to],
            _ => Vec::new(),
        }
    }
}

fn click(input: &Value, button: MouseButton, count: u8) -> Result<Action, ActionError> {
    Ok(Action::Click {
        at: coordinate(input, "coordinate")?,
        button,
        count,
    })
}

fn coordinate(input: &Value, field: &str) -> Result<Point, ActionError> {
    let pair = input
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ActionError::InvalidInput(format!("'{}' is required as [x, y]", field)))?;

    match pair.as_slice() {
        [x, y] => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Ok(Point { x, y }),
            _ => Err(ActionError::InvalidInput(format!("'{}' must hold two integers", field))),
        },
        _ => Err(ActionError::InvalidInput(format!("'{}' must have exactly two elements", field))),
    }
}

fn string(input: &Value, fields: &[&str]) -> Result<String, ActionError> {
    fields
        .iter()
        .find_map(|f| input.get(*f).and_then(|v| v.as_str()))
        .map(str::to_string)
        .ok_or_else(|| ActionError::InvalidInput(format!("'{}' is required", fields[0])))
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let cut: String = text.chars().take(limit).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Human-readable description of a request
pub fn describe(request: &ActionRequest) -> String {
    match Action::parse(request) {
        Ok(action) => describe_action(&action),
        Err(ActionError::Unsupported(what)) => format!("Unsupported action: {}", what),
        Err(_) => format!("Malformed {} action", request.action_name()),
    }
}

pub fn describe_action(action: &Action) -> String {
    match action {
        Action::Screenshot => "Take a screenshot".to_string(),
        Action::CursorPosition => "Read cursor position".to_string(),
        Action::MouseMove(p) => format!("Move mouse to ({}, {})", p.x, p.y),
        Action::Click { at, button, count } => {
            let kind = match (button, count) {
                (MouseButton::Left, 2) => "Double click",
                (MouseButton::Left, 3) => "Triple click",
                (MouseButton::Left, _) => "Left click",
                (MouseButton::Right, _) => "Right click",
                (MouseButton::Middle, _) => "Middle click",
            };
            format!("{} at ({}, {})", kind, at.x, at.y)
        }
        Action::Drag { from, to } => {
            format!("Drag from ({}, {}) to ({}, {})", from.x, from.y, to.x, to.y)
        }
        Action::Type(text) => format!("Type: '{}'", preview(text, 30)),
        Action::Key(combo) => format!("Press key: {}", combo),
        Action::Scroll { at, direction, amount } => format!(
            "Scroll {} by {} at ({}, {})",
            direction.as_str(),
            amount,
            at.x,
            at.y
        ),
        Action::Wait(secs) => format!("Wait {} seconds", secs),
    }
}
