//! Action executor for the `computer` tool

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::action::{self, Action, Point};
use super::desktop::{Desktop, ScreenSize};
use super::failsafe::{in_corner, Failsafe};
use super::screenshot;
use super::{ActionError, ActionExecutor, ActionRequest, ActionResult};

/// Executes actions against a `Desktop`, one at a time
pub struct ComputerTool {
    desktop: Box<dyn Desktop>,
    screen: ScreenSize,
    failsafe: Failsafe,
    corner_failsafe: bool,
    /// Serializes access to the shared input/display surface
    lock: Mutex<()>,
}

impl ComputerTool {
    pub fn new(desktop: Box<dyn Desktop>, screen: ScreenSize, failsafe: Failsafe) -> Self {
        Self {
            desktop,
            screen,
            failsafe,
            corner_failsafe: true,
            lock: Mutex::new(()),
        }
    }

    /// Toggle pointer-in-corner detection
    pub fn with_corner_failsafe(mut self, enabled: bool) -> Self {
        self.corner_failsafe = enabled;
        self
    }

    fn check_bounds(&self, point: Point) -> Result<(), ActionError> {
        let max_x = i64::from(self.screen.width) - 1;
        let max_y = i64::from(self.screen.height) - 1;
        if !(0..=max_x).contains(&point.x) || !(0..=max_y).contains(&point.y) {
            return Err(ActionError::Bounds {
                x: point.x,
                y: point.y,
                max_x,
                max_y,
            });
        }
        // Otherwise the next action would read the model's own move as the operator's gesture
        if self.corner_failsafe && in_corner(point.x, point.y, self.screen.width, self.screen.height) {
            return Err(ActionError::Corner { x: point.x, y: point.y });
        }
        Ok(())
    }

    /// Consult the failsafe before committing an effect
    async fn failsafe_triggered(&self) -> bool {
        if self.failsafe.is_tripped() {
            return true;
        }
        if !self.corner_failsafe {
            return false;
        }
        match self.desktop.pointer_position().await {
            Ok(p) if in_corner(p.x, p.y, self.screen.width, self.screen.height) => {
                self.failsafe.trip("pointer moved to a screen corner");
                true
            }
            Ok(_) => false,
            Err(e) => {
                // Unknown pointer position is not a trip; the primitive will report its own failure
                debug!(error = %e, "Could not read pointer position for failsafe check");
                false
            }
        }
    }

    /// Run a primitive, failing fast if the failsafe trips while it is in flight
    async fn guarded<T>(
        &self,
        op: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ActionError> {
        tokio::select! {
            biased;
            _ = self.failsafe.tripped() => Err(ActionError::Aborted),
            result = op => {
                if self.failsafe.is_tripped() {
                    return Err(ActionError::Aborted);
                }
                result.map_err(|e| ActionError::Os(format!("{:#}", e)))
            }
        }
    }

    async fn perform(&self, action: &Action) -> Result<ActionResult, ActionError> {
        match action {
            Action::Screenshot => {
                let raw = self.guarded(self.desktop.capture_screen()).await?;
                debug!(bytes = raw.len(), "Captured screenshot");
                let screen = self.screen;
                let shot = tokio::task::spawn_blocking(move || screenshot::prepare(&raw, screen))
                    .await
                    .map_err(|e| ActionError::Os(format!("screenshot processing failed: {}", e)))?
                    .map_err(|e| ActionError::Os(format!("{:#}", e)))?;
                Ok(ActionResult::image(shot))
            }
            Action::CursorPosition => {
                let p = self.guarded(self.desktop.pointer_position()).await?;
                Ok(ActionResult::success(format!("X={},Y={}", p.x, p.y)))
            }
            Action::MouseMove(to) => {
                self.guarded(self.desktop.move_pointer(*to)).await?;
                Ok(ActionResult::success(format!("Moved mouse to ({}, {})", to.x, to.y)))
            }
            Action::Click { at, button, count } => {
                self.guarded(self.desktop.click(*at, *button, *count)).await?;
                Ok(ActionResult::success(action::describe_action(action)))
            }
            Action::Drag { from, to } => {
                self.guarded(self.desktop.drag(*from, *to)).await?;
                Ok(ActionResult::success(format!(
                    "Dragged from ({}, {}) to ({}, {})",
                    from.x, from.y, to.x, to.y
                )))
            }
            Action::Type(text) => {
                self.guarded(self.desktop.type_text(text)).await?;
                Ok(ActionResult::success(action::describe_action(action)))
            }
            Action::Key(combo) => {
                self.guarded(self.desktop.send_key(combo)).await?;
                Ok(ActionResult::success(format!("Pressed key: {}", combo)))
            }
            Action::Scroll { at, direction, amount } => {
                self.guarded(self.desktop.scroll(*at, *direction, *amount)).await?;
                Ok(ActionResult::success(format!(
                    "Scrolled {} by {} {} at ({}, {})",
                    direction.as_str(),
                    amount,
                    self.desktop.scroll_unit(*direction),
                    at.x,
                    at.y
                )))
            }
            Action::Wait(secs) => {
                let pause = tokio::time::sleep(std::time::Duration::from_secs_f64(*secs));
                self.guarded(async move {
                    pause.await;
                    Ok(())
                })
                .await?;
                Ok(ActionResult::success(format!("Waited {} seconds", secs)))
            }
        }
    }
}

#[async_trait]
impl ActionExecutor for ComputerTool {
    #[instrument(skip(self, request), fields(id = %request.id, action = %request.action_name()))]
    async fn execute(&self, request: &ActionRequest) -> ActionResult {
        let action = match Action::parse(request) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "Rejected action");
                return ActionResult::failure(e);
            }
        };

        for point in action.points() {
            if let Err(e) = self.check_bounds(point) {
                warn!(error = %e, "Coordinate out of bounds");
                return ActionResult::failure(e);
            }
        }

        let _guard = self.lock.lock().await;

        if self.failsafe_triggered().await {
            return ActionResult::failure(ActionError::Aborted);
        }

        match self.perform(&action).await {
            Ok(result) => {
                info!("Action completed");
                result
            }
            Err(e) => {
                warn!(error = %e, "Action failed");
                ActionResult::failure(e)
            }
        }
    }
}
