//! Operator-triggered cancellation shared by the executor and the agent loop

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

/// Cloneable cancellation handle
///
/// Once tripped it stays tripped until `reset`, so a check after the fact
/// still observes a trip that happened mid-action.
#[derive(Debug, Clone)]
pub struct Failsafe {
    tx: Arc<watch::Sender<bool>>,
}

impl Failsafe {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the failsafe; idempotent
    pub fn trip(&self, reason: &str) {
        if !self.tx.send_replace(true) {
            warn!(reason, "Failsafe triggered");
        }
    }

    pub fn is_tripped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Arm again before a new task
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the failsafe is tripped
    pub async fn tripped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|tripped| *tripped).await;
    }

    /// Trip on Ctrl+C for as long as the returned task runs
    pub fn watch_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let failsafe = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                failsafe.trip("interrupt");
            }
        })
    }
}

impl Default for Failsafe {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a pointer position sits on one of the four screen corners
pub fn in_corner(x: i64, y: i64, width: u32, height: u32) -> bool {
    let max_x = i64::from(width) - 1;
    let max_y = i64::from(height) - 1;
    (x <= 0 || x >= max_x) && (y <= 0 || y >= max_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trip_and_reset() {
        let failsafe = Failsafe::new();
        assert!(!failsafe.is_tripped());

        failsafe.trip("test");
        assert!(failsafe.is_tripped());
        assert!(failsafe.clone().is_tripped());

        failsafe.reset();
        assert!(!failsafe.is_tripped());
    }

    #[tokio::test]
    async fn test_tripped_resolves_after_trip() {
        let failsafe = Failsafe::new();
        let remote = failsafe.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.trip("test");
        });

        tokio::time::timeout(Duration::from_secs(1), failsafe.tripped())
            .await
            .expect("failsafe should resolve");
    }

    #[tokio::test]
    async fn test_tripped_resolves_immediately_when_already_tripped() {
        let failsafe = Failsafe::new();
        failsafe.trip("test");
        tokio::time::timeout(Duration::from_millis(50), failsafe.tripped())
            .await
            .expect("already tripped");
    }

    #[test]
    fn test_in_corner() {
        assert!(in_corner(0, 0, 1920, 1080));
        assert!(in_corner(1919, 0, 1920, 1080));
        assert!(in_corner(0, 1079, 1920, 1080));
        assert!(in_corner(1919, 1079, 1920, 1080));
        assert!(!in_corner(0, 500, 1920, 1080));
        assert!(!in_corner(960, 540, 1920, 1080));
    }
}
