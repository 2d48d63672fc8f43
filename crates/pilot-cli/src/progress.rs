//! Spinner shown while waiting on the model

use std::io::{stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

// ANSI escape codes
const CLEAR_LINE: &str = "\x1b[2K\r";
const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// ASCII fallback for terminals without Unicode
const ASCII_SPINNER: &[&str] = &["|", "/", "-", "\\"];

/// Elapsed time is only shown once a wait gets noticeable
const SHOW_ELAPSED_AFTER: Duration = Duration::from_secs(2);

/// A terminal spinner with an elapsed-time counter
pub struct Spinner {
    message: String,
    is_running: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
    use_unicode: bool,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_running: Arc::new(AtomicBool::new(false)),
            handle: None,
            use_unicode: supports_unicode(),
        }
    }

    /// Start the animation on a background task
    pub fn start(&mut self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let is_running = self.is_running.clone();
        let message = self.message.clone();
        let frames = if self.use_unicode { SPINNER_FRAMES } else { ASCII_SPINNER };

        self.handle = Some(tokio::spawn(async move {
            let started = Instant::now();
            let mut idx = 0;
            let mut tick = interval(Duration::from_millis(80));

            print!("{}", HIDE_CURSOR);
            let _ = stdout().flush();

            while is_running.load(Ordering::SeqCst) {
                print!(
                    "{}{}{} {}{}{}",
                    CLEAR_LINE,
                    CYAN,
                    frames[idx],
                    message,
                    RESET,
                    elapsed_suffix(started.elapsed())
                );
                let _ = stdout().flush();
                idx = (idx + 1) % frames.len();
                tick.tick().await;
            }

            print!("{}{}", CLEAR_LINE, SHOW_CURSOR);
            let _ = stdout().flush();
        }));
    }

    /// Stop and clear the line
    pub async fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if self.handle.is_some() {
            print!("{}", SHOW_CURSOR);
            let _ = stdout().flush();
        }
    }
}

fn elapsed_suffix(elapsed: Duration) -> String {
    if elapsed < SHOW_ELAPSED_AFTER {
        return String::new();
    }
    format!(" {}({}s){}", DIM, elapsed.as_secs(), RESET)
}

/// Check if the terminal likely supports Unicode
fn supports_unicode() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term.contains("xterm") || term.contains("256color") || term.contains("kitty") {
            return true;
        }
    }

    for var in &["LC_ALL", "LC_CTYPE", "LANG"] {
        if let Ok(val) = std::env::var(var) {
            if val.to_lowercase().contains("utf") {
                return true;
            }
        }
    }

    false
}
