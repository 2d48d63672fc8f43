//! Interactive prompt: one task per line
//!
//! Every task starts from a fresh conversation; nothing carries over
//! between lines except the input history.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use crate::agent::AgentLoop;
use crate::tools::failsafe::Failsafe;

// ANSI colors
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Where line history is kept between sessions
fn history_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pilot");
    fs::create_dir_all(&dir)?;
    Ok(dir.join("history"))
}

/// What a line of input asks for
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Skip,
    Quit,
    Task(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "" => Input::Skip,
        "quit" | "exit" | "/quit" | "/exit" | "/q" => Input::Quit,
        _ => Input::Task(line),
    }
}

/// Run tasks read from the terminal until the operator leaves
pub async fn run(agent: &AgentLoop, failsafe: &Failsafe, transcript: Option<&Path>) -> Result<()> {
    let history = history_path()?;
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;
    let _ = rl.load_history(&history);

    println!();
    println!(
        "{}Type a task and press Enter. 'quit' or Ctrl+D exits.{}",
        DIM, RESET
    );

    loop {
        let prompt = format!("\n{}pilot>{} ", CYAN, RESET);

        match rl.readline(&prompt) {
            Ok(line) => {
                let task = match classify(&line) {
                    Input::Skip => continue,
                    Input::Quit => break,
                    Input::Task(task) => task,
                };
                let _ = rl.add_history_entry(task);

                // A trip from the previous task must not cancel this one
                failsafe.reset();
                debug!(task_len = task.len(), "Running task from prompt");

                match agent.run(task).await {
                    Ok(report) => crate::finish_task(&report, transcript),
                    Err(e) => eprintln!("{}Error:{} {:#}", YELLOW, RESET, e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("{}Goodbye!{}", DIM, RESET);
                break;
            }
            Err(e) => {
                eprintln!("{}Error:{} {}", YELLOW, RESET, e);
                break;
            }
        }
    }

    let _ = rl.save_history(&history);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("   "), Input::Skip);
        assert_eq!(classify("quit"), Input::Quit);
        assert_eq!(classify(" EXIT\n"), Input::Quit);
        assert_eq!(classify(" open the browser \n"), Input::Task("open the browser"));
    }
}
