//! Terminal front end. Polls the rig on a fixed interval and reads operator
//! commands from stdin.

use std::path::PathBuf;
use std::time::Duration;

use image::ImageFormat;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::session::{compose_side_by_side, CloseChoice, CloseOutcome, Notice, PollOutcome, UiController};
use crate::shared::errors::AppError;

/// Width of the white bar between cameras in a composed preview.
pub const PREVIEW_SEPARATOR: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Record,
    Stop,
    Quit,
    Status,
    Snapshot,
    Help,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> ConsoleInput {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => ConsoleInput::Empty,
        "r" | "record" => ConsoleInput::Record,
        "s" | "stop" => ConsoleInput::Stop,
        "q" | "quit" | "exit" => ConsoleInput::Quit,
        "p" | "status" => ConsoleInput::Status,
        "snap" | "snapshot" => ConsoleInput::Snapshot,
        "h" | "help" | "?" => ConsoleInput::Help,
        other => ConsoleInput::Unknown(other.to_string()),
    }
}

/// `y` saves, `n` discards, anything else keeps recording.
pub fn parse_close_answer(line: &str) -> CloseChoice {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => CloseChoice::SaveAndQuit,
        "n" | "no" => CloseChoice::QuitWithoutSaving,
        _ => CloseChoice::KeepRecording,
    }
}

pub fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Saved { label, path, .. } => format!("[{label}] saved {}", path.display()),
        Notice::Alert { label, message, .. } => format!("[{label}] error: {message}"),
        Notice::Fatal { label, message, .. } => format!("[{label}] FATAL: {message}"),
    }
}

const HELP: &str = "commands: r(ecord)  s(top)  p (status)  snap  q(uit)";
const CLOSE_QUESTION: &str =
    "recording in progress. save before quitting? [y] save  [n] discard  [anything else] keep recording";

struct Console {
    controller: UiController,
    awaiting_close_answer: bool,
    last_statuses: Vec<String>,
}

impl Console {
    fn new(controller: UiController) -> Self {
        Self {
            controller,
            awaiting_close_answer: false,
            last_statuses: Vec::new(),
        }
    }

    fn tick(&mut self) -> bool {
        let outcome = self.controller.poll();
        self.report(&outcome);
        outcome.exit
    }

    fn report(&mut self, outcome: &PollOutcome) {
        for notice in &outcome.notices {
            println!("{}", render_notice(notice));
        }

        let statuses: Vec<String> = self
            .controller
            .coordinator()
            .views()
            .iter()
            .map(|v| format!("{}: {}", v.label, v.status))
            .collect();
        if statuses != self.last_statuses {
            println!("{}", statuses.join("  |  "));
            self.last_statuses = statuses;
        }
    }

    fn handle_line(&mut self, line: &str) {
        if self.awaiting_close_answer {
            self.awaiting_close_answer = false;
            let choice = parse_close_answer(line);
            self.close_with(choice);
            return;
        }

        match parse_input(line) {
            ConsoleInput::Record => match self.controller.record() {
                Ok(Some(paths)) => {
                    for p in paths {
                        println!("recording -> {}", p.container.display());
                    }
                }
                Ok(None) => println!("record is not available right now"),
                Err(e) => println!("cannot create {}: {e}", self.controller.output_dir().display()),
            },
            ConsoleInput::Stop => {
                if !self.controller.stop() {
                    println!("nothing is recording");
                }
            }
            ConsoleInput::Quit => {
                if self.controller.needs_close_prompt() {
                    println!("{CLOSE_QUESTION}");
                    self.awaiting_close_answer = true;
                } else {
                    self.close_with(CloseChoice::SaveAndQuit);
                }
            }
            ConsoleInput::Status => self.print_status(),
            ConsoleInput::Snapshot => self.snapshot(),
            ConsoleInput::Help => println!("{HELP}"),
            ConsoleInput::Empty => {}
            ConsoleInput::Unknown(other) => println!("unknown command '{other}'. {HELP}"),
        }
    }

    fn close_with(&mut self, choice: CloseChoice) {
        let mut answer = move || choice;
        match self.controller.close(&mut answer) {
            CloseOutcome::Closed => println!("closing"),
            CloseOutcome::Deferred => println!("stopping, will quit once recordings are saved"),
            CloseOutcome::Cancelled => println!("still recording"),
        }
    }

    fn print_status(&self) {
        let controls = self.controller.controls();
        for view in self.controller.coordinator().views() {
            let mut flags = Vec::new();
            if view.ready {
                flags.push("ready");
            }
            if view.recording {
                flags.push("recording");
            }
            if view.fatal.is_some() {
                flags.push("failed");
            }
            println!("{}: {} [{}]", view.label, view.status, flags.join(", "));
        }
        println!(
            "record {}  stop {}",
            if controls.record_enabled { "on" } else { "off" },
            if controls.stop_enabled { "on" } else { "off" }
        );
    }

    fn snapshot(&self) {
        let frames: Option<Vec<_>> = self.controller.coordinator().latest_frames().into_iter().collect();
        let Some(composed) = frames.and_then(|f| compose_side_by_side(&f, PREVIEW_SEPARATOR)) else {
            println!("no preview frame yet");
            return;
        };

        let path: PathBuf = self.controller.output_dir().join("preview.jpg");
        let saved = crate::shared::paths::ensure_dir(self.controller.output_dir())
            .map_err(|e| e.to_string())
            .and_then(|_| {
                composed
                    .save_with_format(&path, ImageFormat::Jpeg)
                    .map_err(|e| e.to_string())
            });
        match saved {
            Ok(()) => println!("preview saved to {}", path.display()),
            Err(e) => println!("could not save preview: {e}"),
        }
    }
}

/// Run the console until the rig closes. Stdin EOF counts as quit-and-save.
pub fn run_console(controller: UiController, interval: Duration) -> Result<(), AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    println!("{HELP}");
    let console = runtime.block_on(console_loop(Console::new(controller), interval));

    // A pending stdin read cannot be cancelled; do not wait for it.
    runtime.shutdown_background();

    console.controller.finish();
    tracing::info!(target: "system", "[CONSOLE] Closed");
    Ok(())
}

async fn console_loop(mut console: Console, interval: Duration) -> Console {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if console.tick() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => console.handle_line(&line),
                    Ok(None) | Err(_) => {
                        tracing::info!(target: "system", "[CONSOLE] stdin closed, saving and quitting");
                        stdin_open = false;
                        console.awaiting_close_answer = false;
                        console.close_with(CloseChoice::SaveAndQuit);
                    }
                }
            }
        }
    }

    console
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("r"), ConsoleInput::Record);
        assert_eq!(parse_input(" Record \n"), ConsoleInput::Record);
        assert_eq!(parse_input("s"), ConsoleInput::Stop);
        assert_eq!(parse_input("q"), ConsoleInput::Quit);
        assert_eq!(parse_input("p"), ConsoleInput::Status);
        assert_eq!(parse_input("snap"), ConsoleInput::Snapshot);
        assert_eq!(parse_input(""), ConsoleInput::Empty);
        assert_eq!(parse_input("zoom"), ConsoleInput::Unknown("zoom".into()));
    }

    #[test]
    fn test_parse_close_answer() {
        assert_eq!(parse_close_answer("y"), CloseChoice::SaveAndQuit);
        assert_eq!(parse_close_answer("NO"), CloseChoice::QuitWithoutSaving);
        assert_eq!(parse_close_answer(""), CloseChoice::KeepRecording);
        assert_eq!(parse_close_answer("maybe"), CloseChoice::KeepRecording);
    }

    #[test]
    fn test_render_notice() {
        let saved = Notice::Saved {
            camera_id: 0,
            label: "cam0".into(),
            path: Path::new("/videos/cam0_x.mp4").to_path_buf(),
        };
        assert_eq!(render_notice(&saved), "[cam0] saved /videos/cam0_x.mp4");

        let alert = Notice::Alert {
            camera_id: 1,
            label: "cam1".into(),
            message: "remux failed".into(),
        };
        assert_eq!(render_notice(&alert), "[cam1] error: remux failed");
    }
}
