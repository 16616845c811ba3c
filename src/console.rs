//! Colorized console logging.
//!
//! Settings are process-wide and fixed by the first call to [`init`]. Color
//! is only emitted on a stream that is a terminal, and never when `NO_COLOR`
//! is set. Every line can additionally be appended to a plain log file.

use chrono::Local;
use crossterm::style::{StyledContent, Stylize};
use std::fs::{File, OpenOptions};
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Ok,
    Warn,
    Error,
}

impl Level {
    pub fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Ok => "OK",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn styled(self) -> StyledContent<&'static str> {
        let label = self.label();
        match self {
            Level::Info => label.cyan(),
            Level::Ok => label.green(),
            Level::Warn => label.yellow(),
            Level::Error => label.red(),
        }
    }
}

struct Console {
    color_stdout: bool,
    color_stderr: bool,
    log_file: Option<Mutex<File>>,
}

static CONSOLE: OnceLock<Console> = OnceLock::new();

#[cfg(test)]
thread_local! {
    static CAPTURED: std::cell::RefCell<Option<Vec<String>>> = const { std::cell::RefCell::new(None) };
}

/// Run `f` and return every message logged on this thread meanwhile.
#[cfg(test)]
pub(crate) fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    CAPTURED.with(|c| *c.borrow_mut() = Some(Vec::new()));
    let out = f();
    let lines = CAPTURED.with(|c| c.borrow_mut().take()).unwrap_or_default();
    (out, lines)
}

/// Initialize console output. Later calls are no-ops.
pub fn init(log_file: Option<&Path>) {
    CONSOLE.get_or_init(|| build(log_file));
}

fn build(log_file: Option<&Path>) -> Console {
    let no_color = std::env::var_os("NO_COLOR").is_some();
    let log_file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                eprintln!("[WARN] Cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    Console {
        color_stdout: !no_color && std::io::stdout().is_terminal(),
        color_stderr: !no_color && std::io::stderr().is_terminal(),
        log_file,
    }
}

fn console() -> &'static Console {
    CONSOLE.get_or_init(|| build(None))
}

/// Render one console line. Exposed for tests.
pub fn format_line(level: Level, message: &str, color: bool) -> String {
    let time = Local::now().format("%H:%M:%S");
    if color {
        format!("[{}] [{}] {}", time, level.styled(), message)
    } else {
        format!("[{}] [{}] {}", time, level.label(), message)
    }
}

pub fn log(level: Level, message: impl AsRef<str>) {
    let message = message.as_ref();
    let console = console();

    #[cfg(test)]
    CAPTURED.with(|c| {
        if let Some(lines) = c.borrow_mut().as_mut() {
            lines.push(message.to_string());
        }
    });

    if level == Level::Error {
        eprintln!("{}", format_line(level, message, console.color_stderr));
    } else {
        println!("{}", format_line(level, message, console.color_stdout));
    }

    if let Some(file) = &console.log_file {
        if let Ok(mut file) = file.lock() {
            let _ = writeln!(
                file,
                "[{}] [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level.label(),
                message
            );
        }
    }
}

pub fn info(message: impl AsRef<str>) {
    log(Level::Info, message);
}

pub fn ok(message: impl AsRef<str>) {
    log(Level::Ok, message);
}

pub fn warn(message: impl AsRef<str>) {
    log(Level::Warn, message);
}

pub fn error(message: impl AsRef<str>) {
    log(Level::Error, message);
}
