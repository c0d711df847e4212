//! Interactive prompts with saved-value reuse.
//!
//! Every question goes through a [`Console`], so the same prompt logic drives
//! the real terminal and scripted input in tests. When auto-yes is on, no
//! question is shown: saved values and defaults are taken as-is. Pauses for
//! hardware changes still wait for Enter.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::launcher::Interrupt;
use crate::settings::Scalar;

/// Errors surfaced by a prompt.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// The operator aborted (Ctrl+C or end of input).
    #[error("Cancelled")]
    Cancelled,

    /// Auto-yes was requested but the saved value is missing or invalid.
    #[error("Saved setting '{label}' cannot be used: {reason}")]
    InvalidSavedSetting { label: String, reason: String },

    #[error("Terminal I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Line-oriented terminal I/O.
pub trait Console {
    /// Show `prompt` and read one line without its newline.
    /// Returns `None` at end of input.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Print a line of output.
    fn say(&mut self, message: &str);
}

/// How often a waiting prompt checks for Ctrl+C.
const READ_POLL: Duration = Duration::from_millis(50);

/// Blocking line input read on [`StdConsole`]'s helper thread.
pub trait LineSource: Send + 'static {
    /// Append one line to `buf`. Returns 0 at end of input.
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize>;
}

impl LineSource for io::Stdin {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        io::Stdin::read_line(self, buf)
    }
}

/// The process's stdin/stdout.
///
/// A read blocked in the kernel is not woken by Ctrl+C, so lines come from a
/// helper thread and the prompt waits on a channel while polling the
/// interrupt flag.
#[derive(Debug)]
pub struct StdConsole {
    requests: mpsc::Sender<()>,
    lines: mpsc::Receiver<io::Result<Option<String>>>,
    /// A line was requested and not yet received.
    pending: bool,
    interrupt: Interrupt,
}

impl StdConsole {
    pub fn new(interrupt: Interrupt) -> Self {
        Self::with_source(io::stdin(), interrupt)
    }

    pub fn with_source<S: LineSource>(mut source: S, interrupt: Interrupt) -> Self {
        let (requests, wanted) = mpsc::channel::<()>();
        let (tx, lines) = mpsc::channel();

        // Reads only on request so nothing is consumed after the last prompt.
        thread::spawn(move || {
            for () in wanted {
                let mut buf = String::new();
                let line = match source.read_line(&mut buf) {
                    Ok(0) => Ok(None),
                    Ok(_) => Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string())),
                    Err(e) => Err(e),
                };
                let finished = !matches!(line, Ok(Some(_)));
                if tx.send(line).is_err() || finished {
                    break;
                }
            }
        });

        Self {
            requests,
            lines,
            pending: false,
            interrupt,
        }
    }
}

impl Console for StdConsole {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        if !self.pending {
            if self.requests.send(()).is_err() {
                return Ok(None);
            }
            self.pending = true;
        }
        loop {
            match self.lines.recv_timeout(READ_POLL) {
                Ok(line) => {
                    self.pending = false;
                    return line;
                }
                Err(RecvTimeoutError::Timeout) if self.interrupt.is_set() => {
                    println!();
                    return Ok(None);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.pending = false;
                    return Ok(None);
                }
            }
        }
    }

    fn say(&mut self, message: &str) {
        println!("{}", message);
    }
}

/// Console fed from a fixed list of answers; records everything shown.
///
/// Running out of answers behaves like end of input.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    answers: VecDeque<String>,
    transcript: Vec<String>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Console for ScriptedConsole {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.transcript.push(prompt.to_string());
        Ok(self.answers.pop_front())
    }

    fn say(&mut self, message: &str) {
        self.transcript.push(message.to_string());
    }
}

/// Operator-facing prompt front end.
pub struct InteractivePrompt<C: Console> {
    console: C,
    auto_yes: bool,
    interrupt: Interrupt,
}

impl<C: Console> InteractivePrompt<C> {
    pub fn new(console: C, auto_yes: bool, interrupt: Interrupt) -> Self {
        Self {
            console,
            auto_yes,
            interrupt,
        }
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn say(&mut self, message: &str) {
        self.console.say(message);
    }

    fn read(&mut self, prompt: &str) -> Result<String, PromptError> {
        if self.interrupt.is_set() {
            return Err(PromptError::Cancelled);
        }
        let line = self.console.read_line(prompt)?;
        if self.interrupt.is_set() {
            return Err(PromptError::Cancelled);
        }
        line.ok_or(PromptError::Cancelled)
    }

    /// Ask for a value, offering `saved` for reuse.
    ///
    /// An empty answer reuses the saved value. A saved value that fails
    /// `validate` is never offered. With auto-yes the saved value is returned
    /// without asking, or `InvalidSavedSetting` if there is none usable.
    pub fn value<F>(&mut self, label: &str, saved: Option<&Scalar>, validate: F) -> Result<Scalar, PromptError>
    where
        F: Fn(&str) -> Result<Scalar, String>,
    {
        let checked = saved.map(|s| validate(&s.to_string()));

        if self.auto_yes {
            return match checked {
                Some(Ok(value)) => Ok(value),
                Some(Err(reason)) => Err(PromptError::InvalidSavedSetting {
                    label: label.to_string(),
                    reason,
                }),
                None => Err(PromptError::InvalidSavedSetting {
                    label: label.to_string(),
                    reason: "no saved value".to_string(),
                }),
            };
        }

        let default = match checked {
            Some(Ok(value)) => Some(value),
            Some(Err(reason)) => {
                self.console
                    .say(&format!("Saved value for {} is no longer valid: {}", label, reason));
                None
            }
            None => None,
        };

        let prompt = match &default {
            Some(value) => format!("{} [{}]: ", label, value),
            None => format!("{}: ", label),
        };

        loop {
            let input = self.read(&prompt)?;
            if input.trim().is_empty() {
                match &default {
                    Some(value) => return Ok(value.clone()),
                    None => {
                        self.console.say("A value is required.");
                        continue;
                    }
                }
            }
            match validate(&input) {
                Ok(value) => return Ok(value),
                Err(message) => self.console.say(&message),
            }
        }
    }

    /// Yes/no question. Auto-yes answers `default`.
    pub fn confirm(&mut self, label: &str, default: bool) -> Result<bool, PromptError> {
        if self.auto_yes {
            return Ok(default);
        }
        let prompt = format!("{} [{}]: ", label, if default { "Y/n" } else { "y/N" });
        loop {
            let input = self.read(&prompt)?;
            match input.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.console.say("Please answer y or n."),
            }
        }
    }

    /// Numbered menu; returns the chosen index. Auto-yes picks `default`.
    pub fn select(&mut self, label: &str, options: &[&str], default: usize) -> Result<usize, PromptError> {
        let default = default.min(options.len().saturating_sub(1));
        if self.auto_yes {
            return Ok(default);
        }
        self.console.say(label);
        for (i, option) in options.iter().enumerate() {
            self.console.say(&format!("  {}. {}", i + 1, option));
        }
        let prompt = format!("Enter choice [{}]: ", default + 1);
        loop {
            let input = self.read(&prompt)?;
            let trimmed = input.trim();
            if trimmed.is_empty() {
                return Ok(default);
            }
            match trimmed.parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Ok(n - 1),
                _ => self
                    .console
                    .say(&format!("Enter a number between 1 and {}.", options.len())),
            }
        }
    }

    /// Show `message` and wait for Enter.
    ///
    /// Auto-yes still waits: the operator has to do something with the
    /// hardware first.
    pub fn pause(&mut self, message: &str) -> Result<(), PromptError> {
        self.read(&format!("{} Press Enter to continue. ", message))?;
        Ok(())
    }
}
