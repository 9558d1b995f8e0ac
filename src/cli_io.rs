//! Runnable delegates backed by a plain terminal: stdout for output,
//! stdin for input, and interactive path prompts for save/restore. No
//! crossterm/ratatui dependency; this is the "dumb terminal" interpreter
//! mode, not a full-screen UI.

use crate::io::{InputSource, OutputSink, ReadOutcome, SaveChooser, SoundDelegate, TraceSink, WindowDelegate};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

#[derive(Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn quit(&mut self) {
        let _ = io::stdout().flush();
    }
}

#[derive(Default)]
pub struct StdinSource;

impl InputSource for StdinSource {
    fn read_line(&mut self) -> String {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => String::new(),
            Ok(_) => line.trim_end_matches(['\n', '\r']).to_string(),
            Err(_) => String::new(),
        }
    }

    /// Races a blocking stdin read on a background thread against the
    /// deadline. The reader thread is abandoned (not joined) if the
    /// deadline wins; it will still consume one line of real input
    /// whenever the user eventually types it, which is harmless for a
    /// single-shot CLI process but would leak threads in a long-lived
    /// server, so this delegate is not reused there.
    fn read_line_with_deadline(&mut self, deadline: Duration) -> ReadOutcome {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            let text = match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => String::new(),
                Ok(_) => line.trim_end_matches(['\n', '\r']).to_string(),
            };
            let _ = tx.send(text);
        });

        match rx.recv_timeout(deadline) {
            Ok(text) => ReadOutcome::Line(text),
            Err(_) => ReadOutcome::Timeout,
        }
    }
}

/// Prompts on stdout, reads a path from stdin. An empty line cancels.
/// When constructed with a fixed save path (the `--save` CLI flag), save
/// prompts are skipped entirely and that path is used every time.
#[derive(Default)]
pub struct PromptingSaveChooser {
    fixed_save_path: Option<PathBuf>,
}

impl PromptingSaveChooser {
    pub fn with_default(fixed_save_path: Option<PathBuf>) -> Self {
        PromptingSaveChooser { fixed_save_path }
    }

    fn prompt(&self, message: &str) -> Option<PathBuf> {
        print!("{message}");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).unwrap_or(0) == 0 {
            return None;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

impl SaveChooser for PromptingSaveChooser {
    fn choose_save_path(&mut self, suggested: &str) -> Option<PathBuf> {
        if let Some(path) = &self.fixed_save_path {
            return Some(path.clone());
        }
        self.prompt(&format!("Save to file [{suggested}]: "))
            .or_else(|| Some(PathBuf::from(suggested)))
    }

    fn choose_restore_path(&mut self) -> Option<PathBuf> {
        self.prompt("Restore from file: ")
    }
}

/// No screen model: a plain terminal has no windows, colors, or sound.
#[derive(Default)]
pub struct DumbTerminalWindow;

impl WindowDelegate for DumbTerminalWindow {}

#[derive(Default)]
pub struct SilentSound;

impl SoundDelegate for SilentSound {}

/// `--trace <path>`: one formatted line per executed instruction.
pub struct FileTraceSink {
    file: File,
}

impl FileTraceSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(FileTraceSink {
            file: File::create(path)?,
        })
    }
}

impl TraceSink for FileTraceSink {
    fn trace(&mut self, line: &str) {
        let _ = writeln!(self.file, "{line}");
    }
}
