//! In-process delegate implementations with no terminal attached: an
//! output buffer the caller can inspect, and an input queue of
//! pre-scripted lines. Used by integration tests to drive the
//! interpreter deterministically.

use crate::io::{InputSource, OutputSink, ReadOutcome, SaveChooser};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Default)]
pub struct BufferOutput {
    pub text: String,
    pub quit_called: bool,
}

impl OutputSink for BufferOutput {
    fn emit(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn quit(&mut self) {
        self.quit_called = true;
    }
}

#[derive(Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ScriptedInput {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&mut self) -> String {
        self.lines.pop_front().unwrap_or_default()
    }

    fn read_line_with_deadline(&mut self, _deadline: Duration) -> ReadOutcome {
        match self.lines.pop_front() {
            Some(line) => ReadOutcome::Line(line),
            None => ReadOutcome::Timeout,
        }
    }
}

/// Never offers a save path, so SAVE/RESTORE opcodes report failure
/// without touching the filesystem.
#[derive(Default)]
pub struct NullSaveChooser;

impl SaveChooser for NullSaveChooser {
    fn choose_save_path(&mut self, _suggested: &str) -> Option<PathBuf> {
        None
    }

    fn choose_restore_path(&mut self) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_output_collects_emitted_text() {
        let mut out = BufferOutput::default();
        out.emit("Hello, ");
        out.emit("world.");
        assert_eq!(out.text, "Hello, world.");
        assert!(!out.quit_called);
    }

    #[test]
    fn scripted_input_drains_in_order_then_empties() {
        let mut input = ScriptedInput::new(["look", "north"]);
        assert_eq!(input.read_line(), "look");
        assert_eq!(input.read_line(), "north");
        assert_eq!(input.read_line(), "");
    }
}
