//! Narrow delegate traits the VM calls out through for everything that
//! isn't pure computation: text I/O, save-file selection, windowing, and
//! sound. Each is a small capability rather than one large display trait,
//! so a host can implement only what it needs (a headless test harness
//! implements OutputSink + InputSource and nothing else).

use std::path::PathBuf;
use std::time::Duration;

/// Receives printed text in order. `quit()` fires once when the VM halts.
pub trait OutputSink {
    fn emit(&mut self, text: &str);
    fn quit(&mut self) {}
}

/// The result of a timed read: either a completed line, or a deadline
/// elapsing with nothing typed.
pub enum ReadOutcome {
    Line(String),
    Timeout,
}

/// Supplies input lines to READ/SREAD, optionally honoring a deadline.
pub trait InputSource {
    fn read_line(&mut self) -> String;

    /// Default: timed input is unsupported, so this always blocks until a
    /// line arrives (never signals `Timeout`). Hosts with a real terminal
    /// override this to race the read against the deadline.
    fn read_line_with_deadline(&mut self, _deadline: Duration) -> ReadOutcome {
        ReadOutcome::Line(self.read_line())
    }

    fn read_char(&mut self) -> u8 {
        self.read_line().bytes().next().unwrap_or(0)
    }
}

/// Lets the host pick (or decline) a save/restore file path.
pub trait SaveChooser {
    fn choose_save_path(&mut self, suggested: &str) -> Option<PathBuf>;
    fn choose_restore_path(&mut self) -> Option<PathBuf>;
}

/// v4+ windowing: split screen, cursor, and text style control. The VM
/// only forwards these calls; presentation is entirely the host's concern.
pub trait WindowDelegate {
    fn split(&mut self, _lines: u16) {}
    fn set_window(&mut self, _window: u16) {}
    fn erase_window(&mut self, _window: i16) {}
    fn erase_line(&mut self, _value: u16) {}
    fn set_cursor(&mut self, _row: u16, _col: u16) {}
    fn set_text_style(&mut self, _style_mask: u16) {}
    fn set_colors(&mut self, _fg: u16, _bg: u16) {}
}

/// v4+ sound effects. Default behavior is silent no-op, matching "no
/// sound card" on a real interpreter.
pub trait SoundDelegate {
    fn play(&mut self, _effect: u16, _volume: u8, _repeats: u8, _on_done_routine: u32) {}
    fn stop_all(&mut self) {}
}

/// Receives one formatted line per executed instruction, when tracing is
/// enabled (the --trace CLI flag).
pub trait TraceSink {
    fn trace(&mut self, line: &str);
}
