//! Terminal status animation.
//!
//! A background thread redraws a rotating glyph plus message on the current
//! line at a fixed cadence. Everything that touches the drawing surface goes
//! through one mutex, so the animation's own frames, forwarded child output,
//! and direct engine writes never interleave mid-line. A debounce window
//! after every real write keeps the glyph from flickering between rapid
//! output bursts.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;

/// Glyphs cycled by the cadence loop.
const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Delay between cadence iterations.
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Redraws are suppressed for this long after any real write.
const WRITE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Shared drawing-surface state. All invariants span these fields together:
/// `visible` implies `running`, and a stopped animation never draws again.
struct SpinnerState {
    running: bool,
    visible: bool,
    message: String,
    last_write: Instant,
}

/// A rotating status indicator that shares the terminal with other writers.
pub struct Spinner {
    state: Arc<Mutex<SpinnerState>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    next_message: Mutex<Option<String>>,
}

impl Spinner {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SpinnerState {
                running: false,
                visible: false,
                message: String::new(),
                last_write: Instant::now(),
            })),
            thread: Mutex::new(None),
            next_message: Mutex::new(None),
        }
    }

    /// Set the message the animation shows the next time it is (re)started.
    /// The slot is consumed by a single `start` call.
    pub fn set_next_message(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.next_message.lock() {
            *slot = Some(message.into());
        }
    }

    /// Start the animation. Idempotent while already running: the message is
    /// updated in place and no second cadence thread is spawned. A pending
    /// next-message override takes precedence over `message`.
    pub fn start(&self, message: &str) {
        let message = match self.next_message.lock() {
            Ok(mut slot) => slot.take().unwrap_or_else(|| message.to_string()),
            Err(_) => message.to_string(),
        };

        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.running {
                state.message = message;
                return;
            }
            state.running = true;
            state.visible = false;
            state.message = message;
        }

        let state = Arc::clone(&self.state);
        let handle = thread::spawn(move || {
            let mut frame = 0usize;
            loop {
                {
                    let Ok(mut s) = state.lock() else { break };
                    if !s.running {
                        break;
                    }
                    // Hold off while real output is streaming.
                    if s.last_write.elapsed() > WRITE_DEBOUNCE {
                        draw_frame(FRAMES[frame % FRAMES.len()], &s.message).ok();
                        s.visible = true;
                    }
                }
                thread::sleep(FRAME_INTERVAL);
                frame += 1;
            }
        });

        if let Ok(mut slot) = self.thread.lock() {
            *slot = Some(handle);
        }
    }

    /// Stop the animation and erase its line.
    ///
    /// Synchronous: does not return until the cadence thread has been joined,
    /// so no frame can be drawn after this call. Safe to call when the
    /// animation was never started.
    pub fn stop(&self) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.running = false;
            if state.visible {
                erase_line().ok();
            }
            state.visible = false;
        }

        // Join outside the state lock; the cadence thread needs it to exit.
        let handle = match self.thread.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.join().ok();
        }
    }

    /// Write real content to the terminal without corrupting the animation.
    ///
    /// Clears a visible frame first, writes (optionally colorized), and arms
    /// the debounce window so the next redraw waits. Usable before, during,
    /// and after the animation's lifetime; it shares the same lock either
    /// way, which keeps all writers on the terminal serialized.
    pub fn write(&self, content: &str, color: Option<Color>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.visible {
            erase_line().ok();
            state.visible = false;
        }
        write_content(content, color).ok();
        state.last_write = Instant::now();
    }

    /// Whether the cadence loop is currently running.
    pub fn is_running(&self) -> bool {
        self.state.lock().map(|s| s.running).unwrap_or(false)
    }
}

impl Default for Spinner {
    fn default() -> Self {
        Self::new()
    }
}

fn draw_frame(glyph: &str, message: &str) -> io::Result<()> {
    let mut out = io::stdout();
    out.queue(MoveToColumn(0))?
        .queue(Print(glyph))?
        .queue(Print(" "))?
        .queue(Print(message))?
        .queue(Clear(ClearType::UntilNewLine))?;
    out.flush()
}

fn erase_line() -> io::Result<()> {
    let mut out = io::stdout();
    out.queue(MoveToColumn(0))?
        .queue(Clear(ClearType::UntilNewLine))?;
    out.flush()
}

fn write_content(content: &str, color: Option<Color>) -> io::Result<()> {
    let mut out = io::stdout();
    if let Some(color) = color {
        out.queue(SetForegroundColor(color))?;
    }
    out.queue(Print(content))?;
    if color.is_some() {
        out.queue(ResetColor)?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_lifecycle() {
        let spinner = Spinner::new();
        assert!(!spinner.is_running());

        spinner.start("working");
        assert!(spinner.is_running());

        spinner.stop();
        assert!(!spinner.is_running());
    }

    #[test]
    fn test_start_is_idempotent_and_updates_message() {
        let spinner = Spinner::new();
        spinner.start("first");
        spinner.start("second");
        {
            let state = spinner.state.lock().unwrap();
            assert!(state.running);
            assert_eq!(state.message, "second");
        }
        // Only one thread handle should exist.
        spinner.stop();
        assert!(spinner.thread.lock().unwrap().is_none());
    }

    #[test]
    fn test_stop_without_start() {
        let spinner = Spinner::new();
        spinner.stop();
        spinner.stop();
        assert!(!spinner.is_running());
    }

    #[test]
    fn test_stop_clears_visibility() {
        let spinner = Spinner::new();
        spinner.start("working");
        // Give the cadence loop a chance to draw at least once.
        thread::sleep(Duration::from_millis(250));
        spinner.stop();
        let state = spinner.state.lock().unwrap();
        assert!(!state.running);
        assert!(!state.visible);
    }

    #[test]
    fn test_write_after_stop_is_allowed() {
        let spinner = Spinner::new();
        spinner.start("working");
        spinner.stop();
        // Pass-through writes stay valid after the animation ends.
        spinner.write("late output\n", None);
        assert!(!spinner.is_running());
    }

    #[test]
    fn test_write_arms_debounce() {
        let spinner = Spinner::new();
        spinner.write("content", Some(Color::Cyan));
        let state = spinner.state.lock().unwrap();
        assert!(state.last_write.elapsed() < WRITE_DEBOUNCE);
        assert!(!state.visible);
    }

    #[test]
    fn test_next_message_slot_consumed_once() {
        let spinner = Spinner::new();
        spinner.set_next_message("analyzing");
        spinner.start("thinking");
        assert_eq!(spinner.state.lock().unwrap().message, "analyzing");
        spinner.stop();

        spinner.start("thinking");
        assert_eq!(spinner.state.lock().unwrap().message, "thinking");
        spinner.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let spinner = Spinner::new();
        spinner.start("one");
        spinner.stop();
        spinner.start("two");
        assert!(spinner.is_running());
        spinner.stop();
    }
}
