//! Pseudo-terminal transport for command execution.
//!
//! The child gets the subordinate side of a PTY pair as stdin/stdout/stderr,
//! so it behaves exactly as it would under a real terminal (progress bars,
//! prompts, full-screen programs). Output arrives as one merged stream; the
//! engine cannot tell the child's stdout from its stderr in this mode — a
//! known limitation of the PTY path.
//!
//! While a session is alive the controlling terminal's own input is switched
//! to raw mode so arbitrary keystrokes (arrows, control sequences) can be
//! forwarded verbatim to the child. Raw mode is owned by a guard and restored
//! on every exit path, including panics and timeouts.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use crossterm::tty::IsTty;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, Receiver};
use tracing::{debug, error, warn};

use super::channel::{ChannelRead, InputEvent};

// Channel buffer sizes
const PTY_OUTPUT_BUFFER: usize = 1024; // chunks in flight before the reader blocks
const PTY_READ_BUFFER: usize = 16384; // 16KB per read for good throughput
const INPUT_BUFFER: usize = 64;

/// How long the input pump waits per poll; bounds its shutdown latency.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Scoped ownership of the terminal's raw input mode.
///
/// Entering raw mode is a process-wide side effect with exactly one
/// legitimate owner at a time. The guard restores the previous mode when
/// dropped, which happens on every exit path of the owning session.
pub(crate) struct RawModeGuard;

impl RawModeGuard {
    /// Enter raw mode if the host terminal allows it. Returns `None` when
    /// stdin is not a terminal or raw mode is already held elsewhere; the
    /// caller then runs without keystroke forwarding.
    pub(crate) fn enter() -> Option<Self> {
        if !std::io::stdin().is_tty() {
            return None;
        }
        if terminal::is_raw_mode_enabled().unwrap_or(false) {
            return None;
        }
        match terminal::enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                warn!("Failed to enter raw mode, keystroke forwarding disabled: {}", e);
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            error!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// A command running inside a pseudo-terminal.
pub struct PtySession {
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    output_rx: Receiver<Vec<u8>>,
    input_rx: Option<Receiver<InputEvent>>,
    input_stop: Option<Arc<AtomicBool>>,
    input_thread: Option<JoinHandle<()>>,
    raw_guard: Option<RawModeGuard>,
}

impl PtySession {
    /// Spawn `command` through the host shell on the subordinate side of a
    /// fresh PTY pair sized to the real terminal.
    pub fn spawn(command: &str) -> Result<Self> {
        let pty_system = native_pty_system();

        let (cols, rows) = terminal::size().unwrap_or((80, 24));
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to allocate pseudo-terminal")?;

        let shell = default_shell();
        let mut cmd = CommandBuilder::new(&shell);
        cmd.arg("-c");
        cmd.arg(command);
        cmd.env("TERM", "xterm-256color");
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn command in pseudo-terminal")?;

        // Drop the subordinate side in the parent so EOF on the master
        // follows the child's exit.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(PTY_OUTPUT_BUFFER);

        thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; PTY_READ_BUFFER];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break, // EOF: child exited and subordinate closed
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            // Receiver dropped, session is over
                            break;
                        }
                    }
                    Err(e) => {
                        if e.kind() != std::io::ErrorKind::Interrupted {
                            debug!("PTY read ended: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        // Keystroke forwarding is only wired up if raw mode could actually
        // be entered; otherwise the command still runs, just non-interactive.
        let raw_guard = RawModeGuard::enter();
        let (input_rx, input_stop, input_thread) = if raw_guard.is_some() {
            let (stop, rx, handle) = spawn_input_pump();
            (Some(rx), Some(stop), Some(handle))
        } else {
            (None, None, None)
        };

        Ok(Self {
            child,
            master: pair.master,
            writer,
            output_rx,
            input_rx,
            input_stop,
            input_thread,
            raw_guard,
        })
    }

    pub async fn wait_output(&mut self, bound: Duration) -> ChannelRead {
        match tokio::time::timeout(bound, self.output_rx.recv()).await {
            Ok(Some(data)) => ChannelRead::Data(data),
            Ok(None) => ChannelRead::Eof,
            Err(_) => ChannelRead::WouldBlock,
        }
    }

    pub fn read_nonblocking(&mut self) -> ChannelRead {
        match self.output_rx.try_recv() {
            Ok(data) => ChannelRead::Data(data),
            Err(TryRecvError::Empty) => ChannelRead::WouldBlock,
            Err(TryRecvError::Disconnected) => ChannelRead::Eof,
        }
    }

    pub fn poll_input(&mut self) -> Option<InputEvent> {
        self.input_rx.as_mut()?.try_recv().ok()
    }

    pub fn forwards_input(&self) -> bool {
        self.input_rx.is_some()
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .context("Failed to write to PTY")?;
        self.writer.flush().context("Failed to flush PTY writer")?;
        Ok(())
    }

    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        Ok(())
    }

    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .try_wait()
            .context("Failed to poll child status")?;
        Ok(status.map(|s| i32::try_from(s.exit_code()).unwrap_or(i32::MAX)))
    }

    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Kill failed (child may have already exited): {}", e);
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        // Stop the input pump before raw mode is restored, so no cooked-mode
        // input gets stolen from whatever prompt follows.
        if let Some(stop) = &self.input_stop {
            stop.store(true, Ordering::Relaxed);
        }
        if let Some(handle) = self.input_thread.take() {
            handle.join().ok();
        }

        // Reap the child; kill it first if it is still running.
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                self.child.kill().ok();
                self.child.wait().ok();
            }
        }

        // Restore the terminal mode last, once the pump is gone.
        self.raw_guard.take();
    }
}

fn default_shell() -> String {
    // Prefer the user's configured shell, but keep a safe fallback.
    std::env::var("SHELL").unwrap_or_else(|_| {
        if std::path::Path::new("/bin/bash").exists() {
            "/bin/bash".to_string()
        } else {
            "/bin/sh".to_string()
        }
    })
}

/// Start the thread that turns terminal key events into forwardable bytes.
fn spawn_input_pump() -> (Arc<AtomicBool>, Receiver<InputEvent>, JoinHandle<()>) {
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<InputEvent>(INPUT_BUFFER);

    let stop_flag = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        while !stop_flag.load(Ordering::Relaxed) {
            match event::poll(INPUT_POLL_INTERVAL) {
                Ok(false) => {}
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        let bytes = key_to_bytes(key);
                        if !bytes.is_empty()
                            && tx.blocking_send(InputEvent::Keys(bytes)).is_err()
                        {
                            break;
                        }
                    }
                    Ok(Event::Resize(cols, rows)) => {
                        if tx.blocking_send(InputEvent::Resize { cols, rows }).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Terminal input read error: {}", e);
                        break;
                    }
                },
                Err(e) => {
                    error!("Terminal input poll error: {}", e);
                    break;
                }
            }
        }
    });

    (stop, rx, handle)
}

/// Converts a crossterm key event to the terminal byte sequence a real
/// terminal would deliver.
fn key_to_bytes(key_event: KeyEvent) -> Vec<u8> {
    let KeyEvent { code, modifiers, .. } = key_event;

    let ctrl = modifiers.contains(KeyModifiers::CONTROL);
    let alt = modifiers.contains(KeyModifiers::ALT);

    match code {
        KeyCode::Char(c) => {
            if ctrl {
                // Ctrl+letter: Ctrl+A = 0x01, Ctrl+B = 0x02, etc.
                if c.is_ascii_lowercase() || c.is_ascii_uppercase() {
                    let byte = (c.to_ascii_lowercase() as u8) - b'a' + 1;
                    vec![byte]
                } else if c == '@' {
                    vec![0x00] // Ctrl+@ = NUL
                } else if c == '[' {
                    vec![0x1b] // Ctrl+[ = ESC
                } else if c == '\\' {
                    vec![0x1c] // Ctrl+\ = FS
                } else if c == ']' {
                    vec![0x1d] // Ctrl+] = GS
                } else if c == '^' {
                    vec![0x1e] // Ctrl+^ = RS
                } else if c == '_' {
                    vec![0x1f] // Ctrl+_ = US
                } else if c == '?' {
                    vec![0x7f] // Ctrl+? = DEL
                } else {
                    c.to_string().into_bytes()
                }
            } else if alt {
                vec![0x1b, c as u8] // ESC + char
            } else {
                c.to_string().into_bytes()
            }
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => vec![0x1b, b'[', b'A'],
        KeyCode::Down => vec![0x1b, b'[', b'B'],
        KeyCode::Right => vec![0x1b, b'[', b'C'],
        KeyCode::Left => vec![0x1b, b'[', b'D'],
        KeyCode::Home => vec![0x1b, b'[', b'H'],
        KeyCode::End => vec![0x1b, b'[', b'F'],
        KeyCode::PageUp => vec![0x1b, b'[', b'5', b'~'],
        KeyCode::PageDown => vec![0x1b, b'[', b'6', b'~'],
        KeyCode::Delete => vec![0x1b, b'[', b'3', b'~'],
        KeyCode::Insert => vec![0x1b, b'[', b'2', b'~'],
        KeyCode::F(n) if (1..=12).contains(&n) => match n {
            1 => vec![0x1b, b'O', b'P'],
            2 => vec![0x1b, b'O', b'Q'],
            3 => vec![0x1b, b'O', b'R'],
            4 => vec![0x1b, b'O', b'S'],
            5..=12 => format!("\x1b[{}~", n + 10).into_bytes(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        }
    }

    #[test]
    fn test_plain_char() {
        assert_eq!(key_to_bytes(key(KeyCode::Char('x'), KeyModifiers::NONE)), b"x");
    }

    #[test]
    fn test_enter_is_carriage_return() {
        assert_eq!(key_to_bytes(key(KeyCode::Enter, KeyModifiers::NONE)), b"\r");
    }

    #[test]
    fn test_ctrl_c() {
        assert_eq!(
            key_to_bytes(key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            vec![0x03]
        );
    }

    #[test]
    fn test_alt_char_is_escape_prefixed() {
        assert_eq!(
            key_to_bytes(key(KeyCode::Char('b'), KeyModifiers::ALT)),
            vec![0x1b, b'b']
        );
    }

    #[test]
    fn test_arrow_keys() {
        assert_eq!(
            key_to_bytes(key(KeyCode::Up, KeyModifiers::NONE)),
            vec![0x1b, b'[', b'A']
        );
        assert_eq!(
            key_to_bytes(key(KeyCode::Left, KeyModifiers::NONE)),
            vec![0x1b, b'[', b'D']
        );
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(
            key_to_bytes(key(KeyCode::F(1), KeyModifiers::NONE)),
            vec![0x1b, b'O', b'P']
        );
        assert_eq!(
            key_to_bytes(key(KeyCode::F(5), KeyModifiers::NONE)),
            b"\x1b[15~"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_collect_output() {
        let mut session = PtySession::spawn("printf hi").unwrap();

        let mut collected = Vec::new();
        let mut code = None;
        for _ in 0..100 {
            match session.wait_output(Duration::from_millis(100)).await {
                ChannelRead::Data(bytes) => collected.extend_from_slice(&bytes),
                ChannelRead::Eof => {
                    if code.is_some() {
                        break;
                    }
                }
                ChannelRead::WouldBlock => {}
            }
            if code.is_none() {
                code = session.try_wait().unwrap();
            }
        }

        assert!(String::from_utf8_lossy(&collected).contains("hi"));
        assert_eq!(code, Some(0));
    }
}
