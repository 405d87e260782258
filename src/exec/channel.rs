//! Platform transport between the engine and a spawned shell process.
//!
//! Two variants exist: a pseudo-terminal pair on Unix-like hosts and a plain
//! pipe pair elsewhere. The variant is detected once, at engine construction,
//! and the engine's multiplexing loop only ever talks to the platform-agnostic
//! [`ChannelSession`] surface.

use std::time::Duration;

use anyhow::Result;

use super::pipe::PipeSession;
use super::pty::PtySession;

/// Outcome of a non-blocking read from a session channel.
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelRead {
    /// A chunk of child output, in arrival order.
    Data(Vec<u8>),
    /// Nothing ready right now.
    WouldBlock,
    /// The channel has been closed by the child side.
    Eof,
}

/// An event captured from the controlling terminal while a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Raw bytes to forward to the child verbatim.
    Keys(Vec<u8>),
    /// The real terminal was resized; the child channel should follow.
    Resize { cols: u16, rows: u16 },
}

/// Capability-keyed transport variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessChannel {
    /// Pseudo-terminal pair; merged output, raw-mode keystroke forwarding.
    Pty,
    /// Pipe pair fallback; split stdout/stderr, no keystroke forwarding.
    /// Interactive full-screen programs will not render correctly here.
    Pipe,
}

impl ProcessChannel {
    /// Pick the variant the host supports. Decided once per engine, never
    /// re-branched inside the execution logic.
    pub fn detect() -> Self {
        if cfg!(unix) {
            ProcessChannel::Pty
        } else {
            ProcessChannel::Pipe
        }
    }

    /// Spawn `command` through the host shell, attached to this transport.
    pub fn spawn(self, command: &str) -> Result<ChannelSession> {
        match self {
            ProcessChannel::Pty => Ok(ChannelSession::Pty(PtySession::spawn(command)?)),
            ProcessChannel::Pipe => Ok(ChannelSession::Pipe(PipeSession::spawn(command)?)),
        }
    }
}

/// One spawned process plus its attached I/O channels and any terminal-mode
/// changes made on its behalf. Alive for exactly one execution request;
/// dropping it closes the channels, stops the input pump, restores the
/// terminal mode, and reaps the child.
pub enum ChannelSession {
    Pty(PtySession),
    Pipe(PipeSession),
}

impl ChannelSession {
    /// Wait up to `bound` for the next chunk from the child's (merged or
    /// stdout) channel. Bounded so the caller's timeout check stays
    /// reachable on every iteration.
    pub async fn wait_output(&mut self, bound: Duration) -> ChannelRead {
        match self {
            ChannelSession::Pty(s) => s.wait_output(bound).await,
            ChannelSession::Pipe(s) => s.wait_output(bound).await,
        }
    }

    /// Non-blocking read from the child's (merged or stdout) channel.
    pub fn read_nonblocking(&mut self) -> ChannelRead {
        match self {
            ChannelSession::Pty(s) => s.read_nonblocking(),
            ChannelSession::Pipe(s) => s.read_nonblocking(),
        }
    }

    /// Non-blocking read from the child's stderr channel. The PTY variant
    /// merges the streams, so it reports end-of-stream here.
    pub fn read_error_nonblocking(&mut self) -> ChannelRead {
        match self {
            ChannelSession::Pty(_) => ChannelRead::Eof,
            ChannelSession::Pipe(s) => s.read_error_nonblocking(),
        }
    }

    /// Next pending event from the controlling terminal, if keystroke
    /// forwarding is active for this session.
    pub fn poll_input(&mut self) -> Option<InputEvent> {
        match self {
            ChannelSession::Pty(s) => s.poll_input(),
            ChannelSession::Pipe(_) => None,
        }
    }

    /// Whether keystrokes from the real terminal are being forwarded.
    pub fn forwards_input(&self) -> bool {
        match self {
            ChannelSession::Pty(s) => s.forwards_input(),
            ChannelSession::Pipe(_) => false,
        }
    }

    /// Write bytes to the child's input.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            ChannelSession::Pty(s) => s.write(bytes),
            ChannelSession::Pipe(s) => s.write(bytes),
        }
    }

    /// Resize the child's terminal. No-op for the pipe variant, which has no
    /// terminal size concept.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<()> {
        match self {
            ChannelSession::Pty(s) => s.resize(rows, cols),
            ChannelSession::Pipe(_) => Ok(()),
        }
    }

    /// Check for child exit without blocking. Returns the exit code once the
    /// process has terminated.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        match self {
            ChannelSession::Pty(s) => s.try_wait(),
            ChannelSession::Pipe(s) => s.try_wait(),
        }
    }

    /// Forcibly terminate the child.
    pub fn kill(&mut self) {
        match self {
            ChannelSession::Pty(s) => s.kill(),
            ChannelSession::Pipe(s) => s.kill(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_matches_platform() {
        let variant = ProcessChannel::detect();
        if cfg!(unix) {
            assert_eq!(variant, ProcessChannel::Pty);
        } else {
            assert_eq!(variant, ProcessChannel::Pipe);
        }
    }
}
