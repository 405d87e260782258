//! Pipe transport for hosts without pseudo-terminal support.
//!
//! The child's stdout and stderr are each attached to an ordinary pipe and
//! read by dedicated threads. There is no raw-mode keystroke forwarding and
//! no terminal size; this path is strictly a degraded fallback for
//! non-interactive commands.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

use super::channel::ChannelRead;

const PIPE_OUTPUT_BUFFER: usize = 1024;
const PIPE_READ_BUFFER: usize = 16384;

/// A command running behind a pipe pair.
pub struct PipeSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout_rx: Receiver<Vec<u8>>,
    stderr_rx: Receiver<Vec<u8>>,
}

impl PipeSession {
    /// Spawn `command` through the host shell with piped stdio.
    pub fn spawn(command: &str) -> Result<Self> {
        let (shell, flag) = host_shell();

        let mut child = Command::new(&shell)
            .arg(flag)
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn command via {}", shell))?;

        let stdout = child.stdout.take().context("Child stdout not captured")?;
        let stderr = child.stderr.take().context("Child stderr not captured")?;
        let stdin = child.stdin.take();

        let (stdout_tx, stdout_rx) = mpsc::channel::<Vec<u8>>(PIPE_OUTPUT_BUFFER);
        let (stderr_tx, stderr_rx) = mpsc::channel::<Vec<u8>>(PIPE_OUTPUT_BUFFER);
        spawn_reader(stdout, stdout_tx);
        spawn_reader(stderr, stderr_tx);

        Ok(Self {
            child,
            stdin,
            stdout_rx,
            stderr_rx,
        })
    }

    pub async fn wait_output(&mut self, bound: Duration) -> ChannelRead {
        match tokio::time::timeout(bound, self.stdout_rx.recv()).await {
            Ok(Some(data)) => ChannelRead::Data(data),
            Ok(None) => ChannelRead::Eof,
            Err(_) => ChannelRead::WouldBlock,
        }
    }

    pub fn read_nonblocking(&mut self) -> ChannelRead {
        match self.stdout_rx.try_recv() {
            Ok(data) => ChannelRead::Data(data),
            Err(TryRecvError::Empty) => ChannelRead::WouldBlock,
            Err(TryRecvError::Disconnected) => ChannelRead::Eof,
        }
    }

    pub fn read_error_nonblocking(&mut self) -> ChannelRead {
        match self.stderr_rx.try_recv() {
            Ok(data) => ChannelRead::Data(data),
            Err(TryRecvError::Empty) => ChannelRead::WouldBlock,
            Err(TryRecvError::Disconnected) => ChannelRead::Eof,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().context("Child stdin is closed")?;
        stdin.write_all(bytes).context("Failed to write to child stdin")?;
        stdin.flush().context("Failed to flush child stdin")?;
        Ok(())
    }

    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .try_wait()
            .context("Failed to poll child status")?;
        Ok(status.map(|s| s.code().unwrap_or(-1)))
    }

    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Kill failed (child may have already exited): {}", e);
        }
    }
}

impl Drop for PipeSession {
    fn drop(&mut self) {
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                self.child.kill().ok();
                self.child.wait().ok();
            }
        }
    }
}

fn host_shell() -> (String, &'static str) {
    if cfg!(windows) {
        (
            std::env::var("COMSPEC").unwrap_or_else(|_| "cmd".to_string()),
            "/C",
        )
    } else {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| {
            if std::path::Path::new("/bin/bash").exists() {
                "/bin/bash".to_string()
            } else {
                "/bin/sh".to_string()
            }
        });
        (shell, "-c")
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R, tx: Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; PIPE_READ_BUFFER];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::Interrupted {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(session: &mut PipeSession) -> (String, String, i32) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;

        for _ in 0..200 {
            match session.wait_output(Duration::from_millis(50)).await {
                ChannelRead::Data(bytes) => out.extend_from_slice(&bytes),
                ChannelRead::Eof | ChannelRead::WouldBlock => {}
            }
            while let ChannelRead::Data(bytes) = session.read_error_nonblocking() {
                err.extend_from_slice(&bytes);
            }
            if code.is_none() {
                code = session.try_wait().unwrap();
            }
            if code.is_some()
                && matches!(session.read_nonblocking(), ChannelRead::Eof)
            {
                break;
            }
        }

        (
            String::from_utf8_lossy(&out).into_owned(),
            String::from_utf8_lossy(&err).into_owned(),
            code.unwrap_or(i32::MIN),
        )
    }

    #[tokio::test]
    async fn test_streams_are_split() {
        let mut session = PipeSession::spawn("printf out; printf err 1>&2").unwrap();
        let (out, err, code) = drain(&mut session).await;
        assert_eq!(out, "out");
        assert_eq!(err, "err");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_exit_code_preserved() {
        let mut session = PipeSession::spawn("exit 3").unwrap();
        let (_, _, code) = drain(&mut session).await;
        assert_eq!(code, 3);
    }
}
