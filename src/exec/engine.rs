//! Execution orchestration: confirmation gate, spawn, multiplexing loop,
//! timeout, and result assembly.
//!
//! The multiplexing loop is single-threaded and cooperative: one bounded
//! readiness wait per iteration (never longer than [`POLL_INTERVAL`]), so the
//! timeout check is always reachable. Bytes from the child are appended to
//! the capture buffer and echoed to the real terminal in arrival order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::style::Color;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::status::Spinner;

use super::channel::{ChannelRead, ChannelSession, InputEvent, ProcessChannel};
use super::normalize::normalize_render;
use super::{ExecutionRequest, ExecutionResult, CODE_DECLINED, CODE_ENGINE_FAULT, CODE_TIMEOUT};

/// Upper bound on one multiplexing-loop suspension.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// After the child exits, how long trailing output may keep the loop alive.
/// Covers grandchildren that inherited the channel and never close it.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(300);

/// After a timeout kill, how long in-flight reader work may drain.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(1);

const EXECUTING_MESSAGE: &str = "Executing command...";

/// Which stream a chunk came from; decides the echo color.
#[derive(Clone, Copy)]
enum StreamKind {
    Output,
    Error,
}

#[derive(Default)]
struct Capture {
    output: Vec<u8>,
    errors: Vec<u8>,
    /// Set once real output has started streaming (animation disabled then).
    streaming: bool,
}

/// Runs shell commands against the host's transport variant.
///
/// The variant (PTY or pipe) is detected once, here; the loop below never
/// branches on the platform again.
pub struct ExecutionEngine {
    channel: ProcessChannel,
    spinner: Arc<Spinner>,
}

impl ExecutionEngine {
    pub fn new(spinner: Arc<Spinner>) -> Self {
        Self {
            channel: ProcessChannel::detect(),
            spinner,
        }
    }

    /// Build an engine on an explicit transport variant.
    pub fn with_channel(channel: ProcessChannel, spinner: Arc<Spinner>) -> Self {
        Self { channel, spinner }
    }

    /// Run one command to completion, timeout, or fault.
    ///
    /// Never returns an error: every failure mode is folded into the result
    /// (declined -1, timeout -2, engine fault -3, child exit codes verbatim).
    /// The child's output is echoed to the terminal as it streams and the
    /// captured text is render-normalized before it is returned.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        if request.dangerous {
            if let Some(confirm) = &request.confirm {
                if !confirm(&request.command) {
                    info!("User declined command: {}", request.command);
                    return ExecutionResult::engine_error(
                        "User declined to run the command".to_string(),
                        CODE_DECLINED,
                    );
                }
            }
        }

        self.spinner.start(EXECUTING_MESSAGE);
        let result = match self.run(request).await {
            Ok(result) => result,
            Err(e) => {
                debug!("Engine fault for {:?}: {:#}", request.command, e);
                ExecutionResult::engine_error(format!("{e:#}"), CODE_ENGINE_FAULT)
            }
        };
        // The session (and with it raw mode) is already torn down here; this
        // stop also covers commands that never produced output.
        self.spinner.stop();
        result
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let mut session = self.channel.spawn(&request.command)?;
        debug!(
            "Spawned {:?} (forwarding input: {})",
            request.command,
            session.forwards_input()
        );

        let deadline = Instant::now() + request.timeout;
        let mut capture = Capture::default();
        let mut exit_code: Option<i32> = None;
        let mut exit_seen: Option<Instant> = None;
        let mut output_open = true;

        loop {
            // The loop's single suspension point, bounded by POLL_INTERVAL.
            if output_open {
                match session.wait_output(POLL_INTERVAL).await {
                    ChannelRead::Data(bytes) => {
                        self.consume(&mut capture, &bytes, StreamKind::Output);
                    }
                    ChannelRead::Eof => output_open = false,
                    ChannelRead::WouldBlock => {}
                }
                // Drain whatever else is already queued, preserving order.
                while output_open {
                    match session.read_nonblocking() {
                        ChannelRead::Data(bytes) => {
                            self.consume(&mut capture, &bytes, StreamKind::Output);
                        }
                        ChannelRead::Eof => output_open = false,
                        ChannelRead::WouldBlock => break,
                    }
                }
            } else {
                tokio::time::sleep(POLL_INTERVAL).await;
            }

            while let ChannelRead::Data(bytes) = session.read_error_nonblocking() {
                self.consume(&mut capture, &bytes, StreamKind::Error);
            }

            // Forward pending keystrokes and terminal resizes to the child.
            while let Some(event) = session.poll_input() {
                match event {
                    InputEvent::Keys(bytes) => {
                        if let Err(e) = session.write(&bytes) {
                            debug!("Dropping keystrokes, child input closed: {:#}", e);
                        }
                    }
                    InputEvent::Resize { cols, rows } => {
                        if let Err(e) = session.resize(rows, cols) {
                            debug!("Resize failed: {:#}", e);
                        }
                    }
                }
            }

            if exit_code.is_none() {
                exit_code = session.try_wait()?;
                if exit_code.is_some() {
                    exit_seen = Some(Instant::now());
                }
            }

            if let Some(code) = exit_code {
                let drained = !output_open;
                let grace_over = exit_seen
                    .map(|t| t.elapsed() >= EXIT_DRAIN_GRACE)
                    .unwrap_or(true);
                if drained || grace_over {
                    return Ok(finish(&capture, code));
                }
            }

            if Instant::now() >= deadline {
                return Ok(self
                    .timed_out(&mut session, &mut capture, request.timeout)
                    .await);
            }
        }
    }

    /// Append a chunk to the capture buffer and echo it, in order, to the
    /// visible terminal. The first real chunk disables the status animation
    /// for the rest of the stream.
    fn consume(&self, capture: &mut Capture, bytes: &[u8], kind: StreamKind) {
        if !capture.streaming {
            capture.streaming = true;
            self.spinner.stop();
        }

        let (buffer, color) = match kind {
            StreamKind::Output => (&mut capture.output, Color::Cyan),
            StreamKind::Error => (&mut capture.errors, Color::Red),
        };
        buffer.extend_from_slice(bytes);
        self.spinner
            .write(&String::from_utf8_lossy(bytes), Some(color));
    }

    /// Kill the child, drain in-flight reader work for a bounded grace
    /// period, and build the timeout result with whatever was captured.
    async fn timed_out(
        &self,
        session: &mut ChannelSession,
        capture: &mut Capture,
        timeout: Duration,
    ) -> ExecutionResult {
        info!("Command timed out after {:?}, killing child", timeout);
        session.kill();

        let drain_deadline = Instant::now() + KILL_DRAIN_GRACE;
        loop {
            match session.read_nonblocking() {
                ChannelRead::Data(bytes) => {
                    self.consume(capture, &bytes, StreamKind::Output);
                }
                ChannelRead::Eof => break,
                ChannelRead::WouldBlock => {
                    if Instant::now() >= drain_deadline {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
        while let ChannelRead::Data(bytes) = session.read_error_nonblocking() {
            self.consume(capture, &bytes, StreamKind::Error);
        }
        session.try_wait().ok();

        ExecutionResult {
            success: false,
            output: normalize_render(&String::from_utf8_lossy(&capture.output)),
            error: format!("Command timed out after {} seconds", timeout.as_secs()),
            code: CODE_TIMEOUT,
        }
    }
}

fn finish(capture: &Capture, code: i32) -> ExecutionResult {
    ExecutionResult {
        success: code == 0,
        output: normalize_render(&String::from_utf8_lossy(&capture.output)),
        error: normalize_render(&String::from_utf8_lossy(&capture.errors)),
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(Spinner::new()))
    }

    fn pipe_engine() -> ExecutionEngine {
        ExecutionEngine::with_channel(ProcessChannel::Pipe, Arc::new(Spinner::new()))
    }

    #[tokio::test]
    async fn test_successful_command() {
        let result = engine().execute(&ExecutionRequest::new("echo hello")).await;
        assert!(result.success, "error was: {}", result.error);
        assert_eq!(result.code, 0);
        assert_eq!(result.output, "hello\n");
    }

    #[tokio::test]
    async fn test_failing_command_keeps_child_code() {
        let result = engine().execute(&ExecutionRequest::new("exit 7")).await;
        assert!(!result.success);
        assert_eq!(result.code, 7);
    }

    #[tokio::test]
    async fn test_declined_confirmation_spawns_nothing() {
        let marker = std::env::temp_dir().join(format!("shex-declined-{}", std::process::id()));
        std::fs::remove_file(&marker).ok();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_probe = Arc::clone(&calls);

        let mut request = ExecutionRequest::new(format!("touch {}", marker.display()));
        request.dangerous = true;
        request.confirm = Some(Arc::new(move |cmd: &str| {
            assert!(cmd.contains("touch"));
            calls_probe.fetch_add(1, Ordering::SeqCst);
            false
        }));

        let result = engine().execute(&request).await;
        assert!(!result.success);
        assert_eq!(result.code, CODE_DECLINED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The probe: no process ran, so the marker never appeared.
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_dangerous_with_approval_runs() {
        let mut request = ExecutionRequest::new("echo approved");
        request.dangerous = true;
        request.confirm = Some(Arc::new(|_: &str| true));

        let result = engine().execute(&request).await;
        assert!(result.success);
        assert_eq!(result.output, "approved\n");
    }

    #[tokio::test]
    async fn test_timeout_preserves_partial_output() {
        let mut request = ExecutionRequest::new("echo started; sleep 10");
        request.timeout = StdDuration::from_secs(1);

        let result = engine().execute(&request).await;
        assert!(!result.success);
        assert_eq!(result.code, CODE_TIMEOUT);
        assert!(result.error.contains("timed out after 1 seconds"));
        assert!(result.output.contains("started"));
    }

    #[tokio::test]
    async fn test_chunk_order_preserved() {
        let result = engine()
            .execute(&ExecutionRequest::new(
                "printf 'alpha\\n'; sleep 0.3; printf 'beta\\n'; sleep 0.3; printf 'gamma\\n'",
            ))
            .await;
        assert!(result.success, "error was: {}", result.error);

        let alpha = result.output.find("alpha").unwrap();
        let beta = result.output.find("beta").unwrap();
        let gamma = result.output.find("gamma").unwrap();
        assert!(alpha < beta && beta < gamma);
    }

    #[tokio::test]
    async fn test_progress_bar_collapses() {
        let result = engine()
            .execute(&ExecutionRequest::new(
                "printf 'progress: 10%%\\rprogress: 100%%\\ndone\\n'",
            ))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "progress: 100%\ndone\n");
    }

    #[tokio::test]
    async fn test_terminal_mode_unchanged_across_calls() {
        let before = crossterm::terminal::is_raw_mode_enabled().unwrap_or(false);

        let eng = engine();
        eng.execute(&ExecutionRequest::new("echo ok")).await;
        let mut timed = ExecutionRequest::new("sleep 5");
        timed.timeout = StdDuration::from_millis(300);
        eng.execute(&timed).await;

        let after = crossterm::terminal::is_raw_mode_enabled().unwrap_or(false);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_pipe_variant_splits_streams() {
        let result = pipe_engine()
            .execute(&ExecutionRequest::new("printf out; printf err 1>&2"))
            .await;
        assert!(result.success, "error was: {}", result.error);
        assert_eq!(result.output, "out");
        assert_eq!(result.error, "err");
    }

    #[tokio::test]
    async fn test_pty_variant_merges_streams() {
        if !cfg!(unix) {
            return;
        }
        let result = engine()
            .execute(&ExecutionRequest::new("printf err 1>&2"))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "err");
        assert!(result.error.is_empty());
    }
}
