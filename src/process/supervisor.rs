//! Encoder Process Supervisor (C1), grounded in
//! `original_source/src/process/process_manager.py`: spawn with piped
//! stdout/stderr, cooperative-then-forced shutdown, non-blocking reads.
//!
//! "Non-blocking read" is adapted to tokio's async-IO idiom (see Design
//! Notes in the grounding ledger): `AsyncReadExt::read` on a child's stdout
//! suspends the *task*, never the OS thread, and returns as soon as any
//! bytes are available or the stream hits EOF — the async equivalent of the
//! Python original's `os.read` + `BlockingIOError` fallback.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::error::StartupError;

/// Extra grace period after a forced kill before giving up on `wait()`,
/// matching the Python original's `wait(timeout=2)` after `kill()`.
const FORCED_WAIT_GRACE: Duration = Duration::from_secs(2);

pub struct EncoderSupervisor {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stdin: Option<ChildStdin>,
    start_time: Option<Instant>,
    exit_code: Option<i32>,
}

impl Default for EncoderSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderSupervisor {
    pub fn new() -> Self {
        Self {
            child: None,
            stdout: None,
            stdin: None,
            start_time: None,
            exit_code: None,
        }
    }

    /// Spawns the encoder with `argv[0]` as the binary and the rest as
    /// arguments. Fails with [`StartupError::AlreadyRunning`] if a child is
    /// already attached, or [`StartupError::Spawn`] on OS failure.
    pub fn start(&mut self, argv: &[String]) -> Result<(), StartupError> {
        if self.is_running() {
            return Err(StartupError::AlreadyRunning);
        }
        let (bin, args) = argv.split_first().ok_or_else(|| {
            StartupError::Spawn(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command line",
            ))
        })?;

        let mut child = Command::new(bin)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(StartupError::Spawn)?;

        self.stdout = child.stdout.take();
        self.stdin = child.stdin.take();
        self.start_time = Some(Instant::now());
        self.exit_code = None;
        tracing::info!(pid = child.id(), argv = ?argv, "encoder started");
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_forwarder(child.id(), stderr);
        }
        self.child = Some(child);
        Ok(())
    }

    /// Cooperative-then-forced shutdown (§4.1). Idempotent: calling `stop`
    /// with no child attached is a no-op success.
    pub async fn stop(&mut self, timeout: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        self.send_cooperative_stop(&child);

        let exited = tokio::time::timeout(timeout, child.wait()).await;
        match exited {
            Ok(Ok(status)) => {
                tracing::info!(pid, "encoder exited gracefully");
                self.exit_code = status.code();
            }
            _ => {
                tracing::warn!(pid, "encoder did not exit within timeout, forcing kill");
                let _ = child.start_kill();
                match tokio::time::timeout(FORCED_WAIT_GRACE, child.wait()).await {
                    Ok(Ok(status)) => self.exit_code = status.code(),
                    _ => tracing::error!(pid, "encoder did not exit even after forced kill"),
                }
            }
        }

        self.stdout = None;
        self.stdin = None;
        self.start_time = None;
    }

    #[cfg(unix)]
    fn send_cooperative_stop(&self, child: &Child) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::warn!(pid, error = %e, "failed to send SIGTERM to encoder");
            }
        }
    }

    #[cfg(not(unix))]
    fn send_cooperative_stop(&self, _child: &Child) {
        // No portable graceful-termination signal off unix; the subsequent
        // timeout-then-kill path below still applies.
    }

    /// Non-blocking read of up to `n` bytes of the encoder's stdout. Returns
    /// an empty buffer (not an error) on transient emptiness or if no
    /// encoder is attached; returns an empty buffer at EOF too, leaving the
    /// caller to observe `is_running() == false` to distinguish the cases.
    pub async fn read(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(Vec::new());
        };
        let mut buf = vec![0u8; n];
        let read = stdout.read(&mut buf).await?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Writes `data` to the encoder's stdin, used by source variants that
    /// need to signal ffmpeg interactively; unused by the default flow.
    pub async fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.write_all(data).await?;
        }
        Ok(())
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            None => false,
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_code = status.code();
                    false
                }
                Ok(None) => true,
                Err(_) => false,
            },
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }
}

/// Forwards the encoder's stderr line-by-line into `tracing`, for the
/// supplemented diagnostics-forwarding feature (SPEC_FULL §10). Runs for the
/// stream's lifetime on its own task so it never competes with stdout reads
/// for a borrow of the supervisor.
fn spawn_stderr_forwarder(pid: Option<u32>, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(pid, encoder_stderr = %line, "encoder stderr"),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(pid, error = %e, "error reading encoder stderr");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_then_stop_a_real_process_is_idempotent_on_double_stop() {
        let mut sup = EncoderSupervisor::new();
        sup.start(&["sleep".to_string(), "30".to_string()])
            .expect("spawn sleep");
        assert!(sup.is_running());
        sup.stop(Duration::from_millis(200)).await;
        assert!(!sup.is_running());
        // second stop is a no-op, not an error
        sup.stop(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn start_twice_without_stop_fails() {
        let mut sup = EncoderSupervisor::new();
        sup.start(&["sleep".to_string(), "30".to_string()])
            .expect("spawn sleep");
        let err = sup.start(&["sleep".to_string(), "30".to_string()]);
        assert!(matches!(err, Err(StartupError::AlreadyRunning)));
        sup.stop(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn read_returns_produced_bytes() {
        let mut sup = EncoderSupervisor::new();
        sup.start(&[
            "printf".to_string(),
            "hello".to_string(),
        ])
        .expect("spawn printf");
        // Give the process a moment to write and exit.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut collected = Vec::new();
        for _ in 0..5 {
            let chunk = sup.read(64).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello");
        sup.stop(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn spawning_a_missing_binary_fails_with_spawn_error() {
        let mut sup = EncoderSupervisor::new();
        let err = sup.start(&["/no/such/binary-xyz".to_string()]);
        assert!(matches!(err, Err(StartupError::Spawn(_))));
    }
}
