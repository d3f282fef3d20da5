//! Fanout Engine (C5): reads from the encoder supervisor, feeds the
//! demuxer, pushes through the subscriber set. Modeled as a single task
//! that exclusively owns the supervisor and demuxer — per the grounding
//! ledger's Design Notes, the cache is never shared behind a lock that the
//! read loop itself could block on; other tasks talk to it only through
//! [`FanoutHandle`]'s request/response commands. Grounded in the teacher's
//! `tokio::spawn` per-connection task shape (`server/listener.rs`), turned
//! into a per-instance long-lived actor.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::StartupError;
use crate::media::Demuxer;
use crate::process::EncoderSupervisor;
use crate::subscriber::SubscriberSet;

/// Size of each read from the encoder's stdout (§4.5 pseudocode uses 8192).
const READ_CHUNK_SIZE: usize = 8192;

pub enum FanoutCommand {
    Start {
        argv: Vec<String>,
        reply: oneshot::Sender<Result<(), StartupError>>,
    },
    /// `reset_cache` lets the caller decide whether the demuxer cache
    /// should be wiped along with stopping the supervisor (§4.5).
    Stop {
        timeout: Duration,
        reset_cache: bool,
        reply: oneshot::Sender<()>,
    },
    /// Suppresses broadcast while kept true; the read loop keeps running so
    /// the cache stays warm during the grace window (§4.5 invariant).
    SetBroadcasting(bool),
    InitialReplay {
        reply: oneshot::Sender<Option<Bytes>>,
    },
    IsReady {
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<FanoutStats>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FanoutStats {
    pub closed_gop_count: usize,
    pub current_frame_count: usize,
    pub cache_size_bytes: usize,
}

/// Raised to the lifecycle controller when the encoder process ends while
/// the engine believed it should still be running.
pub enum FanoutEvent {
    EncoderCrashed { exit_code: Option<i32> },
}

#[derive(Clone)]
pub struct FanoutHandle {
    cmd_tx: mpsc::UnboundedSender<FanoutCommand>,
}

impl FanoutHandle {
    pub async fn start(&self, argv: Vec<String>) -> Result<(), StartupError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(FanoutCommand::Start { argv, reply });
        rx.await.unwrap_or(Err(StartupError::Spawn(std::io::Error::new(
            std::io::ErrorKind::Other,
            "fanout engine task is gone",
        ))))
    }

    pub async fn stop(&self, timeout: Duration, reset_cache: bool) {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(FanoutCommand::Stop {
            timeout,
            reset_cache,
            reply,
        });
        let _ = rx.await;
    }

    pub fn set_broadcasting(&self, on: bool) {
        let _ = self.cmd_tx.send(FanoutCommand::SetBroadcasting(on));
    }

    pub async fn initial_replay(&self) -> Option<Bytes> {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(FanoutCommand::InitialReplay { reply });
        rx.await.ok().flatten()
    }

    pub async fn is_ready(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(FanoutCommand::IsReady { reply });
        rx.await.unwrap_or(false)
    }

    pub async fn stats(&self) -> FanoutStats {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(FanoutCommand::Stats { reply });
        rx.await.unwrap_or_default()
    }
}

struct FanoutEngine {
    supervisor: EncoderSupervisor,
    demuxer: Demuxer,
    subscribers: Arc<SubscriberSet>,
    broadcasting: bool,
    events: mpsc::UnboundedSender<FanoutEvent>,
}

/// Spawns the fanout task and returns a handle to it. `events` receives
/// [`FanoutEvent`]s (currently just unexpected encoder exits) for the
/// lifecycle controller to react to.
pub fn spawn(
    max_gop_count: usize,
    subscribers: Arc<SubscriberSet>,
    events: mpsc::UnboundedSender<FanoutEvent>,
) -> FanoutHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let engine = FanoutEngine {
        supervisor: EncoderSupervisor::new(),
        demuxer: Demuxer::new(max_gop_count),
        subscribers,
        broadcasting: false,
        events,
    };
    tokio::spawn(engine.run(cmd_rx));
    FanoutHandle { cmd_tx }
}

impl FanoutEngine {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<FanoutCommand>) {
        loop {
            let running = self.supervisor.is_running();
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            self.supervisor.stop(Duration::from_secs(5)).await;
                            return;
                        }
                    }
                }
                read = self.supervisor.read(READ_CHUNK_SIZE), if running => {
                    self.handle_read(read);
                }
                else => {
                    // not running and no commands pending: yield briefly
                    // rather than spin.
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    }

    fn handle_read(&mut self, read: std::io::Result<Vec<u8>>) {
        match read {
            Ok(chunk) if chunk.is_empty() => {
                if !self.supervisor.is_running() {
                    let exit_code = self.supervisor.exit_code();
                    tracing::warn!(exit_code, "encoder exited unexpectedly");
                    let _ = self.events.send(FanoutEvent::EncoderCrashed { exit_code });
                }
            }
            Ok(chunk) => {
                self.demuxer.feed(&chunk);
                if self.broadcasting && !self.subscribers.is_empty() {
                    self.subscribers.broadcast(Bytes::from(chunk));
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "I/O error reading encoder stdout");
                let _ = self.events.send(FanoutEvent::EncoderCrashed { exit_code: None });
            }
        }
    }

    async fn handle_command(&mut self, cmd: FanoutCommand) {
        match cmd {
            FanoutCommand::Start { argv, reply } => {
                let result = self.supervisor.start(&argv);
                if result.is_ok() {
                    // A fresh encoder session emits its own header; any
                    // cached state from a prior session (e.g. a
                    // crash-triggered restart, which never goes through
                    // `Stop { reset_cache: true }`) would otherwise splice
                    // the new header onto stale GOPs (§4.3 rule 6).
                    self.demuxer.reset();
                    self.broadcasting = true;
                }
                let _ = reply.send(result);
            }
            FanoutCommand::Stop {
                timeout,
                reset_cache,
                reply,
            } => {
                self.broadcasting = false;
                self.supervisor.stop(timeout).await;
                if reset_cache {
                    self.demuxer.reset();
                }
                let _ = reply.send(());
            }
            FanoutCommand::SetBroadcasting(on) => {
                self.broadcasting = on;
            }
            FanoutCommand::InitialReplay { reply } => {
                let _ = reply.send(self.demuxer.initial_replay());
            }
            FanoutCommand::IsReady { reply } => {
                let _ = reply.send(self.demuxer.ready());
            }
            FanoutCommand::Stats { reply } => {
                let _ = reply.send(FanoutStats {
                    closed_gop_count: self.demuxer.closed_gop_count(),
                    current_frame_count: self.demuxer.current_frame_count(),
                    cache_size_bytes: self.demuxer.cache_size_bytes(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_stop_round_trip_leaves_engine_responsive() {
        let subs = Arc::new(SubscriberSet::new());
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let handle = spawn(2, subs, events_tx);

        handle
            .start(vec!["sleep".to_string(), "30".to_string()])
            .await
            .unwrap();
        assert!(!handle.is_ready().await);
        handle.stop(Duration::from_millis(200), true).await;
        assert!(!handle.is_ready().await);
    }

    #[tokio::test]
    async fn is_ready_false_before_any_data() {
        let subs = Arc::new(SubscriberSet::new());
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let handle = spawn(2, subs, events_tx);
        assert!(!handle.is_ready().await);
    }
}
