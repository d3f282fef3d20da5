//! Instance Lifecycle Controller (C6): the state machine of §4.6 wired up
//! to the real collaborators (C1/C3 via the fanout engine, C4, C2).
//! Grounded in the teacher's `session::context::SessionContext`, which
//! similarly owns a handle to the connection's async driver plus
//! bookkeeping state behind a lock, generalized from one RTMP session to
//! one instance's full start/stop/subscribe lifecycle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::command::{self, WindowHelper};
use crate::config::InstanceConfig;
use crate::error::StartupError;
use crate::fanout::{self, FanoutEvent, FanoutHandle};
use crate::instance::lifecycle::LifecycleState;
use crate::observer::{ObserverHub, StateChange};
use crate::process::CrashLedger;
use crate::subscriber::{SubscriberId, SubscriberSet};

/// Bound on how long a late subscriber waits for the cache to become ready
/// before falling back to live-stream-only (§4.6, §9 Design Notes: "≈10s").
const LATE_JOIN_WAIT: Duration = Duration::from_secs(10);
const LATE_JOIN_POLL: Duration = Duration::from_millis(100);

/// Cap on the rolling in-memory log buffer surfaced by `recent_logs`
/// (SPEC_FULL §10 supplemented feature).
const LOG_BUFFER_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub name: String,
    pub state: String,
    pub port: u16,
    pub path: String,
    pub source_type: &'static str,
    pub client_count: usize,
    pub uptime_seconds: Option<u64>,
    pub error_message: Option<String>,
    pub video_codec: String,
    pub audio_codec: String,
    pub bitrate: String,
    pub framerate: u32,
    pub closed_gop_count: usize,
    pub current_frame_count: usize,
    pub cache_size_bytes: usize,
}

pub struct Instance {
    pub name: String,
    config: InstanceConfig,
    port: u16,
    path: String,
    window_helper: Arc<dyn WindowHelper>,
    fanout: FanoutHandle,
    subscribers: Arc<SubscriberSet>,
    observers: Arc<ObserverHub>,
    crash_ledger: Mutex<CrashLedger>,
    state: Mutex<LifecycleState>,
    start_time: Mutex<Option<Instant>>,
    error_message: Mutex<Option<String>>,
    recent_logs: Mutex<VecDeque<String>>,
    /// Set to request cancellation of a pending deferred-stop timer; swapped
    /// for a fresh flag each time a new timer is armed.
    deferred_stop_cancel: Mutex<Option<Arc<AtomicBool>>>,
}

impl Instance {
    /// Builds the instance's collaborators and spawns its event-processing
    /// task, but does not start the encoder: instances are created in
    /// `stopped` state (§4.6).
    pub fn spawn(
        config: InstanceConfig,
        port: u16,
        path: String,
        window_helper: Arc<dyn WindowHelper>,
        observers: Arc<ObserverHub>,
    ) -> Arc<Self> {
        let subscribers = Arc::new(SubscriberSet::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let fanout = fanout::spawn(config.process.max_gop_count, subscribers.clone(), events_tx);
        let crash_ledger = CrashLedger::new(
            config.process.crash_threshold,
            Duration::from_secs(config.process.crash_window_secs),
        );

        let instance = Arc::new(Self {
            name: config.name.clone(),
            config,
            port,
            path,
            window_helper,
            fanout,
            subscribers,
            observers,
            crash_ledger: Mutex::new(crash_ledger),
            state: Mutex::new(LifecycleState::Stopped),
            start_time: Mutex::new(None),
            error_message: Mutex::new(None),
            recent_logs: Mutex::new(VecDeque::with_capacity(LOG_BUFFER_CAPACITY)),
            deferred_stop_cancel: Mutex::new(None),
        });

        let weak = Arc::downgrade(&instance);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(instance) = weak.upgrade() else { break };
                match event {
                    FanoutEvent::EncoderCrashed { exit_code } => {
                        instance.on_encoder_crashed(exit_code).await;
                    }
                }
            }
        });

        instance
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    fn build_argv(&self) -> Result<Vec<String>, StartupError> {
        command::build_encoder_argv(&self.config, self.window_helper.as_ref())
    }

    /// **start** event (§4.6): stopped -> starting -> (running | error).
    pub async fn start(self: &Arc<Self>) -> Result<(), StartupError> {
        {
            let mut state = self.state.lock().await;
            if *state != LifecycleState::Stopped {
                return Ok(());
            }
            *state = LifecycleState::Starting;
        }
        self.attempt_start().await
    }

    async fn attempt_start(self: &Arc<Self>) -> Result<(), StartupError> {
        let argv = self.build_argv()?;
        match self.fanout.start(argv).await {
            Ok(()) => {
                *self.start_time.lock().await = Some(Instant::now());
                *self.error_message.lock().await = None;
                *self.state.lock().await = LifecycleState::Running;
                self.log(format!("instance {} started", self.name)).await;
                self.observers
                    .notify(StateChange::Started { name: self.name.clone() })
                    .await;
                Ok(())
            }
            Err(e) => {
                self.crash_ledger.lock().await.record();
                *self.error_message.lock().await = Some(e.to_string());
                *self.state.lock().await = LifecycleState::Error;
                self.log(format!("instance {} failed to start: {e}", self.name))
                    .await;
                self.observers
                    .notify(StateChange::EnteredError {
                        name: self.name.clone(),
                        message: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// **stop** event (§4.6): any running-ish state -> stopping -> stopped.
    pub async fn stop(self: &Arc<Self>, timeout: Duration) {
        self.disarm_deferred_stop().await;
        {
            let mut state = self.state.lock().await;
            if *state == LifecycleState::Stopped {
                return;
            }
            *state = LifecycleState::Stopping;
        }
        self.fanout.stop(timeout, true).await;
        *self.start_time.lock().await = None;
        *self.state.lock().await = LifecycleState::Stopped;
        self.log(format!("instance {} stopped", self.name)).await;
        self.observers
            .notify(StateChange::Stopped { name: self.name.clone() })
            .await;
    }

    /// **subscriber_arrives** event. Returns the new subscriber's id (so the
    /// caller can later report `subscriber_left`) and the receiving half of
    /// its channel; the caller (the WebSocket handler) forwards frames from
    /// it to the socket.
    pub async fn subscriber_arrives(
        self: &Arc<Self>,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<Bytes>) {
        self.disarm_deferred_stop().await;
        let id: SubscriberId = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let was_stopped = { *self.state.lock().await == LifecycleState::Stopped };
        if was_stopped {
            // First-subscriber optimization (§4.6): register before the
            // encoder exists, so this subscriber's first bytes are the
            // encoder's own container header — no replay synthesis needed.
            self.subscribers.add(id, tx);
            if let Err(e) = self.start().await {
                tracing::warn!(instance = %self.name, error = %e, "start-on-first-subscriber failed");
            }
            return (id, rx);
        }

        if self.wait_for_ready().await {
            if let Some(replay) = self.fanout.initial_replay().await {
                // Send directly on the channel we still own, before the
                // subscriber is visible to `broadcast`, so this is
                // guaranteed to be the first thing the channel carries
                // (§4.4, §4.6 ordering guarantee).
                let _ = tx.send(replay);
            }
        } else {
            tracing::warn!(
                instance = %self.name,
                "late subscriber timed out waiting for cache readiness; falling back to live-stream-only"
            );
        }
        self.subscribers.add(id, tx);
        (id, rx)
    }

    async fn wait_for_ready(&self) -> bool {
        let deadline = Instant::now() + LATE_JOIN_WAIT;
        loop {
            if self.fanout.is_ready().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(LATE_JOIN_POLL).await;
        }
    }

    /// Called after a subscriber disconnects; arms the deferred-stop timer
    /// if that was the last one (§4.6).
    pub async fn subscriber_left(self: &Arc<Self>, id: SubscriberId) {
        self.subscribers.remove(id);
        if self.subscribers.is_empty() {
            self.arm_deferred_stop().await;
        }
    }

    async fn arm_deferred_stop(self: &Arc<Self>) {
        let cancel = Arc::new(AtomicBool::new(false));
        *self.deferred_stop_cancel.lock().await = Some(cancel.clone());
        let timeout = Duration::from_secs(self.config.process.shutdown_timeout_secs);
        let instance = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            if !instance.subscribers.is_empty() {
                return;
            }
            instance.stop(Duration::from_secs(5)).await;
        });
    }

    async fn disarm_deferred_stop(&self) {
        if let Some(cancel) = self.deferred_stop_cancel.lock().await.take() {
            cancel.store(true, Ordering::SeqCst);
        }
    }

    async fn on_encoder_crashed(self: Arc<Self>, exit_code: Option<i32>) {
        {
            let state = *self.state.lock().await;
            if state != LifecycleState::Running && state != LifecycleState::Starting {
                return;
            }
        }
        let mut ledger = self.crash_ledger.lock().await;
        ledger.record();
        let restart = ledger.should_restart();
        drop(ledger);

        self.log(format!(
            "instance {} encoder exited (code {:?}), restart = {restart}",
            self.name, exit_code
        ))
        .await;
        self.observers
            .notify(StateChange::Crashed {
                name: self.name.clone(),
                exit_code,
            })
            .await;

        if restart {
            *self.state.lock().await = LifecycleState::Starting;
            if let Err(e) = self.attempt_start().await {
                tracing::error!(instance = %self.name, error = %e, "restart after crash failed");
            }
        } else {
            let message = format!("crash threshold exceeded (exit code {exit_code:?})");
            *self.error_message.lock().await = Some(message.clone());
            *self.state.lock().await = LifecycleState::Error;
            self.observers
                .notify(StateChange::EnteredError {
                    name: self.name.clone(),
                    message,
                })
                .await;
        }
    }

    /// Resets an instance stuck in `error` back to `stopped` so an operator
    /// can retry (§4.6: "refuses further starts until an explicit operator
    /// action resets it").
    pub async fn reset_error(&self) {
        let mut state = self.state.lock().await;
        if *state == LifecycleState::Error {
            *state = LifecycleState::Stopped;
            self.crash_ledger.lock().await.reset();
            *self.error_message.lock().await = None;
        }
    }

    pub fn removable(&self) -> bool {
        // checked synchronously by the registry via try_lock; callers that
        // need the strict guarantee should `state().await` first.
        self.state
            .try_lock()
            .map(|s| s.removable())
            .unwrap_or(false)
    }

    async fn log(&self, line: String) {
        tracing::info!("{line}");
        let mut logs = self.recent_logs.lock().await;
        if logs.len() == LOG_BUFFER_CAPACITY {
            logs.pop_front();
        }
        logs.push_back(line);
    }

    pub async fn recent_logs(&self) -> Vec<String> {
        self.recent_logs.lock().await.iter().cloned().collect()
    }

    pub async fn status(&self) -> StatusSnapshot {
        let state = *self.state.lock().await;
        let uptime_seconds = self
            .start_time
            .lock()
            .await
            .map(|t| t.elapsed().as_secs());
        let error_message = self.error_message.lock().await.clone();
        let stats = self.fanout.stats().await;

        StatusSnapshot {
            name: self.name.clone(),
            state: state.to_string(),
            port: self.port,
            path: self.path.clone(),
            source_type: self.config.source.type_name(),
            client_count: self.subscribers.count(),
            uptime_seconds,
            error_message,
            video_codec: format!("{:?}", self.config.ffmpeg.video_codec).to_lowercase(),
            audio_codec: format!("{:?}", self.config.ffmpeg.audio_codec).to_lowercase(),
            bitrate: self.config.ffmpeg.bitrate.clone(),
            framerate: self.config.ffmpeg.framerate,
            closed_gop_count: stats.closed_gop_count,
            current_frame_count: stats.current_frame_count,
            cache_size_bytes: stats.cache_size_bytes,
        }
    }
}
