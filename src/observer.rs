//! GUI/Tray Collaborators (C11): the interface surface a desktop shell
//! would implement to react to state changes and issue lifecycle commands,
//! without this crate depending on any particular GUI toolkit (§1
//! Non-goals, §9 Design Notes: "modeled as a subscription interface on the
//! registry, not a global event bus"). Grounded in the teacher's
//! `server::config` trait-based collaborator seams, generalized to an
//! observer pattern.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use crate::instance::StatusSnapshot;

/// Notifications an observer receives about instance state changes.
/// Delivered best-effort, in the order they occur for a given instance;
/// no ordering guarantee across different instances.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateChange {
    Created { name: String },
    Started { name: String },
    Stopped { name: String },
    Crashed { name: String, exit_code: Option<i32> },
    EnteredError { name: String, message: String },
    Removed { name: String },
}

/// Implemented by a GUI/tray shell (or a test double) that wants to react
/// to registry events. Callbacks run on the registry's async context, so
/// implementations **must not block** — offload real work to a channel or
/// a spawned task (§9 Design Notes).
pub trait RegistryObserver: Send + Sync {
    fn on_state_change(&self, change: StateChange);
}

/// An observer that discards every notification, for headless operation
/// and tests.
#[derive(Debug, Default)]
pub struct NullObserver;

impl RegistryObserver for NullObserver {
    fn on_state_change(&self, _change: StateChange) {}
}

/// Forwards every notification onto an unbounded channel. `send` on an
/// unbounded sender never blocks, satisfying `RegistryObserver`'s
/// must-not-block contract; used by the admin API's state-change
/// subscription endpoint to bridge callbacks into an async stream.
pub struct ChannelObserver(pub mpsc::UnboundedSender<StateChange>);

impl RegistryObserver for ChannelObserver {
    fn on_state_change(&self, change: StateChange) {
        let _ = self.0.send(change);
    }
}

/// Fans a [`StateChange`] out to every subscribed [`RegistryObserver`].
/// Owned by the [`crate::registry::Registry`] and shared with each
/// [`crate::instance::Instance`] it spawns, so instance-level transitions
/// can notify without an `Instance -> Registry` back-reference (§9 Design
/// Notes: "modeled as a subscription interface on the registry").
#[derive(Default)]
pub struct ObserverHub {
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn notify(&self, change: StateChange) {
        for observer in self.observers.read().await.iter() {
            observer.on_state_change(change.clone());
        }
    }
}

/// Minimal command surface a GUI issues back into the registry; kept as a
/// trait (rather than a direct `Registry` dependency) so a GUI crate can
/// depend on this narrow interface instead of the whole service binary.
/// Uses native `async fn` in traits; static dispatch only (not `dyn`-safe),
/// which is fine since a GUI shell holds a concrete `Registry`.
pub trait LifecycleCommands: Send + Sync {
    async fn start(&self, name: &str) -> Result<(), crate::error::RegistryError>;
    async fn stop(&self, name: &str) -> Result<(), crate::error::RegistryError>;
    async fn restart(&self, name: &str) -> Result<(), crate::error::RegistryError>;
    async fn status(&self, name: &str) -> Result<StatusSnapshot, crate::error::RegistryError>;
    async fn list_all(&self) -> Vec<StatusSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_observer_accepts_every_variant_without_panicking() {
        let observer = NullObserver;
        observer.on_state_change(StateChange::Created {
            name: "cam1".to_string(),
        });
        observer.on_state_change(StateChange::Crashed {
            name: "cam1".to_string(),
            exit_code: Some(1),
        });
    }

    #[tokio::test]
    async fn hub_fans_a_notification_out_to_every_subscriber() {
        let hub = ObserverHub::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.subscribe(Arc::new(ChannelObserver(tx_a))).await;
        hub.subscribe(Arc::new(ChannelObserver(tx_b))).await;

        hub.notify(StateChange::Started {
            name: "cam1".to_string(),
        })
        .await;

        assert!(matches!(
            rx_a.recv().await,
            Some(StateChange::Started { name }) if name == "cam1"
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(StateChange::Started { name }) if name == "cam1"
        ));
    }
}
