//! Instance Registry (C8): owns every [`Instance`], the shared [`Router`],
//! and port allocation. Grounded in the teacher's `registry::store::Store`
//! (`RwLock<HashMap<...>>` plus a snapshot-style `list_all`), generalized
//! from RTMP stream entries to full instance lifecycles.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::command::WindowHelper;
use crate::config::InstanceConfig;
use crate::error::RegistryError;
use crate::instance::{Instance, StatusSnapshot};
use crate::observer::{ObserverHub, RegistryObserver, StateChange};
use crate::router::Router;

/// Default timeout for an explicit operator-issued stop (§6: "shutdown
/// timeout" governs the deferred-stop grace window; explicit stops use a
/// shorter, fixed timeout for responsiveness).
const EXPLICIT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Registry {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    router: Mutex<Router>,
    window_helper: Arc<dyn WindowHelper>,
    observers: Arc<ObserverHub>,
    base_port: u16,
    bind_host: String,
}

impl Registry {
    pub fn new(window_helper: Arc<dyn WindowHelper>, base_port: u16, bind_host: String) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            router: Mutex::new(Router::new()),
            window_helper,
            observers: Arc::new(ObserverHub::new()),
            base_port,
            bind_host,
        }
    }

    /// Registers a collaborator to receive every [`StateChange`] notification
    /// for every instance in this registry (§6: "subscribe to state-change
    /// notifications"; §9 Design Notes: a subscription interface on the
    /// registry, not a global event bus).
    pub async fn subscribe(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.subscribe(observer).await;
    }

    /// Creates (but does not start) an instance from an already-validated
    /// config. Allocates a port if the config didn't pin one, and fails if
    /// the resulting (port, path) is already claimed (§4.7, §4.8).
    pub async fn create(&self, mut config: InstanceConfig) -> Result<(), RegistryError> {
        let name = config.name.clone();
        if self.instances.read().await.contains_key(&name) {
            return Err(RegistryError::AlreadyExists(name));
        }

        let mut router = self.router.lock().await;
        let port = match config.server.port {
            Some(p) => p,
            None => {
                let p = self.allocate_port(&router)?;
                config.server.port = Some(p);
                p
            }
        };
        let path = config.server.path.clone();

        router.add(port, &path, &name)?;
        drop(router);

        let instance = Instance::spawn(
            config,
            port,
            path,
            self.window_helper.clone(),
            self.observers.clone(),
        );
        self.instances.write().await.insert(name.clone(), instance);
        self.observers.notify(StateChange::Created { name }).await;
        Ok(())
    }

    fn allocate_port(&self, router: &Router) -> Result<u16, RegistryError> {
        let mut candidate = self.base_port;
        loop {
            if candidate == 0 {
                return Err(RegistryError::NoFreePort(self.base_port));
            }
            if !router.port_in_use(candidate) && self.bind_probe(candidate) {
                return Ok(candidate);
            }
            match candidate.checked_add(1) {
                Some(next) => candidate = next,
                None => return Err(RegistryError::NoFreePort(self.base_port)),
            }
        }
    }

    /// Best-effort: a bind that succeeds and is immediately dropped doesn't
    /// guarantee the port stays free, but catches the common case of an
    /// unrelated process already holding it (§4.8).
    fn bind_probe(&self, port: u16) -> bool {
        let addr: SocketAddr = format!("{}:{port}", self.bind_host)
            .parse()
            .unwrap_or_else(|_| ([0, 0, 0, 0], port).into());
        TcpListener::bind(addr).is_ok()
    }

    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let instance = self.get(name).await?;
        if !instance.removable() {
            return Err(RegistryError::NotStopped(name.to_string()));
        }
        self.router
            .lock()
            .await
            .remove(instance.port(), instance.path());
        self.instances.write().await.remove(name);
        self.observers
            .notify(StateChange::Removed { name: name.to_string() })
            .await;
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<(), RegistryError> {
        let instance = self.get(name).await?;
        instance.start().await.map_err(RegistryError::from)
    }

    pub async fn stop(&self, name: &str) -> Result<(), RegistryError> {
        let instance = self.get(name).await?;
        instance.stop(EXPLICIT_STOP_TIMEOUT).await;
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<(), RegistryError> {
        let instance = self.get(name).await?;
        instance.stop(EXPLICIT_STOP_TIMEOUT).await;
        instance.start().await.map_err(RegistryError::from)
    }

    pub async fn get_status(&self, name: &str) -> Result<StatusSnapshot, RegistryError> {
        let instance = self.get(name).await?;
        Ok(instance.status().await)
    }

    pub async fn list_all(&self) -> Vec<StatusSnapshot> {
        let names: Vec<Arc<Instance>> = self.instances.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(names.len());
        for instance in names {
            out.push(instance.status().await);
        }
        out
    }

    pub async fn stop_all(&self) {
        let instances: Vec<Arc<Instance>> = self.instances.read().await.values().cloned().collect();
        for instance in instances {
            instance.stop(EXPLICIT_STOP_TIMEOUT).await;
        }
    }

    /// Distinct ports currently claimed by registered instances, so the
    /// binary knows how many listeners to bind (§5: "router dispatch runs
    /// under the process-wide listener").
    pub async fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .instances
            .read()
            .await
            .values()
            .map(|i| i.port())
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    /// Edit-time conflict check used by GUI/API collaborators before
    /// accepting a new (port, path) pairing (§4.8).
    pub async fn conflict(&self, port: u16, path: &str, exclude: &str) -> Option<String> {
        self.router
            .lock()
            .await
            .conflict(port, path, exclude)
            .map(str::to_string)
    }

    /// Looks up the instance owning (port, path), for the WebSocket
    /// upgrade path (§4.7).
    pub async fn instance_for_route(&self, port: u16, path: &str) -> Option<Arc<Instance>> {
        let name = self.router.lock().await.lookup(port, path)?.to_string();
        self.instances.read().await.get(&name).cloned()
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Instance>, RegistryError> {
        self.instances
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NoSuchInstance(name.to_string()))
    }
}

impl crate::observer::LifecycleCommands for Registry {
    async fn start(&self, name: &str) -> Result<(), RegistryError> {
        Registry::start(self, name).await
    }

    async fn stop(&self, name: &str) -> Result<(), RegistryError> {
        Registry::stop(self, name).await
    }

    async fn restart(&self, name: &str) -> Result<(), RegistryError> {
        Registry::restart(self, name).await
    }

    async fn status(&self, name: &str) -> Result<StatusSnapshot, RegistryError> {
        Registry::get_status(self, name).await
    }

    async fn list_all(&self) -> Vec<StatusSnapshot> {
        Registry::list_all(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NullWindowHelper;
    use crate::config::{FfmpegSection, ProcessSection, ServerSection, SourceConfig, VideoCodec, AudioCodec};
    use std::path::PathBuf;

    fn test_config(name: &str, port: Option<u16>) -> InstanceConfig {
        InstanceConfig {
            name: name.to_string(),
            server: ServerSection {
                port,
                host: "0.0.0.0".to_string(),
                path: "/".to_string(),
            },
            ffmpeg: FfmpegSection {
                ffmpeg_path: PathBuf::from("/usr/bin/ffmpeg"),
                video_codec: VideoCodec::H264,
                audio_codec: AudioCodec::Aac,
                bitrate: "2000k".to_string(),
                framerate: 30,
                preset: crate::config::Preset::Veryfast,
                tune: crate::config::Tune::Zerolatency,
            },
            source: SourceConfig::Screen { region: None },
            process: ProcessSection::default(),
            logging: Default::default(),
            description: None,
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(NullWindowHelper), 19000, "127.0.0.1".to_string())
    }

    #[tokio::test]
    async fn create_then_status_round_trips() {
        let reg = registry();
        reg.create(test_config("cam1", Some(19500))).await.unwrap();
        let status = reg.get_status("cam1").await.unwrap();
        assert_eq!(status.state, "stopped");
        assert_eq!(status.port, 19500);
    }

    #[tokio::test]
    async fn create_with_duplicate_name_fails() {
        let reg = registry();
        reg.create(test_config("cam1", Some(19501))).await.unwrap();
        let err = reg.create(test_config("cam1", Some(19502))).await;
        assert!(matches!(err, Err(RegistryError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn create_with_conflicting_route_fails() {
        let reg = registry();
        reg.create(test_config("cam1", Some(19503))).await.unwrap();
        let err = reg.create(test_config("cam2", Some(19503))).await;
        assert!(matches!(err, Err(RegistryError::Route(_))));
    }

    #[tokio::test]
    async fn port_is_auto_allocated_when_unset() {
        let reg = registry();
        reg.create(test_config("cam1", None)).await.unwrap();
        let status = reg.get_status("cam1").await.unwrap();
        assert!(status.port >= 19000);
    }

    #[tokio::test]
    async fn remove_requires_stopped_state() {
        let reg = registry();
        reg.create(test_config("cam1", Some(19504))).await.unwrap();
        reg.remove("cam1").await.unwrap();
        assert!(matches!(
            reg.get("cam1").await,
            Err(RegistryError::NoSuchInstance(_))
        ));
    }

    #[tokio::test]
    async fn remove_missing_instance_fails() {
        let reg = registry();
        let err = reg.remove("ghost").await;
        assert!(matches!(err, Err(RegistryError::NoSuchInstance(_))));
    }

    #[tokio::test]
    async fn conflict_reports_the_owning_instance_excluding_self() {
        let reg = registry();
        reg.create(test_config("cam1", Some(19505))).await.unwrap();
        assert_eq!(reg.conflict(19505, "/", "cam1").await, None);
        assert_eq!(
            reg.conflict(19505, "/", "cam2").await,
            Some("cam1".to_string())
        );
    }

    #[tokio::test]
    async fn instance_for_route_resolves_matching_port_and_path() {
        let reg = registry();
        reg.create(test_config("cam1", Some(19506))).await.unwrap();
        let instance = reg.instance_for_route(19506, "/").await;
        assert!(instance.is_some());
        assert!(reg.instance_for_route(19506, "/nope").await.is_none());
    }
}
