//! Session supervisor
//!
//! The lifecycle state machine: Idle → Starting → Running → Stopping → Idle,
//! with a failed start falling back to Idle. All transitions execute on one
//! dedicated worker thread fed by a command queue, so overlapping start/stop
//! requests are serialized. The supervisor is the exclusive owner of the
//! live engine instance and the virtual-interface handle; the only state it
//! shares outside the worker is the atomic running flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{error, info, warn};

use tungate_platform::monitor::DefaultRouteMonitor;

use crate::bridge::{HostPlatform, PlatformBridge, TunSlot};
use crate::engine::{EngineFactory, TunnelEngine};
use crate::options::PackageOverrides;

/// Lifecycle state. `Starting` and `Stopping` are transient; externally they
/// read as their nearest stable neighbor through [`SessionSupervisor::is_running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

enum Command {
    Start {
        config: String,
        overrides: PackageOverrides,
    },
    Stop,
    Shutdown,
    #[cfg(test)]
    Sync(Sender<()>),
}

/// Supervises a single tunnel session: queues lifecycle commands onto the
/// worker and exposes the process-wide running flag.
pub struct SessionSupervisor {
    commands: Sender<Command>,
    running: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SessionSupervisor {
    pub fn new(
        session_label: impl Into<String>,
        platform: HostPlatform,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let (commands, queue) = unbounded();
        let running = Arc::new(AtomicBool::new(false));
        let mut worker = Worker {
            session_label: session_label.into(),
            monitor: Arc::new(DefaultRouteMonitor::new(platform.connectivity.clone())),
            platform,
            factory,
            running: running.clone(),
            state: SessionState::Idle,
            engine: None,
            tun_slot: Arc::new(Mutex::new(None)),
        };
        let handle = thread::Builder::new()
            .name("tungate-lifecycle".into())
            .spawn(move || worker.run(queue))
            .expect("failed to spawn lifecycle worker");

        Self {
            commands,
            running,
            worker: Some(handle),
        }
    }

    /// Queue a session start. An active session is stopped first.
    pub fn start(&self, config: String, overrides: PackageOverrides) {
        let _ = self.commands.send(Command::Start { config, overrides });
    }

    /// Queue a session stop.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// The process-wide running flag: true only while the state is Running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Block until every previously queued command has been processed.
    #[cfg(test)]
    pub(crate) fn sync(&self) {
        let (tx, rx) = unbounded();
        if self.commands.send(Command::Sync(tx)).is_ok() {
            let _ = rx.recv();
        }
    }
}

impl Drop for SessionSupervisor {
    fn drop(&mut self) {
        // Teardown: the stop sequence runs on the worker before it exits.
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Worker {
    session_label: String,
    platform: HostPlatform,
    factory: Arc<dyn EngineFactory>,
    monitor: Arc<DefaultRouteMonitor>,
    running: Arc<AtomicBool>,
    state: SessionState,
    engine: Option<Box<dyn TunnelEngine>>,
    tun_slot: TunSlot,
}

impl Worker {
    fn run(&mut self, queue: Receiver<Command>) {
        loop {
            match queue.recv() {
                Ok(Command::Start { config, overrides }) => self.start_session(config, overrides),
                Ok(Command::Stop) => self.stop_session(true),
                Ok(Command::Shutdown) | Err(_) => {
                    self.stop_session(false);
                    break;
                }
                #[cfg(test)]
                Ok(Command::Sync(done)) => {
                    let _ = done.send(());
                }
            }
        }
    }

    fn start_session(&mut self, config: String, overrides: PackageOverrides) {
        // Restart semantics: an active session is fully released first.
        if self.state != SessionState::Idle {
            self.stop_session(false);
        }

        self.state = SessionState::Starting;
        self.platform.host.update_status("Connecting");

        let bridge = Arc::new(PlatformBridge::new(
            self.session_label.clone(),
            self.platform.clone(),
            self.monitor.clone(),
            overrides,
            self.tun_slot.clone(),
        ));

        let mut engine = match self.factory.create(&config, bridge) {
            Ok(engine) => engine,
            Err(err) => {
                self.fail_start(&err.to_string());
                return;
            }
        };

        match engine.start() {
            Ok(()) => {
                self.engine = Some(engine);
                self.state = SessionState::Running;
                self.running.store(true, Ordering::SeqCst);
                self.platform.host.update_status("Connected");
                info!("tunnel session started");
            }
            Err(err) => {
                if let Err(close_err) = engine.close() {
                    warn!("engine close after failed start: {close_err}");
                }
                self.fail_start(&err.to_string());
            }
        }
    }

    /// Failed start: log, release any partially-constructed interface, fall
    /// back to Idle, surface the error, and ask the host context to stop.
    fn fail_start(&mut self, reason: &str) {
        error!("failed to start tunnel session: {reason}");
        self.close_tun();
        self.state = SessionState::Idle;
        self.running.store(false, Ordering::SeqCst);
        self.platform.host.update_status(&format!("Error: {reason}"));
        self.platform.host.request_stop();
    }

    /// The stop sequence. Every release step is best-effort and runs
    /// regardless of earlier failures.
    fn stop_session(&mut self, notify_host: bool) {
        self.state = SessionState::Stopping;
        self.running.store(false, Ordering::SeqCst);

        self.close_tun();
        if let Some(mut engine) = self.engine.take() {
            if let Err(err) = engine.close() {
                warn!("engine close failed: {err}");
            }
        }
        self.platform.host.clear_status();
        self.state = SessionState::Idle;

        if notify_host {
            self.platform.host.request_stop();
        }
    }

    fn close_tun(&mut self) {
        let mut slot = self.tun_slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut handle) = slot.take() {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::test_support::{fake_world, FakeWorld};
    use crate::engine::{EngineError, EnginePlatform};
    use crate::options::{IpPrefix, TunnelOptions};
    use std::sync::atomic::AtomicI32;

    struct FakeEngine {
        platform: Arc<dyn EnginePlatform>,
        options: TunnelOptions,
        fail_start: bool,
        fail_close: bool,
        closes: Arc<AtomicI32>,
    }

    impl TunnelEngine for FakeEngine {
        fn start(&mut self) -> Result<(), EngineError> {
            if self.fail_start {
                return Err(EngineError::StartFailed("bad inbound".into()));
            }
            self.platform
                .establish_interface(&self.options)
                .map_err(|e| EngineError::StartFailed(e.to_string()))?;
            Ok(())
        }

        fn close(&mut self) -> Result<(), EngineError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(EngineError::CloseFailed("hung".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        fail_create: bool,
        fail_start: bool,
        fail_close: bool,
        created: AtomicI32,
        closes: Arc<AtomicI32>,
    }

    impl EngineFactory for FakeFactory {
        fn create(
            &self,
            config: &str,
            platform: Arc<dyn EnginePlatform>,
        ) -> Result<Box<dyn TunnelEngine>, EngineError> {
            if self.fail_create {
                return Err(EngineError::InvalidConfiguration("unparseable".into()));
            }
            let options = serde_json::from_str(config)
                .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeEngine {
                platform,
                options,
                fail_start: self.fail_start,
                fail_close: self.fail_close,
                closes: self.closes.clone(),
            }))
        }
    }

    fn config() -> String {
        serde_json::to_string(&TunnelOptions {
            mtu: 1500,
            inet4_addresses: vec![IpPrefix::new("172.19.0.1", 30)],
            auto_route: true,
            ..TunnelOptions::default()
        })
        .unwrap()
    }

    fn supervisor_with(
        world: &FakeWorld,
        factory: Arc<FakeFactory>,
    ) -> SessionSupervisor {
        SessionSupervisor::new("tungate", world.platform.clone(), factory)
    }

    #[test]
    fn test_status_over_lifecycle() {
        let world = fake_world();
        let supervisor = supervisor_with(&world, Arc::new(FakeFactory::default()));

        assert!(!supervisor.is_running());

        supervisor.start(config(), PackageOverrides::default());
        supervisor.sync();
        assert!(supervisor.is_running());

        supervisor.stop();
        supervisor.sync();
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_start_twice_leaves_one_engine_and_one_device() {
        let world = fake_world();
        let factory = Arc::new(FakeFactory::default());
        let supervisor = supervisor_with(&world, factory.clone());

        supervisor.start(config(), PackageOverrides::default());
        supervisor.start(config(), PackageOverrides::default());
        supervisor.sync();

        assert!(supervisor.is_running());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        // First engine was closed, first device released.
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert_eq!(world.tun.open_devices.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_releases_everything() {
        let world = fake_world();
        let factory = Arc::new(FakeFactory::default());
        let supervisor = supervisor_with(&world, factory.clone());

        supervisor.start(config(), PackageOverrides::default());
        supervisor.stop();
        supervisor.sync();

        assert!(!supervisor.is_running());
        assert_eq!(world.tun.open_devices.load(Ordering::SeqCst), 0);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert!(world.host.cleared.load(Ordering::SeqCst));
        assert_eq!(world.host.stop_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_proceeds_past_engine_close_failure() {
        let world = fake_world();
        let factory = Arc::new(FakeFactory {
            fail_close: true,
            ..FakeFactory::default()
        });
        let supervisor = supervisor_with(&world, factory);

        supervisor.start(config(), PackageOverrides::default());
        supervisor.stop();
        supervisor.sync();

        assert!(!supervisor.is_running());
        assert_eq!(world.tun.open_devices.load(Ordering::SeqCst), 0);
        assert!(world.host.cleared.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_engine_start_returns_to_idle() {
        let world = fake_world();
        let factory = Arc::new(FakeFactory {
            fail_start: true,
            ..FakeFactory::default()
        });
        let supervisor = supervisor_with(&world, factory);

        supervisor.start(config(), PackageOverrides::default());
        supervisor.sync();

        assert!(!supervisor.is_running());
        assert_eq!(world.tun.open_devices.load(Ordering::SeqCst), 0);
        assert_eq!(world.host.stop_requests.load(Ordering::SeqCst), 1);
        let statuses = world.host.statuses.lock().unwrap();
        assert!(statuses.last().unwrap().starts_with("Error:"));
    }

    #[test]
    fn test_revoked_permission_fails_start() {
        let world = fake_world();
        world.tun.granted.store(false, Ordering::SeqCst);
        let supervisor = supervisor_with(&world, Arc::new(FakeFactory::default()));

        supervisor.start(config(), PackageOverrides::default());
        supervisor.sync();

        assert!(!supervisor.is_running());
        let statuses = world.host.statuses.lock().unwrap();
        assert!(statuses.last().unwrap().contains("permission"));
    }

    #[test]
    fn test_establish_failure_fails_start() {
        let world = fake_world();
        world.tun.fail_establish.store(true, Ordering::SeqCst);
        let supervisor = supervisor_with(&world, Arc::new(FakeFactory::default()));

        supervisor.start(config(), PackageOverrides::default());
        supervisor.sync();

        assert!(!supervisor.is_running());
        assert_eq!(world.tun.open_devices.load(Ordering::SeqCst), 0);
        assert_eq!(world.host.stop_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_failure_requests_host_stop() {
        let world = fake_world();
        let factory = Arc::new(FakeFactory {
            fail_create: true,
            ..FakeFactory::default()
        });
        let supervisor = supervisor_with(&world, factory);

        supervisor.start(config(), PackageOverrides::default());
        supervisor.sync();

        assert!(!supervisor.is_running());
        assert_eq!(world.host.stop_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_tears_down_running_session() {
        let world = fake_world();
        let factory = Arc::new(FakeFactory::default());
        let closes = factory.closes.clone();

        {
            let supervisor = supervisor_with(&world, factory);
            supervisor.start(config(), PackageOverrides::default());
            supervisor.sync();
            assert!(supervisor.is_running());
        }

        assert_eq!(world.tun.open_devices.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
