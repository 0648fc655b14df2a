//! Platform capability bridge
//!
//! [`PlatformBridge`] is the one [`EnginePlatform`] implementation: it wires
//! the engine's capability queries to the OS adapters and owns interface
//! establishment for the current session. The supervisor constructs one
//! bridge per session and shares the TUN-handle slot with it so teardown can
//! release the device the bridge established.

use std::sync::{Arc, Mutex};

use tracing::debug;

use tungate_platform::certs::system_certificates;
use tungate_platform::link::{enumerate_links, LinkInfo};
use tungate_platform::monitor::{DefaultRouteListener, DefaultRouteMonitor};
use tungate_platform::os::{
    AlertSink, Connectivity, EstablishError, NetworkLinks, PackageRegistry, ServiceHost,
    TrustStore, TunHandle, TunProvisioner, WifiQuery,
};
use tungate_platform::wifi::{read_wifi_state, WifiState};

use crate::engine::{EnginePlatform, QueryError};
use crate::notify::{EngineAlert, NotificationBridge};
use crate::options::{resolve_interface, PackageOverrides, TunnelOptions};

/// The full set of host OS seams the session layer needs, bundled for
/// injection. Production wires real OS bindings; tests wire fakes.
#[derive(Clone)]
pub struct HostPlatform {
    pub links: Arc<dyn NetworkLinks>,
    pub connectivity: Arc<dyn Connectivity>,
    pub wifi: Arc<dyn WifiQuery>,
    pub trust: Arc<dyn TrustStore>,
    pub packages: Arc<dyn PackageRegistry>,
    pub tun: Arc<dyn TunProvisioner>,
    pub alerts: Arc<dyn AlertSink>,
    pub host: Arc<dyn ServiceHost>,
}

/// Shared slot holding the live TUN handle, owned by the supervisor.
pub type TunSlot = Arc<Mutex<Option<TunHandle>>>;

/// Capability bridge handed to the engine for one session.
pub struct PlatformBridge {
    session_label: String,
    platform: HostPlatform,
    monitor: Arc<DefaultRouteMonitor>,
    notifications: NotificationBridge,
    overrides: PackageOverrides,
    tun_slot: TunSlot,
}

impl PlatformBridge {
    pub fn new(
        session_label: impl Into<String>,
        platform: HostPlatform,
        monitor: Arc<DefaultRouteMonitor>,
        overrides: PackageOverrides,
        tun_slot: TunSlot,
    ) -> Self {
        let notifications = NotificationBridge::new(platform.alerts.clone());
        Self {
            session_label: session_label.into(),
            platform,
            monitor,
            notifications,
            overrides,
            tun_slot,
        }
    }
}

impl EnginePlatform for PlatformBridge {
    fn enumerate_interfaces(&self) -> Vec<LinkInfo> {
        enumerate_links(self.platform.links.as_ref())
    }

    fn start_default_route_monitor(&self, listener: Arc<dyn DefaultRouteListener>) {
        self.monitor.start(listener);
    }

    fn stop_default_route_monitor(&self, listener: &Arc<dyn DefaultRouteListener>) {
        self.monitor.stop(listener);
    }

    fn read_wifi_state(&self) -> Option<WifiState> {
        read_wifi_state(self.platform.wifi.as_ref())
    }

    fn system_trusted_certificates(&self) -> Vec<String> {
        system_certificates(self.platform.trust.as_ref())
    }

    fn package_name_for_uid(&self, uid: u32) -> Result<String, QueryError> {
        self.platform
            .packages
            .packages_for_uid(uid)
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::NotFound(format!("no package for uid {uid}")))
    }

    fn uid_for_package_name(&self, package: &str) -> Result<u32, QueryError> {
        self.platform
            .packages
            .uid_for_package(package)
            .ok_or_else(|| QueryError::NotFound(format!("package {package} not installed")))
    }

    fn find_connection_owner(
        &self,
        _ip_protocol: i32,
        _source_address: &str,
        _source_port: u16,
        _destination_address: &str,
        _destination_port: u16,
    ) -> Result<u32, QueryError> {
        Err(QueryError::Unsupported("find_connection_owner"))
    }

    fn write_log(&self, message: &str) {
        debug!(target: "tungate::engine", "{message}");
    }

    fn post_notification(&self, alert: EngineAlert) {
        self.notifications.post(alert);
    }

    fn establish_interface(&self, options: &TunnelOptions) -> Result<i32, EstablishError> {
        if !self.platform.tun.permission_granted() {
            return Err(EstablishError::PermissionDenied);
        }

        let mut builder = self.platform.tun.builder();
        builder.set_session(&self.session_label);
        resolve_interface(
            builder.as_mut(),
            options,
            &self.overrides,
            &self.platform.packages.own_package(),
            self.platform.tun.supports_http_proxy(),
        );

        let handle = builder.establish()?;
        let fd = handle.raw_fd();
        let mut slot = self.tun_slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut previous) = slot.replace(handle) {
            previous.close();
        }
        Ok(fd)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory host platform shared by the bridge and session tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
    use tungate_platform::os::{
        ConnectivityError, DirectiveError, InterfaceBuilder, LinkReadError, NetworkCapabilities,
        NetworkEventSink, NetworkId, OsNotification, RawLink, SubscriptionId, TrustStoreError,
        WifiConnection,
    };

    #[derive(Default)]
    pub struct FakeLinks(pub Vec<RawLink>);

    impl NetworkLinks for FakeLinks {
        fn links(&self) -> Vec<Result<RawLink, LinkReadError>> {
            self.0.iter().cloned().map(Ok).collect()
        }
    }

    #[derive(Default)]
    pub struct FakeConnectivity {
        next: AtomicU64,
    }

    impl Connectivity for FakeConnectivity {
        fn subscribe_default_network(
            &self,
            _sink: Arc<dyn NetworkEventSink>,
        ) -> Result<SubscriptionId, ConnectivityError> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        fn unsubscribe(&self, _subscription: SubscriptionId) {}

        fn active_default_network(&self) -> Option<NetworkId> {
            None
        }

        fn link_name(&self, _network: NetworkId) -> Option<String> {
            None
        }

        fn capabilities(&self, _network: NetworkId) -> Option<NetworkCapabilities> {
            None
        }

        fn interface_index(&self, _name: &str) -> Option<i32> {
            None
        }
    }

    #[derive(Default)]
    pub struct FakeWifi;

    impl WifiQuery for FakeWifi {
        fn permission_granted(&self) -> bool {
            false
        }

        fn connection_info(&self) -> Option<WifiConnection> {
            None
        }
    }

    #[derive(Default)]
    pub struct FakeTrust;

    impl TrustStore for FakeTrust {
        fn certificates_der(&self) -> Result<Vec<Vec<u8>>, TrustStoreError> {
            Ok(Vec::new())
        }
    }

    pub struct FakePackages {
        pub own: String,
        pub uids: HashMap<String, u32>,
    }

    impl Default for FakePackages {
        fn default() -> Self {
            Self {
                own: "app.tungate".into(),
                uids: HashMap::from([("com.example.browser".to_owned(), 10_143)]),
            }
        }
    }

    impl PackageRegistry for FakePackages {
        fn packages_for_uid(&self, uid: u32) -> Vec<String> {
            self.uids
                .iter()
                .filter(|(_, v)| **v == uid)
                .map(|(k, _)| k.clone())
                .collect()
        }

        fn uid_for_package(&self, package: &str) -> Option<u32> {
            self.uids.get(package).copied()
        }

        fn own_package(&self) -> String {
            self.own.clone()
        }
    }

    pub struct FakeTun {
        pub granted: AtomicBool,
        pub proxy_supported: bool,
        pub fail_establish: AtomicBool,
        pub next_fd: AtomicI32,
        pub open_devices: Arc<AtomicI32>,
    }

    impl Default for FakeTun {
        fn default() -> Self {
            Self {
                granted: AtomicBool::new(true),
                proxy_supported: true,
                fail_establish: AtomicBool::new(false),
                next_fd: AtomicI32::new(10),
                open_devices: Arc::new(AtomicI32::new(0)),
            }
        }
    }

    struct FakeBuilder {
        fd: i32,
        fail: bool,
        open_devices: Arc<AtomicI32>,
    }

    impl InterfaceBuilder for FakeBuilder {
        fn set_session(&mut self, _label: &str) {}

        fn set_mtu(&mut self, _mtu: u32) {}

        fn add_address(&mut self, _address: &str, _prefix: u8) -> Result<(), DirectiveError> {
            Ok(())
        }

        fn add_route(&mut self, _network: &str, _prefix: u8) -> Result<(), DirectiveError> {
            Ok(())
        }

        fn add_dns_server(&mut self, _address: &str) -> Result<(), DirectiveError> {
            Ok(())
        }

        fn allow_package(&mut self, _package: &str) -> Result<(), DirectiveError> {
            Ok(())
        }

        fn disallow_package(&mut self, _package: &str) -> Result<(), DirectiveError> {
            Ok(())
        }

        fn set_http_proxy(
            &mut self,
            _server: &str,
            _port: u16,
            _bypass_domains: &[String],
        ) -> Result<(), DirectiveError> {
            Ok(())
        }

        fn establish(self: Box<Self>) -> Result<TunHandle, EstablishError> {
            if self.fail {
                return Err(EstablishError::EstablishFailed("device busy".into()));
            }
            self.open_devices.fetch_add(1, Ordering::SeqCst);
            let open_devices = self.open_devices.clone();
            Ok(TunHandle::new(self.fd, move |_| {
                open_devices.fetch_sub(1, Ordering::SeqCst);
            }))
        }
    }

    impl TunProvisioner for FakeTun {
        fn permission_granted(&self) -> bool {
            self.granted.load(Ordering::SeqCst)
        }

        fn supports_http_proxy(&self) -> bool {
            self.proxy_supported
        }

        fn builder(&self) -> Box<dyn InterfaceBuilder> {
            Box::new(FakeBuilder {
                fd: self.next_fd.fetch_add(1, Ordering::SeqCst),
                fail: self.fail_establish.load(Ordering::SeqCst),
                open_devices: self.open_devices.clone(),
            })
        }
    }

    #[derive(Default)]
    pub struct FakeAlerts;

    impl AlertSink for FakeAlerts {
        fn ensure_channel(&self, _channel_id: &str, _label: &str) {}

        fn post(&self, _notification: OsNotification) {}
    }

    #[derive(Default)]
    pub struct FakeHost {
        pub statuses: Mutex<Vec<String>>,
        pub cleared: AtomicBool,
        pub stop_requests: AtomicI32,
    }

    impl ServiceHost for FakeHost {
        fn update_status(&self, status: &str) {
            self.statuses.lock().unwrap().push(status.to_owned());
        }

        fn clear_status(&self) {
            self.cleared.store(true, Ordering::SeqCst);
        }

        fn request_stop(&self) {
            self.stop_requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub struct FakeWorld {
        pub platform: HostPlatform,
        pub tun: Arc<FakeTun>,
        pub host: Arc<FakeHost>,
    }

    pub fn fake_world() -> FakeWorld {
        let tun = Arc::new(FakeTun::default());
        let host = Arc::new(FakeHost::default());
        let platform = HostPlatform {
            links: Arc::new(FakeLinks::default()),
            connectivity: Arc::new(FakeConnectivity::default()),
            wifi: Arc::new(FakeWifi),
            trust: Arc::new(FakeTrust),
            packages: Arc::new(FakePackages::default()),
            tun: tun.clone(),
            alerts: Arc::new(FakeAlerts::default()),
            host: host.clone(),
        };
        FakeWorld { platform, tun, host }
    }
}
