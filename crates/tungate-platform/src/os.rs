//! Host OS seams
//!
//! The engine bridge never talks to the operating system directly; it goes
//! through the small trait set defined here. Production code implements these
//! over the platform APIs (connectivity manager, package manager, TUN
//! builder, notification manager), tests implement them in memory.

use std::sync::Arc;

use tracing::debug;

/// Opaque identifier for a host network, as handed out by the OS
/// connectivity layer.
pub type NetworkId = u64;

/// Identifier for an active default-network subscription.
pub type SubscriptionId = u64;

/// Raw, unvalidated view of one host network interface.
///
/// Fields the OS could not read are `None`; the introspection adapter
/// applies defaults. Addresses are raw host strings and may still carry a
/// `%zone` suffix.
#[derive(Debug, Clone, Default)]
pub struct RawLink {
    pub name: String,
    pub index: i32,
    pub mtu: Option<u32>,
    pub up: Option<bool>,
    pub loopback: Option<bool>,
    pub point_to_point: Option<bool>,
    pub multicast: Option<bool>,
    /// Addresses with a known prefix length.
    pub addresses: Vec<RawAddress>,
    /// Fallback address list used when no prefixed addresses are exposed.
    pub plain_addresses: Vec<String>,
}

/// One interface address with an optional prefix length.
#[derive(Debug, Clone)]
pub struct RawAddress {
    pub host: String,
    pub prefix: Option<u8>,
}

/// Error reading a single interface's properties. The enumeration adapter
/// skips the interface and keeps going.
#[derive(Debug, Clone, thiserror::Error)]
#[error("interface unreadable: {0}")]
pub struct LinkReadError(pub String);

/// Host network interface enumeration.
pub trait NetworkLinks: Send + Sync {
    /// List every interface the OS knows about. Individual entries may be
    /// `Err` when their properties could not be read.
    fn links(&self) -> Vec<Result<RawLink, LinkReadError>>;
}

/// Capability bits of a host network, reduced to what the default-route
/// monitor needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkCapabilities {
    /// The network provides internet reachability.
    pub internet: bool,
    /// The OS explicitly flags the network as not metered.
    pub not_metered: bool,
}

/// Default-network change events, as delivered by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Available(NetworkId),
    Lost,
    LinkChanged(NetworkId),
    CapabilitiesChanged(NetworkId),
}

/// Receiver for [`NetworkEvent`]s. Delivery happens on whatever thread the
/// OS uses for connectivity callbacks.
pub trait NetworkEventSink: Send + Sync {
    fn network_event(&self, event: NetworkEvent);
}

/// Failure to subscribe to default-network changes.
#[derive(Debug, Clone, thiserror::Error)]
#[error("connectivity subscription failed: {0}")]
pub struct ConnectivityError(pub String);

/// OS connectivity layer: the active default network and change
/// notifications for it.
pub trait Connectivity: Send + Sync {
    fn subscribe_default_network(
        &self,
        sink: Arc<dyn NetworkEventSink>,
    ) -> Result<SubscriptionId, ConnectivityError>;

    fn unsubscribe(&self, subscription: SubscriptionId);

    fn active_default_network(&self) -> Option<NetworkId>;

    /// Interface name backing the network, if it has one.
    fn link_name(&self, network: NetworkId) -> Option<String>;

    fn capabilities(&self, network: NetworkId) -> Option<NetworkCapabilities>;

    /// OS index of a named interface.
    fn interface_index(&self, name: &str) -> Option<i32>;
}

/// Current Wi-Fi association as reported by the OS, prior to any filtering.
#[derive(Debug, Clone)]
pub struct WifiConnection {
    pub ssid: String,
    pub bssid: Option<String>,
}

/// Wi-Fi state access.
pub trait WifiQuery: Send + Sync {
    /// Whether the permission guarding Wi-Fi state is currently granted.
    fn permission_granted(&self) -> bool;

    /// Current association, `None` when disconnected or unreadable.
    fn connection_info(&self) -> Option<WifiConnection>;
}

/// Failure reading the system trust store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("trust store unavailable: {0}")]
pub struct TrustStoreError(pub String);

/// System certificate store.
pub trait TrustStore: Send + Sync {
    /// DER bytes of every trusted certificate.
    fn certificates_der(&self) -> Result<Vec<Vec<u8>>, TrustStoreError>;
}

/// Installed-package registry.
pub trait PackageRegistry: Send + Sync {
    /// Packages sharing the given numeric app identity, empty on a miss.
    fn packages_for_uid(&self, uid: u32) -> Vec<String>;

    fn uid_for_package(&self, package: &str) -> Option<u32>;

    /// Package name of the controlling application itself.
    fn own_package(&self) -> String;
}

/// A single rejected interface-construction directive. Callers log and skip.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct DirectiveError(pub String);

/// Errors establishing the virtual interface as a whole.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EstablishError {
    #[error("tunneling permission not granted")]
    PermissionDenied,

    #[error("failed to establish virtual interface: {0}")]
    EstablishFailed(String),
}

/// Incremental virtual-interface construction. Directive order is
/// significant; per-directive rejections must not poison the builder.
pub trait InterfaceBuilder: Send {
    fn set_session(&mut self, label: &str);

    fn set_mtu(&mut self, mtu: u32);

    fn add_address(&mut self, address: &str, prefix: u8) -> Result<(), DirectiveError>;

    fn add_route(&mut self, network: &str, prefix: u8) -> Result<(), DirectiveError>;

    fn add_dns_server(&mut self, address: &str) -> Result<(), DirectiveError>;

    fn allow_package(&mut self, package: &str) -> Result<(), DirectiveError>;

    fn disallow_package(&mut self, package: &str) -> Result<(), DirectiveError>;

    fn set_http_proxy(
        &mut self,
        server: &str,
        port: u16,
        bypass_domains: &[String],
    ) -> Result<(), DirectiveError>;

    /// Hand the accumulated configuration to the OS and open the device.
    fn establish(self: Box<Self>) -> Result<TunHandle, EstablishError>;
}

/// Virtual-interface provisioning.
pub trait TunProvisioner: Send + Sync {
    /// Whether the user has granted (and not since revoked) tunneling
    /// permission.
    fn permission_granted(&self) -> bool;

    /// Whether this OS release can apply an HTTP proxy to the interface.
    fn supports_http_proxy(&self) -> bool;

    fn builder(&self) -> Box<dyn InterfaceBuilder>;
}

/// Permission dialog round trip, owned by the UI layer.
pub trait PermissionBroker: Send + Sync {
    fn granted(&self) -> bool;

    /// Ask the user. `on_result` fires exactly once, on an OS thread.
    fn request(&self, on_result: Box<dyn FnOnce(bool) + Send>);
}

/// A user notification ready for the OS to display.
#[derive(Debug, Clone)]
pub struct OsNotification {
    pub channel_id: String,
    pub notification_id: i32,
    pub title: String,
    pub body: String,
    /// When present, tapping the notification reopens the controlling UI
    /// with this URL as payload.
    pub deep_link: Option<String>,
}

/// OS notification surface. Both calls are fire-and-forget.
pub trait AlertSink: Send + Sync {
    /// Create the channel if it does not exist yet; a no-op otherwise.
    fn ensure_channel(&self, channel_id: &str, label: &str);

    /// Post the notification. A pending deep-link action with the same
    /// notification id is replaced.
    fn post(&self, notification: OsNotification);
}

/// Hosting service context: the foreground status surface and the ability to
/// ask the OS to tear the service down.
pub trait ServiceHost: Send + Sync {
    fn update_status(&self, status: &str);

    fn clear_status(&self);

    /// Ask the OS to stop the hosting service context.
    fn request_stop(&self);
}

/// Owned descriptor of an established TUN device.
///
/// Closed exactly once: on explicit [`close`](TunHandle::close), or on drop.
pub struct TunHandle {
    fd: i32,
    closer: Option<Box<dyn FnOnce(i32) + Send>>,
}

impl TunHandle {
    pub fn new(fd: i32, closer: impl FnOnce(i32) + Send + 'static) -> Self {
        Self {
            fd,
            closer: Some(Box::new(closer)),
        }
    }

    pub fn raw_fd(&self) -> i32 {
        self.fd
    }

    /// Release the descriptor. Idempotent.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            debug!(fd = self.fd, "closing tun device");
            closer(self.fd);
        }
    }
}

impl Drop for TunHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunHandle")
            .field("fd", &self.fd)
            .field("open", &self.closer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_tun_handle_closes_once() {
        let closes = Arc::new(AtomicU32::new(0));
        let counter = closes.clone();
        let mut handle = TunHandle::new(7, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(handle.raw_fd(), 7);
        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tun_handle_closes_on_drop() {
        let closes = Arc::new(AtomicU32::new(0));
        let counter = closes.clone();
        drop(TunHandle::new(3, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
