//! tungate-platform - Host OS Introspection & Seams
//!
//! Leaf crate of the tungate workspace. Defines the trait seams through
//! which everything else touches the operating system, plus the read-only
//! introspection adapters the tunneling engine queries at runtime:
//!
//! - interface enumeration with flags/MTU/address normalization
//! - Wi-Fi association lookup
//! - system trust-store export as PEM text
//! - the single-listener default-route monitor
//!
//! All adapters here are side-effect-free reads of OS state; lifecycle
//! mutation lives in `tungate-session`.

pub mod certs;
pub mod link;
pub mod monitor;
pub mod os;
pub mod wifi;

pub use certs::system_certificates;
pub use link::{enumerate_links, LinkInfo, DEFAULT_MTU};
pub use monitor::{DefaultRouteListener, DefaultRouteMonitor};
pub use os::{
    AlertSink, Connectivity, ConnectivityError, DirectiveError, EstablishError, InterfaceBuilder,
    LinkReadError, NetworkCapabilities, NetworkEvent, NetworkEventSink, NetworkId, NetworkLinks,
    OsNotification,
    PackageRegistry, PermissionBroker, RawAddress, RawLink, ServiceHost, SubscriptionId, TrustStore,
    TrustStoreError, TunHandle, TunProvisioner, WifiConnection, WifiQuery,
};
pub use wifi::{read_wifi_state, WifiState};
