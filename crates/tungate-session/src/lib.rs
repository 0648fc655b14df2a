//! tungate-session - Tunnel Session Lifecycle
//!
//! Drives an external packet-tunneling engine on top of the OS seams from
//! `tungate-platform`:
//!
//! ```text
//! ┌────────────┐  start/stop/status   ┌───────────────────┐
//! │ UI layer   │─────────────────────▶│ TunnelController   │
//! └────────────┘                      └─────────┬─────────┘
//!                                               │ queued commands
//!                                     ┌─────────▼─────────┐
//!                                     │ SessionSupervisor  │  lifecycle worker
//!                                     └─────────┬─────────┘
//!                         constructs            │ owns engine + tun handle
//!                                     ┌─────────▼─────────┐
//!                                     │ PlatformBridge     │◀── engine callbacks
//!                                     └───────────────────┘
//! ```
//!
//! The supervisor owns a single engine instance at a time; the bridge
//! answers its capability queries (interface enumeration, default-route
//! monitoring, Wi-Fi, certificates, package lookups, notifications) and
//! builds the virtual interface from the engine's declarative option set.

mod bridge;
mod control;
mod engine;
mod notify;
mod options;
mod session;

pub use bridge::{HostPlatform, PlatformBridge, TunSlot};
pub use control::{ControlError, TunnelController};
pub use engine::{EngineError, EngineFactory, EnginePlatform, QueryError, TunnelEngine};
pub use notify::{EngineAlert, NotificationBridge};
pub use options::{
    resolve_interface, Directive, DirectiveRecorder, HttpProxyOptions, IpPrefix, PackageOverrides,
    TunnelOptions, FALLBACK_DNS, VIRTUAL_DNS_PREFIX,
};
pub use session::{SessionState, SessionSupervisor};
