//! Engine contract
//!
//! The tunneling engine is an opaque external runtime: this crate constructs
//! it from a serialized option payload plus a capability bridge, starts it,
//! and later closes it. [`EnginePlatform`] is the fixed set of queries the
//! engine issues back into the platform during its run.

use std::sync::Arc;

use tungate_platform::link::LinkInfo;
use tungate_platform::monitor::DefaultRouteListener;
use tungate_platform::os::EstablishError;
use tungate_platform::wifi::WifiState;

use crate::notify::EngineAlert;
use crate::options::TunnelOptions;

/// Engine lifecycle failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine rejected configuration: {0}")]
    InvalidConfiguration(String),

    #[error("engine failed to start: {0}")]
    StartFailed(String),

    #[error("engine failed to shut down: {0}")]
    CloseFailed(String),
}

/// Failures answering an engine capability query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    Unsupported(&'static str),
}

/// A live engine instance. `start` and `close` are each invoked at most
/// once per instance.
pub trait TunnelEngine: Send {
    fn start(&mut self) -> Result<(), EngineError>;

    fn close(&mut self) -> Result<(), EngineError>;
}

/// Constructs engine instances from a serialized option payload and the
/// capability bridge the instance will call back into.
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        config: &str,
        platform: Arc<dyn EnginePlatform>,
    ) -> Result<Box<dyn TunnelEngine>, EngineError>;
}

/// Capability surface the engine queries during its run.
///
/// All query methods are side-effect-free reads of OS/process state and may
/// be called from any engine thread, concurrently with the lifecycle worker.
pub trait EnginePlatform: Send + Sync {
    /// All host network interfaces; empty when none are available.
    fn enumerate_interfaces(&self) -> Vec<LinkInfo>;

    fn start_default_route_monitor(&self, listener: Arc<dyn DefaultRouteListener>);

    fn stop_default_route_monitor(&self, listener: &Arc<dyn DefaultRouteListener>);

    /// Current Wi-Fi association, `None` when unknown.
    fn read_wifi_state(&self) -> Option<WifiState>;

    /// PEM text of every system-trusted certificate.
    fn system_trusted_certificates(&self) -> Vec<String>;

    fn package_name_for_uid(&self, uid: u32) -> Result<String, QueryError>;

    fn uid_for_package_name(&self, package: &str) -> Result<u32, QueryError>;

    /// Map a connection 5-tuple to the owning app. Always answers
    /// [`QueryError::Unsupported`].
    fn find_connection_owner(
        &self,
        ip_protocol: i32,
        source_address: &str,
        source_port: u16,
        destination_address: &str,
        destination_port: u16,
    ) -> Result<u32, QueryError>;

    /// Fire-and-forget engine log line.
    fn write_log(&self, message: &str);

    /// Surface an engine alert as a user notification. Never blocks.
    fn post_notification(&self, alert: EngineAlert);

    /// Build the virtual interface for `options` and return its descriptor.
    /// The platform retains ownership of the device handle.
    fn establish_interface(&self, options: &TunnelOptions) -> Result<i32, EstablishError>;
}
