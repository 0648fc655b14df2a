//! UI control surface
//!
//! The command surface the controlling UI talks to: permission request with
//! single-slot concurrency, validated session start, stop, and the boolean
//! status query. Everything here acks immediately; the actual lifecycle work
//! runs on the supervisor's worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use tungate_platform::os::PermissionBroker;

use crate::options::PackageOverrides;
use crate::session::SessionSupervisor;

/// Control-surface errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlError {
    #[error("config payload required")]
    InvalidConfig,

    #[error("another permission request is in progress")]
    Busy,
}

/// UI-facing controller over one [`SessionSupervisor`].
pub struct TunnelController {
    supervisor: SessionSupervisor,
    permission: Arc<dyn PermissionBroker>,
    permission_pending: Arc<AtomicBool>,
}

impl TunnelController {
    pub fn new(supervisor: SessionSupervisor, permission: Arc<dyn PermissionBroker>) -> Self {
        Self {
            supervisor,
            permission,
            permission_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask for tunneling permission. `reply` fires exactly once with the
    /// outcome; an already granted permission replies true without a dialog.
    /// A second request while one is outstanding is rejected with
    /// [`ControlError::Busy`].
    pub fn request_permission(
        &self,
        reply: Box<dyn FnOnce(bool) + Send>,
    ) -> Result<(), ControlError> {
        if self.permission.granted() {
            reply(true);
            return Ok(());
        }
        if self
            .permission_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("permission request rejected: another one is in progress");
            return Err(ControlError::Busy);
        }

        let pending = self.permission_pending.clone();
        self.permission.request(Box::new(move |granted| {
            pending.store(false, Ordering::SeqCst);
            reply(granted);
        }));
        Ok(())
    }

    /// Start a session from a serialized option payload. A blank payload is
    /// rejected before any engine work begins.
    pub fn start_session(
        &self,
        config: &str,
        include_packages: Vec<String>,
        exclude_packages: Vec<String>,
    ) -> Result<(), ControlError> {
        if config.trim().is_empty() {
            return Err(ControlError::InvalidConfig);
        }
        self.supervisor.start(
            config.to_owned(),
            PackageOverrides::new(include_packages, exclude_packages),
        );
        Ok(())
    }

    pub fn stop_session(&self) {
        self.supervisor.stop();
    }

    /// Whether a session is currently running. Transient lifecycle states
    /// read as not running.
    pub fn status(&self) -> bool {
        self.supervisor.is_running()
    }

    #[cfg(test)]
    pub(crate) fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }
}
