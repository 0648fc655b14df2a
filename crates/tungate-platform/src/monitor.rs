//! Default-route monitor
//!
//! Watches the OS default network and reports (interface name, index, is_up,
//! is_metered) tuples to a single registered listener. Registration is a
//! single slot: a second `start` replaces the previous listener, and `stop`
//! with anything but the registered listener is a no-op.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::os::{Connectivity, NetworkEvent, NetworkEventSink, NetworkId, SubscriptionId};

/// Receiver for default-interface updates, implemented by the engine side.
pub trait DefaultRouteListener: Send + Sync {
    fn update_default_interface(&self, name: &str, index: i32, is_up: bool, is_metered: bool);
}

#[derive(Default)]
struct Slot {
    listener: Option<Arc<dyn DefaultRouteListener>>,
    subscription: Option<SubscriptionId>,
}

/// Single-listener default-route monitor over the OS connectivity seam.
pub struct DefaultRouteMonitor {
    connectivity: Arc<dyn Connectivity>,
    slot: Mutex<Slot>,
}

impl DefaultRouteMonitor {
    pub fn new(connectivity: Arc<dyn Connectivity>) -> Self {
        Self {
            connectivity,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Register `listener`, subscribe to OS default-network changes, and
    /// immediately deliver one update for the currently active network.
    ///
    /// A subscription failure is reported to the listener as an
    /// unknown/down/metered tuple instead of propagating.
    pub fn start(self: &Arc<Self>, listener: Arc<dyn DefaultRouteListener>) {
        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.listener = Some(listener.clone());
            slot.subscription.take()
        };
        if let Some(subscription) = previous {
            self.connectivity.unsubscribe(subscription);
        }

        match self
            .connectivity
            .subscribe_default_network(self.clone() as Arc<dyn NetworkEventSink>)
        {
            Ok(subscription) => {
                let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
                slot.subscription = Some(subscription);
                drop(slot);
                self.notify(listener.as_ref(), self.connectivity.active_default_network());
            }
            Err(err) => {
                warn!("unable to monitor default network: {err}");
                listener.update_default_interface("", -1, false, true);
            }
        }
    }

    /// Unsubscribe and clear the slot, but only when `listener` is the one
    /// currently registered.
    pub fn stop(&self, listener: &Arc<dyn DefaultRouteListener>) {
        let subscription = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match &slot.listener {
                Some(current) if Arc::ptr_eq(current, listener) => {
                    slot.listener = None;
                    slot.subscription.take()
                }
                _ => return,
            }
        };
        if let Some(subscription) = subscription {
            self.connectivity.unsubscribe(subscription);
        }
    }

    /// Recompute the default-interface tuple for `network` and forward it.
    fn notify(&self, listener: &dyn DefaultRouteListener, network: Option<NetworkId>) {
        let name = network
            .and_then(|n| self.connectivity.link_name(n))
            .unwrap_or_default();
        let index = if name.is_empty() {
            -1
        } else {
            self.connectivity.interface_index(&name).unwrap_or(-1)
        };
        let capabilities = network.and_then(|n| self.connectivity.capabilities(n));
        let is_up = capabilities.map(|c| c.internet).unwrap_or(false);
        let is_metered = !capabilities.map(|c| c.not_metered).unwrap_or(false);

        debug!(name = %name, index, is_up, is_metered, "default interface update");
        listener.update_default_interface(&name, index, is_up, is_metered);
    }

    fn current_listener(&self) -> Option<Arc<dyn DefaultRouteListener>> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listener
            .clone()
    }
}

impl NetworkEventSink for DefaultRouteMonitor {
    fn network_event(&self, event: NetworkEvent) {
        let Some(listener) = self.current_listener() else {
            return;
        };
        let network = match event {
            NetworkEvent::Available(n)
            | NetworkEvent::LinkChanged(n)
            | NetworkEvent::CapabilitiesChanged(n) => Some(n),
            NetworkEvent::Lost => None,
        };
        self.notify(listener.as_ref(), network);
    }
}
