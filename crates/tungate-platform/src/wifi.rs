//! Wi-Fi state query
//!
//! Reports the current SSID/BSSID only when the guarding permission is
//! granted and the OS reports a real association. Placeholder SSIDs and
//! permission misses both read as "unknown"; this query never fails.

use crate::os::WifiQuery;

/// SSID the OS substitutes when the real one is unavailable.
const PLACEHOLDER_SSID: &str = "<unknown ssid>";

/// Current Wi-Fi association in the engine's contract shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiState {
    pub ssid: String,
    pub bssid: String,
}

/// Read the current Wi-Fi state, `None` when unknown.
pub fn read_wifi_state(wifi: &dyn WifiQuery) -> Option<WifiState> {
    if !wifi.permission_granted() {
        return None;
    }
    let info = wifi.connection_info()?;
    if info.ssid.is_empty() || info.ssid == PLACEHOLDER_SSID {
        return None;
    }
    Some(WifiState {
        ssid: info.ssid.trim_matches('"').to_owned(),
        bssid: info.bssid.unwrap_or_default(),
    })
}
