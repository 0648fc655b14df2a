//! Interface enumeration
//!
//! Translates raw OS interface records into the engine's query contract:
//! name, index, MTU (with a default when unreadable), a flags bitmask, and
//! formatted address strings. Interfaces whose properties cannot be read are
//! skipped rather than failing the whole enumeration, and an empty host is
//! reported as an empty list, never an error.

use tracing::debug;

use crate::os::{NetworkLinks, RawLink};

/// MTU reported when the OS cannot read the real value.
pub const DEFAULT_MTU: u32 = 1500;

pub const IFF_UP: u32 = 0x1;
pub const IFF_BROADCAST: u32 = 0x2;
pub const IFF_LOOPBACK: u32 = 0x8;
pub const IFF_POINTTOPOINT: u32 = 0x10;
pub const IFF_MULTICAST: u32 = 0x1000;

/// One host interface in the engine's contract shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub index: i32,
    pub mtu: u32,
    pub flags: u32,
    /// Each entry is `address` or `address/prefix`, zone suffix stripped.
    pub addresses: Vec<String>,
}

/// Enumerate host interfaces through the given OS seam.
pub fn enumerate_links(links: &dyn NetworkLinks) -> Vec<LinkInfo> {
    links
        .links()
        .into_iter()
        .filter_map(|record| match record {
            Ok(raw) => Some(link_info(raw)),
            Err(err) => {
                debug!("skipping unreadable interface: {err}");
                None
            }
        })
        .collect()
}

fn link_info(raw: RawLink) -> LinkInfo {
    let flags = link_flags(&raw);
    let addresses = collect_addresses(&raw);
    LinkInfo {
        name: raw.name,
        index: raw.index,
        mtu: raw.mtu.unwrap_or(DEFAULT_MTU),
        flags,
        addresses,
    }
}

/// Flags bitmask from the interface properties. A property the OS could not
/// read counts as unset. BROADCAST is implied whenever the interface is
/// neither loopback nor point-to-point.
fn link_flags(raw: &RawLink) -> u32 {
    let mut flags = 0;
    if raw.up.unwrap_or(false) {
        flags |= IFF_UP;
    }
    if raw.loopback.unwrap_or(false) {
        flags |= IFF_LOOPBACK;
    }
    if raw.point_to_point.unwrap_or(false) {
        flags |= IFF_POINTTOPOINT;
    }
    if raw.multicast.unwrap_or(false) {
        flags |= IFF_MULTICAST;
    }
    if flags & IFF_POINTTOPOINT == 0 && flags & IFF_LOOPBACK == 0 {
        flags |= IFF_BROADCAST;
    }
    flags
}

/// Format the interface's address list. Prefixed addresses win; when none
/// are exposed the bare address list is used. A prefix outside 0..=128 is
/// dropped from the entry, not the entry itself.
fn collect_addresses(raw: &RawLink) -> Vec<String> {
    if !raw.addresses.is_empty() {
        return raw
            .addresses
            .iter()
            .map(|addr| {
                let host = strip_zone(&addr.host);
                match addr.prefix {
                    Some(prefix) if prefix <= 128 => format!("{host}/{prefix}"),
                    _ => host.to_owned(),
                }
            })
            .collect();
    }
    raw.plain_addresses
        .iter()
        .map(|host| strip_zone(host).to_owned())
        .collect()
}

/// Drop a link-local `%zone` suffix.
fn strip_zone(host: &str) -> &str {
    host.split('%').next().unwrap_or(host)
}
