//! Tunnel options & interface resolution
//!
//! [`TunnelOptions`] is the declarative option set the engine supplies when
//! it asks for a virtual interface. [`resolve_interface`] translates it,
//! together with the caller's manual package overrides, into an ordered
//! sequence of interface-construction directives against an
//! [`InterfaceBuilder`], applying the precedence rules:
//!
//! - explicit routes win over the auto default route, per address family
//! - a configured DNS server inside the virtual TUN subnet counts as unset
//! - a non-empty merged include set switches package filtering to allow-list
//!   mode and suppresses every disallow directive
//! - deny-list mode always excludes the controlling app itself
//!
//! Per-directive rejections are logged and skipped; they never abort the
//! interface as a whole.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tungate_platform::os::{DirectiveError, EstablishError, InterfaceBuilder, TunHandle};

/// Fallback DNS servers applied, in order, when no usable server is
/// configured and auto-route is on.
pub const FALLBACK_DNS: [&str; 4] = ["1.1.1.1", "1.0.0.1", "8.8.8.8", "8.8.4.4"];

/// Addresses under this prefix are virtual tunnel-internal DNS endpoints,
/// meaningless to the OS resolver.
pub const VIRTUAL_DNS_PREFIX: &str = "172.19.0.";

/// An address or network with its prefix length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPrefix {
    pub address: String,
    pub prefix: u8,
}

impl IpPrefix {
    pub fn new(address: impl Into<String>, prefix: u8) -> Self {
        Self {
            address: address.into(),
            prefix,
        }
    }
}

/// HTTP proxy block of the option set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxyOptions {
    pub enabled: bool,
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub bypass_domains: Vec<String>,
}

/// Declarative tunnel option set, immutable for the life of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelOptions {
    pub mtu: u32,
    pub inet4_addresses: Vec<IpPrefix>,
    pub inet6_addresses: Vec<IpPrefix>,
    pub inet4_routes: Vec<IpPrefix>,
    pub inet6_routes: Vec<IpPrefix>,
    pub auto_route: bool,
    /// Configured DNS server. A value inside [`VIRTUAL_DNS_PREFIX`] means
    /// "unset, use fallback".
    pub dns_server: Option<String>,
    pub include_packages: Vec<String>,
    pub exclude_packages: Vec<String>,
    pub http_proxy: Option<HttpProxyOptions>,
}

/// Include/exclude package sets supplied by the caller alongside the
/// options, merged by union before the interface is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageOverrides {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PackageOverrides {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }
}

/// Drive `builder` with the directives resolved from `options` and
/// `overrides`. `own_package` is the controlling application's package,
/// `http_proxy_supported` whether the OS can apply a proxy to the interface.
pub fn resolve_interface(
    builder: &mut dyn InterfaceBuilder,
    options: &TunnelOptions,
    overrides: &PackageOverrides,
    own_package: &str,
    http_proxy_supported: bool,
) {
    builder.set_mtu(options.mtu);

    let has_inet4 = apply_addresses(builder, &options.inet4_addresses);
    let has_inet6 = apply_addresses(builder, &options.inet6_addresses);

    apply_dns_servers(builder, options);
    apply_family_routes(builder, &options.inet4_routes, options.auto_route, has_inet4, "0.0.0.0");
    apply_family_routes(builder, &options.inet6_routes, options.auto_route, has_inet6, "::");
    apply_package_rules(builder, options, overrides, own_package);
    apply_http_proxy(builder, options, http_proxy_supported);
}

/// Returns whether at least one address of the family was added.
fn apply_addresses(builder: &mut dyn InterfaceBuilder, addresses: &[IpPrefix]) -> bool {
    let mut added = false;
    for addr in addresses {
        match builder.add_address(&addr.address, addr.prefix) {
            Ok(()) => added = true,
            Err(err) => warn!("unable to add address {}/{}: {err}", addr.address, addr.prefix),
        }
    }
    added
}

fn apply_dns_servers(builder: &mut dyn InterfaceBuilder, options: &TunnelOptions) {
    let configured = options
        .dns_server
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let is_virtual = configured.is_some_and(|s| s.starts_with(VIRTUAL_DNS_PREFIX));

    let mut added_any = false;
    if let Some(server) = configured {
        if !is_virtual {
            match builder.add_dns_server(server) {
                Ok(()) => added_any = true,
                Err(err) => warn!("unable to apply DNS server {server}: {err}"),
            }
        } else {
            debug!("ignoring virtual DNS {server}, using fallback servers");
        }
    }

    if added_any || !options.auto_route {
        return;
    }

    for server in FALLBACK_DNS {
        match builder.add_dns_server(server) {
            Ok(()) => added_any = true,
            Err(err) => warn!("unable to apply fallback DNS {server}: {err}"),
        }
    }
    if !added_any {
        warn!("tunnel started without any DNS servers; name resolution will likely fail");
    }
}

/// Explicit routes win; otherwise the family gets its default route only
/// when auto-route is set and the family has an address.
fn apply_family_routes(
    builder: &mut dyn InterfaceBuilder,
    routes: &[IpPrefix],
    auto_route: bool,
    has_address: bool,
    default_network: &str,
) {
    let mut added = false;
    for route in routes {
        match builder.add_route(&route.address, route.prefix) {
            Ok(()) => added = true,
            Err(err) => warn!("unable to add route {}/{}: {err}", route.address, route.prefix),
        }
    }
    if !added && auto_route && has_address {
        if let Err(err) = builder.add_route(default_network, 0) {
            warn!("unable to add default route {default_network}/0: {err}");
        }
    }
}

fn apply_package_rules(
    builder: &mut dyn InterfaceBuilder,
    options: &TunnelOptions,
    overrides: &PackageOverrides,
    own_package: &str,
) {
    let include = merge_packages(&options.include_packages, &overrides.include);
    let exclude = merge_packages(&options.exclude_packages, &overrides.exclude);

    if !include.is_empty() {
        // Allow-list mode: exclude entries are ignored entirely.
        for package in &include {
            if let Err(err) = builder.allow_package(package) {
                warn!("failed to allow package {package}: {err}");
            }
        }
        return;
    }

    for package in &exclude {
        if let Err(err) = builder.disallow_package(package) {
            warn!("failed to disallow package {package}: {err}");
        }
    }

    // Keep the tunnel from tunneling its own traffic.
    if !exclude.iter().any(|p| p == own_package) {
        if let Err(err) = builder.disallow_package(own_package) {
            warn!("unable to exclude own package {own_package}: {err}");
        }
    }
}

/// Union preserving first-seen order.
fn merge_packages(from_options: &[String], from_overrides: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(from_options.len() + from_overrides.len());
    for package in from_options.iter().chain(from_overrides) {
        if !merged.contains(package) {
            merged.push(package.clone());
        }
    }
    merged
}

fn apply_http_proxy(
    builder: &mut dyn InterfaceBuilder,
    options: &TunnelOptions,
    supported: bool,
) {
    let Some(proxy) = &options.http_proxy else {
        return;
    };
    if !proxy.enabled || !supported {
        return;
    }
    if let Err(err) = builder.set_http_proxy(&proxy.server, proxy.port, &proxy.bypass_domains) {
        warn!("unable to apply HTTP proxy {}:{}: {err}", proxy.server, proxy.port);
    }
}

/// One recorded interface-construction directive, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Mtu(u32),
    Address { address: String, prefix: u8 },
    Route { network: String, prefix: u8 },
    DnsServer(String),
    AllowPackage(String),
    DisallowPackage(String),
    HttpProxy {
        server: String,
        port: u16,
        bypass_domains: Vec<String>,
    },
}

/// An [`InterfaceBuilder`] that records the directive sequence instead of
/// talking to the OS. Useful for previewing a configuration and as the
/// backbone of resolver tests.
#[derive(Debug, Default)]
pub struct DirectiveRecorder {
    session: Option<String>,
    directives: Vec<Directive>,
}

impl DirectiveRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn into_directives(self) -> Vec<Directive> {
        self.directives
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

impl InterfaceBuilder for DirectiveRecorder {
    fn set_session(&mut self, label: &str) {
        self.session = Some(label.to_owned());
    }

    fn set_mtu(&mut self, mtu: u32) {
        self.directives.push(Directive::Mtu(mtu));
    }

    fn add_address(&mut self, address: &str, prefix: u8) -> Result<(), DirectiveError> {
        self.directives.push(Directive::Address {
            address: address.to_owned(),
            prefix,
        });
        Ok(())
    }

    fn add_route(&mut self, network: &str, prefix: u8) -> Result<(), DirectiveError> {
        self.directives.push(Directive::Route {
            network: network.to_owned(),
            prefix,
        });
        Ok(())
    }

    fn add_dns_server(&mut self, address: &str) -> Result<(), DirectiveError> {
        self.directives.push(Directive::DnsServer(address.to_owned()));
        Ok(())
    }

    fn allow_package(&mut self, package: &str) -> Result<(), DirectiveError> {
        self.directives.push(Directive::AllowPackage(package.to_owned()));
        Ok(())
    }

    fn disallow_package(&mut self, package: &str) -> Result<(), DirectiveError> {
        self.directives
            .push(Directive::DisallowPackage(package.to_owned()));
        Ok(())
    }

    fn set_http_proxy(
        &mut self,
        server: &str,
        port: u16,
        bypass_domains: &[String],
    ) -> Result<(), DirectiveError> {
        self.directives.push(Directive::HttpProxy {
            server: server.to_owned(),
            port,
            bypass_domains: bypass_domains.to_vec(),
        });
        Ok(())
    }

    fn establish(self: Box<Self>) -> Result<TunHandle, EstablishError> {
        Err(EstablishError::EstablishFailed(
            "directive recorder cannot open a device".into(),
        ))
    }
}
