//! Pulled configuration model, adapter identity and platform capabilities

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tunsetup_common::{Family, SetupError, SetupResult};

/// IPv6 next-hop recognized by the TAP driver
pub const IPV6_NEXT_HOP: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 8);

/// Interface index of the loopback interface, target of blackhole routes
pub const LOOPBACK_INTERFACE_INDEX: u32 = 1;

/// IPv6 ranges routed to loopback when IPv6 is blocked
pub const BLOCKED_IPV6_RANGES: [&str; 3] = ["2000::/4", "3000::/4", "fc00::/7"];

/// IPv4 halves used instead of a single default route
pub const IPV4_SPLIT_DEFAULT: [(Ipv4Addr, u8); 2] = [
    (Ipv4Addr::new(0, 0, 0, 0), 1),
    (Ipv4Addr::new(128, 0, 0, 0), 1),
];

/// IPv6 halves used instead of a single default route
pub const IPV6_SPLIT_DEFAULT: [&str; 2] = ["0::/1", "8000::/1"];

/// Computes the IPv4 netmask for a prefix length.
pub fn netmask_from_prefix_len(prefix_length: u8) -> SetupResult<Ipv4Addr> {
    if prefix_length > 32 {
        return Err(SetupError::invalid_config(
            "prefix_length",
            format!("IPv4 prefix length {} out of range", prefix_length),
        ));
    }
    let bits = u32::MAX
        .checked_shl(32 - u32::from(prefix_length))
        .unwrap_or(0);
    Ok(Ipv4Addr::from(bits))
}

/// Returns the family of an address.
pub fn family_of(address: &IpAddr) -> Family {
    match address {
        IpAddr::V4(_) => Family::Ipv4,
        IpAddr::V6(_) => Family::Ipv6,
    }
}

/// Tunnel IPv4 interface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnIpv4 {
    pub address: Ipv4Addr,
    pub prefix_length: u8,
    pub gateway: Ipv4Addr,
    /// Point-to-point (net30) topology instead of subnet
    #[serde(default)]
    pub net30: bool,
}

/// Tunnel IPv6 interface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnIpv6 {
    pub address: Ipv6Addr,
    pub prefix_length: u8,
    pub gateway: Ipv6Addr,
}

/// A pushed or excluded route; the family follows the address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub address: IpAddr,
    pub prefix_length: u8,
}

impl Route {
    pub fn new(address: IpAddr, prefix_length: u8) -> Self {
        Self {
            address,
            prefix_length,
        }
    }

    pub fn family(&self) -> Family {
        family_of(&self.address)
    }

    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_length)
    }
}

/// Per-family full-tunnel redirection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerouteGateway {
    #[serde(default)]
    pub ipv4: bool,
    #[serde(default)]
    pub ipv6: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsServer {
    pub address: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDomain {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinsServer {
    pub address: Ipv4Addr,
}

/// The VPN server's own address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAddress {
    pub address: IpAddr,
}

/// VPN configuration negotiated with the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulledConfig {
    #[serde(default)]
    pub ipv4: Option<VpnIpv4>,
    #[serde(default)]
    pub ipv6: Option<VpnIpv6>,
    #[serde(default)]
    pub add_routes: Vec<Route>,
    #[serde(default)]
    pub exclude_routes: Vec<Route>,
    #[serde(default)]
    pub reroute_gw: RerouteGateway,
    #[serde(default)]
    pub block_ipv6: bool,
    #[serde(default)]
    pub dns_servers: Vec<DnsServer>,
    #[serde(default)]
    pub search_domains: Vec<SearchDomain>,
    #[serde(default)]
    pub wins_servers: Vec<WinsServer>,
    pub remote_address: RemoteAddress,
}

impl PulledConfig {
    /// Creates an empty configuration for a server address.
    pub fn new(remote: IpAddr) -> Self {
        Self {
            ipv4: None,
            ipv6: None,
            add_routes: Vec::new(),
            exclude_routes: Vec::new(),
            reroute_gw: RerouteGateway::default(),
            block_ipv6: false,
            dns_servers: Vec::new(),
            search_domains: Vec::new(),
            wins_servers: Vec::new(),
            remote_address: RemoteAddress { address: remote },
        }
    }

    /// Rejects prefix lengths that do not fit their family.
    pub fn validate(&self) -> SetupResult<()> {
        if let Some(v4) = &self.ipv4 {
            check_prefix("ipv4.prefix_length", Family::Ipv4, v4.prefix_length)?;
        }
        if let Some(v6) = &self.ipv6 {
            check_prefix("ipv6.prefix_length", Family::Ipv6, v6.prefix_length)?;
        }
        for route in &self.add_routes {
            check_prefix("add_routes", route.family(), route.prefix_length)?;
        }
        for route in &self.exclude_routes {
            check_prefix("exclude_routes", route.family(), route.prefix_length)?;
        }
        Ok(())
    }
}

fn check_prefix(field: &str, family: Family, prefix_length: u8) -> SetupResult<()> {
    let max = match family {
        Family::Ipv4 => 32,
        Family::Ipv6 => 128,
    };
    if prefix_length > max {
        return Err(SetupError::invalid_config(
            field,
            format!("{} prefix length {} exceeds {}", family, prefix_length, max),
        ));
    }
    Ok(())
}

/// IPv4 addressing scheme programmed into the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Net30,
    Subnet,
}

/// Topology endpoints the driver needs before the address is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyRequest {
    pub topology: Topology,
    pub local: Ipv4Addr,
    pub prefix_length: u8,
}

impl fmt::Display for TopologyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.topology {
            Topology::Net30 => "net30",
            Topology::Subnet => "subnet",
        };
        write!(f, "{} {}/{}", name, self.local, self.prefix_length)
    }
}

/// Identity of an opened tunnel adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterIdentity {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub guid: String,
}

impl fmt::Display for AdapterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] index={}", self.name, self.guid, self.index)
    }
}

/// The host's default IPv4 gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultGateway {
    pub interface_index: u32,
    pub address: Ipv4Addr,
}

/// Executable that leak-protection filters exempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity(PathBuf);

impl AppIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Host features that select between configuration strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    /// Per-suffix DNS routing table (NRPT)
    pub dns_policy_table: bool,
    /// Interface-scoped DNS filtering
    pub leak_protection: bool,
    /// `dnsserver` command spelling without `validate=`
    pub legacy_dns_syntax: bool,
    /// DHCP masquerade, `route.exe` and readiness polling; no IPv6
    pub legacy_adapter_setup: bool,
}

impl PlatformCapabilities {
    /// Capabilities of a current host.
    pub fn current() -> Self {
        Self {
            dns_policy_table: true,
            leak_protection: true,
            legacy_dns_syntax: false,
            legacy_adapter_setup: false,
        }
    }

    /// Derives capabilities from the host OS version number.
    pub fn from_os_version(major: u32, minor: u32) -> Self {
        let version = (major, minor);
        Self {
            dns_policy_table: version >= (6, 2),
            leak_protection: version >= (6, 2),
            legacy_dns_syntax: version == (6, 0),
            legacy_adapter_setup: version < (6, 0),
        }
    }
}

/// Bounds of the legacy readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyTiming {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
}

impl Default for LegacyTiming {
    fn default() -> Self {
        Self {
            poll_attempts: 30,
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
        }
    }
}
