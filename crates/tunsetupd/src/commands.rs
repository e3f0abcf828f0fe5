//! Host command builders for adapter configuration
//!
//! Each create command has an exact delete counterpart (`add` -> `delete`,
//! `set` -> `delete ... all`).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tunsetup_common::shell::{self, IPCONFIG_CMD, NETSH_CMD, ROUTE_CMD};
use tunsetup_common::{Family, SetupResult};

use crate::types::{
    family_of, netmask_from_prefix_len, PlatformCapabilities, VpnIpv4, LOOPBACK_INTERFACE_INDEX,
};

fn proto(family: Family) -> &'static str {
    match family {
        Family::Ipv4 => "ip",
        Family::Ipv6 => "ipv6",
    }
}

/// Build IPv4 address assignment command
pub fn build_set_ipv4_address_cmd(if_index: u32, local: &VpnIpv4) -> SetupResult<String> {
    let netmask = netmask_from_prefix_len(local.prefix_length)?;
    Ok(format!(
        "{} interface ip set address {} static {} {} gateway={} store=active",
        NETSH_CMD, if_index, local.address, netmask, local.gateway
    ))
}

/// Build IPv4 address deletion command
pub fn build_del_ipv4_address_cmd(if_index: u32, local: &VpnIpv4) -> String {
    format!(
        "{} interface ip delete address {} {} gateway=all store=active",
        NETSH_CMD, if_index, local.address
    )
}

/// Build IPv4 route command; `op` is `add` or `delete`
fn ipv4_route_cmd(op: &str, address: Ipv4Addr, prefix_length: u8, if_index: u32, next_hop: Ipv4Addr) -> String {
    format!(
        "{} interface ip {} route {}/{} {} {} store=active",
        NETSH_CMD, op, address, prefix_length, if_index, next_hop
    )
}

/// Build IPv4 route add command
pub fn build_add_ipv4_route_cmd(
    address: Ipv4Addr,
    prefix_length: u8,
    if_index: u32,
    next_hop: Ipv4Addr,
) -> String {
    ipv4_route_cmd("add", address, prefix_length, if_index, next_hop)
}

/// Build IPv4 route deletion command
pub fn build_del_ipv4_route_cmd(
    address: Ipv4Addr,
    prefix_length: u8,
    if_index: u32,
    next_hop: Ipv4Addr,
) -> String {
    ipv4_route_cmd("delete", address, prefix_length, if_index, next_hop)
}

/// Build IPv6 address assignment command
pub fn build_set_ipv6_address_cmd(if_index: u32, address: Ipv6Addr) -> String {
    format!(
        "{} interface ipv6 set address {} {} store=active",
        NETSH_CMD, if_index, address
    )
}

/// Build IPv6 address deletion command
pub fn build_del_ipv6_address_cmd(if_index: u32, address: Ipv6Addr) -> String {
    format!(
        "{} interface ipv6 delete address {} {} store=active",
        NETSH_CMD, if_index, address
    )
}

/// Build IPv6 route add command
///
/// `destination` is an `address/prefix` string.
pub fn build_add_ipv6_route_cmd(destination: &str, if_index: u32, next_hop: Ipv6Addr) -> String {
    format!(
        "{} interface ipv6 add route {} {} {} store=active",
        NETSH_CMD, destination, if_index, next_hop
    )
}

/// Build IPv6 route deletion command
pub fn build_del_ipv6_route_cmd(destination: &str, if_index: u32, next_hop: Ipv6Addr) -> String {
    format!(
        "{} interface ipv6 delete route {} {} {} store=active",
        NETSH_CMD, destination, if_index, next_hop
    )
}

/// Build IPv6 blackhole route command (routes the range to loopback)
pub fn build_add_ipv6_blackhole_cmd(range: &str) -> String {
    format!(
        "{} interface ipv6 add route {} interface={} store=active",
        NETSH_CMD, range, LOOPBACK_INTERFACE_INDEX
    )
}

/// Build IPv6 blackhole route deletion command
pub fn build_del_ipv6_blackhole_cmd(range: &str) -> String {
    format!(
        "{} interface ipv6 delete route {} interface={} store=active",
        NETSH_CMD, range, LOOPBACK_INTERFACE_INDEX
    )
}

/// DNS server command spelling, which differs between host generations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsSyntax {
    pub servers_cmd: &'static str,
    pub validate: &'static str,
}

impl DnsSyntax {
    pub fn for_platform(caps: &PlatformCapabilities) -> Self {
        if caps.legacy_dns_syntax {
            Self {
                servers_cmd: "dnsserver",
                validate: "",
            }
        } else {
            Self {
                servers_cmd: "dnsservers",
                validate: " validate=no",
            }
        }
    }
}

/// Build primary DNS server command
pub fn build_set_primary_dns_cmd(if_index: u32, address: IpAddr, syntax: DnsSyntax) -> String {
    format!(
        "{} interface {} set {} {} static {} register=primary{}",
        NETSH_CMD,
        proto(family_of(&address)),
        syntax.servers_cmd,
        if_index,
        address,
        syntax.validate
    )
}

/// Build secondary DNS server command; `position` is 1-based
pub fn build_add_dns_cmd(if_index: u32, address: IpAddr, position: usize, syntax: DnsSyntax) -> String {
    format!(
        "{} interface {} add {} {} {} {}{}",
        NETSH_CMD,
        proto(family_of(&address)),
        syntax.servers_cmd,
        if_index,
        address,
        position,
        syntax.validate
    )
}

/// Build command removing every DNS server of a family
pub fn build_del_all_dns_cmd(if_index: u32, family: Family, syntax: DnsSyntax) -> String {
    format!(
        "{} interface {} delete {} {} all{}",
        NETSH_CMD,
        proto(family),
        syntax.servers_cmd,
        if_index,
        syntax.validate
    )
}

/// Build primary WINS server command
pub fn build_set_primary_wins_cmd(if_index: u32, address: Ipv4Addr) -> String {
    format!(
        "{} interface ip set winsservers {} static {}",
        NETSH_CMD, if_index, address
    )
}

/// Build secondary WINS server command; `position` is 1-based
pub fn build_add_wins_cmd(if_index: u32, address: Ipv4Addr, position: usize) -> String {
    format!(
        "{} interface ip add winsservers {} {} {}",
        NETSH_CMD, if_index, address, position
    )
}

/// Build command removing every WINS server
pub fn build_del_all_wins_cmd(if_index: u32) -> String {
    format!("{} interface ip delete winsservers {} all", NETSH_CMD, if_index)
}

/// Build name-resolution cache flush command
pub fn build_flush_dns_cmd() -> String {
    format!("{} /flushdns", IPCONFIG_CMD)
}

/// Build legacy route table add command
pub fn build_legacy_route_add_cmd(
    address: Ipv4Addr,
    prefix_length: u8,
    gateway: Ipv4Addr,
) -> SetupResult<String> {
    let netmask = netmask_from_prefix_len(prefix_length)?;
    Ok(format!(
        "{} ADD {} MASK {} {}",
        ROUTE_CMD, address, netmask, gateway
    ))
}

/// Build legacy route table delete command
pub fn build_legacy_route_delete_cmd(
    address: Ipv4Addr,
    prefix_length: u8,
    gateway: Ipv4Addr,
) -> SetupResult<String> {
    let netmask = netmask_from_prefix_len(prefix_length)?;
    Ok(format!(
        "{} DELETE {} MASK {} {}",
        ROUTE_CMD, address, netmask, gateway
    ))
}

/// Build command switching the adapter to DHCP addressing
pub fn build_enable_dhcp_cmd(if_index: u32) -> String {
    format!("{} interface ip set address {} dhcp", NETSH_CMD, if_index)
}

/// Build ARP cache flush command for one interface
pub fn build_flush_arp_cmd(if_index: u32) -> String {
    format!("{} interface ip delete arpcache {}", NETSH_CMD, if_index)
}

/// Build DHCP lease release command
pub fn build_dhcp_release_cmd(adapter_name: &str) -> String {
    format!("{} /release {}", IPCONFIG_CMD, shell::quote_arg(adapter_name))
}

/// Build DHCP lease renew command
pub fn build_dhcp_renew_cmd(adapter_name: &str) -> String {
    format!("{} /renew {}", IPCONFIG_CMD, shell::quote_arg(adapter_name))
}

/// Build IPv4 interface status query
pub fn build_show_ipv4_config_cmd(if_index: u32) -> String {
    format!("{} interface ip show config name={}", NETSH_CMD, if_index)
}
