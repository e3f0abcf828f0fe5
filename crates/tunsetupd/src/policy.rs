//! Adapter configuration policy
//!
//! Translates a pulled VPN configuration into a create sequence and the
//! destroy sequence that reverses it. Rules are evaluated in a fixed order:
//! later rules reference state queued by earlier ones (an address must exist
//! before a route through it is added).
//!
//! One policy serves both host generations. The addressing, explicit route,
//! exclude route and redirect-gateway steps are shared; the legacy variant
//! swaps static addressing for a DHCP readiness wait, uses the `route` tool,
//! and leaves DNS and WINS to the driver's DHCP masquerade.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunsetup_common::{Family, SetupError, SetupResult};

use crate::action::{
    BestEffort, DeleteAllRoutesOnInterface, DnsLeakFilter, DnsPolicyCreate, DnsPolicyDelete,
    EnsureDhcp, HostCommand, Settle, WaitForAddress,
};
use crate::action_list::{ActionSequence, SequenceBuilder};
use crate::commands::{self, DnsSyntax};
use crate::host::HostServices;
use crate::types::{
    AdapterIdentity, AppIdentity, DefaultGateway, LegacyTiming, PlatformCapabilities,
    PulledConfig, Topology, TopologyRequest, VpnIpv4, BLOCKED_IPV6_RANGES, IPV4_SPLIT_DEFAULT,
    IPV6_NEXT_HOP, IPV6_SPLIT_DEFAULT,
};

/// A skipped part of the pulled configuration. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyWarning {
    /// Exclude routes were pushed but no default gateway is known
    ExcludeRoutesWithoutGateway,
    /// Exclude routes of the IPv6 family were skipped
    ExcludeIpv6Unsupported,
    /// Redirect-gateway cannot bypass an IPv6 server address
    ServerBypassIpv6 { server: IpAddr },
    /// The legacy host path ignores IPv6 settings
    LegacyIpv6Ignored,
}

impl fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyWarning::ExcludeRoutesWithoutGateway => {
                write!(f, "exclude routes error: cannot detect default gateway")
            }
            PolicyWarning::ExcludeIpv6Unsupported => {
                write!(f, "exclude IPv6 routes not currently supported")
            }
            PolicyWarning::ServerBypassIpv6 { server } => {
                write!(f, "redirect-gateway: no bypass route for IPv6 server {}", server)
            }
            PolicyWarning::LegacyIpv6Ignored => {
                write!(f, "IPv6 settings are not supported on this host and were ignored")
            }
        }
    }
}

/// Everything the policy decides for one session.
#[derive(Debug)]
pub struct AdapterPlan {
    pub create: ActionSequence,
    /// Unarmed
    pub destroy: ActionSequence,
    /// Endpoints to program on the device before `create` runs
    pub topology: Option<TopologyRequest>,
    pub warnings: Vec<PolicyWarning>,
}

/// Inputs for [`AdapterConfigPolicy::build`].
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub adapter: &'a AdapterIdentity,
    pub pulled: &'a PulledConfig,
    pub gateway: Option<DefaultGateway>,
    pub app: &'a AppIdentity,
}

/// Builds create/destroy sequences for a fixed set of host capabilities.
pub struct AdapterConfigPolicy {
    caps: PlatformCapabilities,
    timing: LegacyTiming,
    host: HostServices,
}

/// IPv4 route command family in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteTool {
    Netsh,
    Legacy,
}

struct Context<'a> {
    input: PolicyInput<'a>,
    if_index: u32,
    routes: RouteTool,
    builder: SequenceBuilder,
    warnings: Vec<PolicyWarning>,
}

impl AdapterConfigPolicy {
    pub fn new(caps: PlatformCapabilities, timing: LegacyTiming, host: HostServices) -> Self {
        Self { caps, timing, host }
    }

    pub fn capabilities(&self) -> &PlatformCapabilities {
        &self.caps
    }

    /// Builds the plan. Nothing on the host is touched.
    pub fn build(&self, input: PolicyInput<'_>, cancel: &CancellationToken) -> SetupResult<AdapterPlan> {
        input.pulled.validate()?;

        let legacy = self.caps.legacy_adapter_setup;
        let mut ctx = Context {
            input,
            if_index: input.adapter.index,
            routes: if legacy {
                RouteTool::Legacy
            } else {
                RouteTool::Netsh
            },
            builder: SequenceBuilder::new(),
            warnings: Vec::new(),
        };

        // Routes left over from an earlier session on this interface
        ctx.builder
            .add(DeleteAllRoutesOnInterface::new(self.host.network.clone(), ctx.if_index));

        if legacy {
            self.legacy_addressing(&mut ctx, cancel)?;
        } else {
            self.ipv4_address(&mut ctx)?;
            self.ipv6_block(&mut ctx);
            self.ipv6_address(&mut ctx);
        }
        self.add_routes(&mut ctx)?;
        self.exclude_routes(&mut ctx)?;
        self.redirect_ipv4(&mut ctx)?;
        if !legacy {
            self.redirect_ipv6(&mut ctx);
            self.dns(&mut ctx);
            self.wins(&mut ctx);
        }
        self.flush(&mut ctx);

        let topology = input.pulled.ipv4.as_ref().map(topology_request);
        let (create, destroy) = ctx.builder.build();
        info!(
            adapter_index = ctx.if_index,
            create = create.len(),
            destroy = destroy.len(),
            warnings = ctx.warnings.len(),
            legacy,
            "Adapter plan built"
        );
        Ok(AdapterPlan {
            create,
            destroy,
            topology,
            warnings: ctx.warnings,
        })
    }

    fn cmd(&self, command: String) -> HostCommand {
        HostCommand::new(self.host.runner.clone(), command)
    }

    fn paired(&self, ctx: &mut Context<'_>, create: String, destroy: String) {
        ctx.builder.add_reverted(self.cmd(create), self.cmd(destroy));
    }

    /// Queues an IPv4 route add/delete pair in the active route syntax.
    fn ipv4_route(
        &self,
        ctx: &mut Context<'_>,
        address: Ipv4Addr,
        prefix_length: u8,
        if_index: u32,
        next_hop: Ipv4Addr,
    ) -> SetupResult<()> {
        let (create, destroy) = match ctx.routes {
            RouteTool::Netsh => (
                commands::build_add_ipv4_route_cmd(address, prefix_length, if_index, next_hop),
                commands::build_del_ipv4_route_cmd(address, prefix_length, if_index, next_hop),
            ),
            RouteTool::Legacy => (
                commands::build_legacy_route_add_cmd(address, prefix_length, next_hop)?,
                commands::build_legacy_route_delete_cmd(address, prefix_length, next_hop)?,
            ),
        };
        self.paired(ctx, create, destroy);
        Ok(())
    }

    fn ipv6_route(&self, ctx: &mut Context<'_>, destination: &str) {
        let if_index = ctx.if_index;
        self.paired(
            ctx,
            commands::build_add_ipv6_route_cmd(destination, if_index, IPV6_NEXT_HOP),
            commands::build_del_ipv6_route_cmd(destination, if_index, IPV6_NEXT_HOP),
        );
    }

    fn ipv4_address(&self, ctx: &mut Context<'_>) -> SetupResult<()> {
        let pulled = ctx.input.pulled;
        if let Some(local4) = &pulled.ipv4 {
            let create = commands::build_set_ipv4_address_cmd(ctx.if_index, local4)?;
            let destroy = commands::build_del_ipv4_address_cmd(ctx.if_index, local4);
            self.paired(ctx, create, destroy);
        }
        Ok(())
    }

    fn ipv6_block(&self, ctx: &mut Context<'_>) {
        if !ctx.input.pulled.block_ipv6 {
            return;
        }
        for range in BLOCKED_IPV6_RANGES {
            self.paired(
                ctx,
                commands::build_add_ipv6_blackhole_cmd(range),
                commands::build_del_ipv6_blackhole_cmd(range),
            );
        }
    }

    fn ipv6_address(&self, ctx: &mut Context<'_>) {
        let pulled = ctx.input.pulled;
        let Some(local6) = pulled.ipv6.as_ref().filter(|_| !pulled.block_ipv6) else {
            return;
        };
        let if_index = ctx.if_index;
        self.paired(
            ctx,
            commands::build_set_ipv6_address_cmd(if_index, local6.address),
            commands::build_del_ipv6_address_cmd(if_index, local6.address),
        );
        let on_link = format!("{}/{}", local6.gateway, local6.prefix_length);
        self.ipv6_route(ctx, &on_link);
    }

    /// DHCP-driven addressing used on legacy hosts.
    fn legacy_addressing(&self, ctx: &mut Context<'_>, cancel: &CancellationToken) -> SetupResult<()> {
        let pulled = ctx.input.pulled;
        if pulled.ipv6.is_some()
            || pulled.block_ipv6
            || pulled.reroute_gw.ipv6
            || pulled.add_routes.iter().any(|r| r.is_ipv6())
        {
            ctx.warnings.push(PolicyWarning::LegacyIpv6Ignored);
        }

        let local4 = pulled.ipv4.as_ref().ok_or(SetupError::MissingIfconfig {
            family: Family::Ipv4,
        })?;
        let if_index = ctx.if_index;
        let adapter = ctx.input.adapter;
        let name = &adapter.name;

        ctx.builder
            .add(EnsureDhcp::new(
                self.host.network.clone(),
                self.host.runner.clone(),
                if_index,
            ))
            .add(BestEffort::new(self.cmd(commands::build_flush_arp_cmd(if_index))))
            .add(BestEffort::new(self.cmd(commands::build_dhcp_release_cmd(name))))
            .add(BestEffort::new(self.cmd(commands::build_dhcp_renew_cmd(name))))
            .add(WaitForAddress::new(
                self.host.network.clone(),
                if_index,
                local4.address,
                self.timing.poll_attempts,
                self.timing.poll_interval,
                cancel.clone(),
            ))
            .add(Settle::new(self.timing.settle_delay));
        Ok(())
    }

    fn add_routes(&self, ctx: &mut Context<'_>) -> SetupResult<()> {
        let pulled = ctx.input.pulled;
        for route in &pulled.add_routes {
            match route.address {
                IpAddr::V6(_) => {
                    if pulled.block_ipv6 || ctx.routes == RouteTool::Legacy {
                        continue;
                    }
                    self.ipv6_route(ctx, &route.to_string());
                }
                IpAddr::V4(address) => {
                    let local4 = require_ipv4(pulled)?;
                    let if_index = ctx.if_index;
                    self.ipv4_route(ctx, address, route.prefix_length, if_index, local4.gateway)?;
                }
            }
        }
        Ok(())
    }

    fn exclude_routes(&self, ctx: &mut Context<'_>) -> SetupResult<()> {
        let pulled = ctx.input.pulled;
        if pulled.exclude_routes.is_empty() {
            return Ok(());
        }
        let Some(gw) = ctx.input.gateway else {
            ctx.warnings.push(PolicyWarning::ExcludeRoutesWithoutGateway);
            return Ok(());
        };

        let mut skipped_ipv6 = false;
        for route in &pulled.exclude_routes {
            match route.address {
                IpAddr::V6(_) => skipped_ipv6 = true,
                IpAddr::V4(address) => {
                    self.ipv4_route(ctx, address, route.prefix_length, gw.interface_index, gw.address)?;
                }
            }
        }
        if skipped_ipv6 {
            ctx.warnings.push(PolicyWarning::ExcludeIpv6Unsupported);
        }
        Ok(())
    }

    fn redirect_ipv4(&self, ctx: &mut Context<'_>) -> SetupResult<()> {
        let pulled = ctx.input.pulled;
        if !pulled.reroute_gw.ipv4 {
            return Ok(());
        }
        let gw = ctx
            .input
            .gateway
            .ok_or_else(|| SetupError::gateway_detection("redirect-gateway"))?;

        // Server traffic keeps using the pre-tunnel gateway
        match pulled.remote_address.address {
            IpAddr::V4(server) => {
                self.ipv4_route(ctx, server, 32, gw.interface_index, gw.address)?;
            }
            IpAddr::V6(server) => {
                debug!(%server, "No bypass route for IPv6 server address");
                ctx.warnings.push(PolicyWarning::ServerBypassIpv6 {
                    server: IpAddr::V6(server),
                });
            }
        }

        let local4 = require_ipv4(pulled)?;
        let if_index = ctx.if_index;
        for (half, len) in IPV4_SPLIT_DEFAULT {
            self.ipv4_route(ctx, half, len, if_index, local4.gateway)?;
        }
        Ok(())
    }

    fn redirect_ipv6(&self, ctx: &mut Context<'_>) {
        let pulled = ctx.input.pulled;
        if !pulled.reroute_gw.ipv6 || pulled.block_ipv6 {
            return;
        }
        for half in IPV6_SPLIT_DEFAULT {
            self.ipv6_route(ctx, half);
        }
    }

    fn dns(&self, ctx: &mut Context<'_>) {
        let pulled = ctx.input.pulled;
        let syntax = DnsSyntax::for_platform(&self.caps);
        let if_index = ctx.if_index;
        let mut ipv4_count = 0usize;
        let mut ipv6_count = 0usize;
        let mut configured = Vec::new();

        for server in &pulled.dns_servers {
            let (family, count) = match server.address {
                IpAddr::V4(_) => (Family::Ipv4, &mut ipv4_count),
                IpAddr::V6(_) if pulled.block_ipv6 => continue,
                IpAddr::V6(_) => (Family::Ipv6, &mut ipv6_count),
            };
            let position = *count;
            *count += 1;

            if position == 0 {
                self.paired(
                    ctx,
                    commands::build_set_primary_dns_cmd(if_index, server.address, syntax),
                    commands::build_del_all_dns_cmd(if_index, family, syntax),
                );
            } else {
                // Removed by the primary's delete-all
                ctx.builder.add(self.cmd(commands::build_add_dns_cmd(
                    if_index,
                    server.address,
                    position + 1,
                    syntax,
                )));
            }
            configured.push(server.address);
        }

        if configured.is_empty() {
            return;
        }

        if self.caps.dns_policy_table {
            let suffixes = dns_suffixes(pulled, ipv4_count, ipv6_count);
            ctx.builder.add_reverted(
                DnsPolicyCreate::new(self.host.dns_policy.clone(), suffixes, configured),
                DnsPolicyDelete::new(self.host.dns_policy.clone()),
            );
        }

        let app = ctx.input.app;
        if self.caps.leak_protection && !app.is_empty() {
            if let Some(guard) = &self.host.leak_guard {
                ctx.builder.add_reverted(
                    DnsLeakFilter::new(guard.clone(), app.clone(), if_index, true),
                    DnsLeakFilter::new(guard.clone(), app.clone(), if_index, false),
                );
            }
        }
    }

    fn wins(&self, ctx: &mut Context<'_>) {
        let if_index = ctx.if_index;
        let pulled = ctx.input.pulled;
        for (i, server) in pulled.wins_servers.iter().enumerate() {
            if i == 0 {
                self.paired(
                    ctx,
                    commands::build_set_primary_wins_cmd(if_index, server.address),
                    commands::build_del_all_wins_cmd(if_index),
                );
            } else {
                ctx.builder.add(self.cmd(commands::build_add_wins_cmd(
                    if_index,
                    server.address,
                    i + 1,
                )));
            }
        }
    }

    fn flush(&self, ctx: &mut Context<'_>) {
        self.paired(
            ctx,
            commands::build_flush_dns_cmd(),
            commands::build_flush_dns_cmd(),
        );
    }
}

fn require_ipv4(pulled: &PulledConfig) -> SetupResult<&VpnIpv4> {
    pulled.ipv4.as_ref().ok_or(SetupError::MissingIfconfig {
        family: Family::Ipv4,
    })
}

fn topology_request(local4: &VpnIpv4) -> TopologyRequest {
    TopologyRequest {
        topology: if local4.net30 {
            Topology::Net30
        } else {
            Topology::Subnet
        },
        local: local4.address,
        prefix_length: local4.prefix_length,
    }
}

/// Domain suffixes routed to the tunnel's DNS servers.
///
/// A family with redirect-gateway active and at least one configured server
/// routes everything (`"."`). Otherwise the non-empty search domains are
/// used, each starting with `.`; an empty result falls back to `"."`.
pub fn dns_suffixes(pulled: &PulledConfig, ipv4_servers: usize, ipv6_servers: usize) -> Vec<String> {
    let redirect4 = pulled.reroute_gw.ipv4 && ipv4_servers > 0;
    let redirect6 = pulled.reroute_gw.ipv6 && ipv6_servers > 0;

    let mut suffixes: Vec<String> = Vec::new();
    if !redirect4 && !redirect6 {
        suffixes = pulled
            .search_domains
            .iter()
            .filter(|d| !d.domain.is_empty())
            .map(|d| {
                if d.domain.starts_with('.') {
                    d.domain.clone()
                } else {
                    format!(".{}", d.domain)
                }
            })
            .collect();
    }
    if suffixes.is_empty() {
        suffixes.push(".".to_string());
    }
    suffixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::null;
    use crate::types::{DnsServer, Route, SearchDomain, VpnIpv6, WinsServer};
    use pretty_assertions::assert_eq;

    fn adapter() -> AdapterIdentity {
        AdapterIdentity {
            index: 12,
            name: "Local Area Connection 2".to_string(),
            guid: "{4A5B}".to_string(),
        }
    }

    fn gateway() -> Option<DefaultGateway> {
        Some(DefaultGateway {
            interface_index: 4,
            address: Ipv4Addr::new(192, 168, 1, 1),
        })
    }

    fn base() -> PulledConfig {
        let mut pulled = PulledConfig::new("203.0.113.10".parse().unwrap());
        pulled.ipv4 = Some(VpnIpv4 {
            address: Ipv4Addr::new(10, 8, 0, 2),
            prefix_length: 24,
            gateway: Ipv4Addr::new(10, 8, 0, 1),
            net30: false,
        });
        pulled
    }

    fn with_ipv6(mut pulled: PulledConfig) -> PulledConfig {
        pulled.ipv6 = Some(VpnIpv6 {
            address: "fd00:1::2".parse().unwrap(),
            prefix_length: 64,
            gateway: "fd00:1::1".parse().unwrap(),
        });
        pulled
    }

    fn build_with(
        caps: PlatformCapabilities,
        pulled: &PulledConfig,
        gateway: Option<DefaultGateway>,
        app: &AppIdentity,
    ) -> SetupResult<AdapterPlan> {
        let policy = AdapterConfigPolicy::new(caps, LegacyTiming::default(), null::services());
        let adapter = adapter();
        policy.build(
            PolicyInput {
                adapter: &adapter,
                pulled,
                gateway,
                app,
            },
            &CancellationToken::new(),
        )
    }

    fn build(pulled: &PulledConfig, gateway: Option<DefaultGateway>) -> SetupResult<AdapterPlan> {
        build_with(
            PlatformCapabilities::current(),
            pulled,
            gateway,
            &AppIdentity::new(r"C:\vpn\vpn.exe"),
        )
    }

    fn assert_paired(plan: &AdapterPlan) {
        assert_eq!(plan.create.reverted_count(), plan.destroy.len());
    }

    #[test]
    fn test_end_to_end_sequence() {
        let mut pulled = base();
        pulled
            .add_routes
            .push(Route::new("192.168.50.0".parse().unwrap(), 24));

        let plan = build(&pulled, gateway()).unwrap();
        assert_eq!(
            plan.create.descriptions(),
            vec![
                "DeleteAllRoutesOnInterface iface_index=12",
                "netsh interface ip set address 12 static 10.8.0.2 255.255.255.0 gateway=10.8.0.1 store=active",
                "netsh interface ip add route 192.168.50.0/24 12 10.8.0.1 store=active",
                "ipconfig /flushdns",
            ]
        );
        assert_eq!(
            plan.destroy.descriptions(),
            vec![
                "netsh interface ip delete address 12 10.8.0.2 gateway=all store=active",
                "netsh interface ip delete route 192.168.50.0/24 12 10.8.0.1 store=active",
                "ipconfig /flushdns",
            ]
        );
        assert_paired(&plan);
        assert!(plan.warnings.is_empty());
        assert_eq!(
            plan.topology,
            Some(TopologyRequest {
                topology: Topology::Subnet,
                local: Ipv4Addr::new(10, 8, 0, 2),
                prefix_length: 24,
            })
        );
    }

    #[test]
    fn test_net30_topology() {
        let mut pulled = base();
        if let Some(v4) = pulled.ipv4.as_mut() {
            v4.net30 = true;
            v4.prefix_length = 30;
        }
        let plan = build(&pulled, None).unwrap();
        assert_eq!(plan.topology.unwrap().topology, Topology::Net30);
        assert!(plan.create.descriptions()[1].contains("255.255.255.252"));
    }

    #[test]
    fn test_ipv6_address_and_routes() {
        let mut pulled = with_ipv6(base());
        pulled
            .add_routes
            .push(Route::new("2001:db8::".parse().unwrap(), 32));
        pulled.reroute_gw.ipv6 = true;

        let plan = build(&pulled, gateway()).unwrap();
        let create = plan.create.descriptions();
        assert_eq!(
            &create[2..7],
            &[
                "netsh interface ipv6 set address 12 fd00:1::2 store=active",
                "netsh interface ipv6 add route fd00:1::1/64 12 fe80::8 store=active",
                "netsh interface ipv6 add route 2001:db8::/32 12 fe80::8 store=active",
                "netsh interface ipv6 add route 0::/1 12 fe80::8 store=active",
                "netsh interface ipv6 add route 8000::/1 12 fe80::8 store=active",
            ]
        );
        assert_paired(&plan);
    }

    #[test]
    fn test_block_ipv6_suppresses_ipv6_configuration() {
        let mut pulled = with_ipv6(base());
        pulled.block_ipv6 = true;
        pulled.reroute_gw.ipv6 = true;
        pulled
            .add_routes
            .push(Route::new("2001:db8::".parse().unwrap(), 32));
        pulled.dns_servers.push(DnsServer {
            address: "fd00::53".parse().unwrap(),
        });

        let plan = build(&pulled, gateway()).unwrap();
        let create = plan.create.descriptions();
        let blackholes: Vec<&String> = create.iter().filter(|c| c.contains("interface=1")).collect();
        assert_eq!(
            blackholes,
            vec![
                "netsh interface ipv6 add route 2000::/4 interface=1 store=active",
                "netsh interface ipv6 add route 3000::/4 interface=1 store=active",
                "netsh interface ipv6 add route fc00::/7 interface=1 store=active",
            ]
        );
        assert!(!create.iter().any(|c| c.contains("fe80::8")));
        assert!(!create.iter().any(|c| c.contains("ipv6 set")));
        assert!(!create.iter().any(|c| c.contains("dnsservers")));
        assert!(!create.iter().any(|c| c.starts_with("NRPT")));
        assert_paired(&plan);
    }

    #[test]
    fn test_ipv4_route_without_ifconfig_fails() {
        let mut pulled = PulledConfig::new("203.0.113.10".parse().unwrap());
        pulled
            .add_routes
            .push(Route::new("192.168.50.0".parse().unwrap(), 24));
        assert!(matches!(
            build(&pulled, gateway()),
            Err(SetupError::MissingIfconfig {
                family: Family::Ipv4
            })
        ));
    }

    #[test]
    fn test_redirect_gateway_requires_default_gateway() {
        let mut pulled = base();
        pulled.reroute_gw.ipv4 = true;
        match build(&pulled, None) {
            Err(e @ SetupError::GatewayDetection { .. }) => {
                assert_eq!(
                    e.to_string(),
                    "redirect-gateway error: cannot detect default gateway"
                );
            }
            other => panic!("Expected GatewayDetection, got {:?}", other),
        }
    }

    #[test]
    fn test_redirect_gateway_split_routes() {
        let mut pulled = base();
        pulled.reroute_gw.ipv4 = true;
        let plan = build(&pulled, gateway()).unwrap();
        let routes: Vec<String> = plan
            .create
            .descriptions()
            .into_iter()
            .filter(|c| c.contains(" add route "))
            .collect();
        assert_eq!(
            routes,
            vec![
                "netsh interface ip add route 203.0.113.10/32 4 192.168.1.1 store=active",
                "netsh interface ip add route 0.0.0.0/1 12 10.8.0.1 store=active",
                "netsh interface ip add route 128.0.0.0/1 12 10.8.0.1 store=active",
            ]
        );
        assert_paired(&plan);
    }

    #[test]
    fn test_redirect_gateway_ipv6_server_not_bypassed() {
        let mut pulled = base();
        pulled.reroute_gw.ipv4 = true;
        pulled.remote_address.address = "2001:db8::10".parse().unwrap();
        let plan = build(&pulled, gateway()).unwrap();
        let routes = plan
            .create
            .descriptions()
            .into_iter()
            .filter(|c| c.contains(" add route "))
            .count();
        assert_eq!(routes, 2);
        assert!(matches!(
            plan.warnings.as_slice(),
            [PolicyWarning::ServerBypassIpv6 { .. }]
        ));
    }

    #[test]
    fn test_exclude_routes_soft_failures() {
        let mut pulled = base();
        pulled
            .exclude_routes
            .push(Route::new("198.51.100.0".parse().unwrap(), 24));
        pulled
            .exclude_routes
            .push(Route::new("2001:db8:1::".parse().unwrap(), 48));

        let plan = build(&pulled, None).unwrap();
        assert_eq!(plan.warnings, vec![PolicyWarning::ExcludeRoutesWithoutGateway]);
        assert_eq!(
            plan.warnings[0].to_string(),
            "exclude routes error: cannot detect default gateway"
        );

        let plan = build(&pulled, gateway()).unwrap();
        assert_eq!(plan.warnings, vec![PolicyWarning::ExcludeIpv6Unsupported]);
        assert!(plan
            .create
            .descriptions()
            .contains(&"netsh interface ip add route 198.51.100.0/24 4 192.168.1.1 store=active".to_string()));
    }

    #[test]
    fn test_dns_primary_and_secondary() {
        let mut pulled = with_ipv6(base());
        for addr in ["10.8.0.1", "fd00::53", "10.8.0.53"] {
            pulled.dns_servers.push(DnsServer {
                address: addr.parse().unwrap(),
            });
        }
        let plan = build(&pulled, None).unwrap();
        let create = plan.create.descriptions();
        let dns: Vec<&String> = create.iter().filter(|c| c.contains("dnsservers")).collect();
        assert_eq!(
            dns,
            vec![
                "netsh interface ip set dnsservers 12 static 10.8.0.1 register=primary validate=no",
                "netsh interface ipv6 set dnsservers 12 static fd00::53 register=primary validate=no",
                "netsh interface ip add dnsservers 12 10.8.0.53 2 validate=no",
            ]
        );
        assert!(create.iter().any(|c| c.starts_with("NRPT::ActionCreate domains=[.]")));
        assert!(create.iter().any(|c| c.starts_with("ActionWFP") && c.contains("enable=true")));
        let destroy = plan.destroy.descriptions();
        assert!(destroy.contains(&"netsh interface ip delete dnsservers 12 all validate=no".to_string()));
        assert!(destroy.contains(&"netsh interface ipv6 delete dnsservers 12 all validate=no".to_string()));
        assert!(destroy.contains(&"NRPT::ActionDelete".to_string()));
        assert_paired(&plan);
    }

    #[test]
    fn test_dns_without_policy_table_or_app() {
        let mut pulled = base();
        pulled.dns_servers.push(DnsServer {
            address: "10.8.0.1".parse().unwrap(),
        });
        let plan = build_with(
            PlatformCapabilities::from_os_version(6, 1),
            &pulled,
            None,
            &AppIdentity::new(r"C:\vpn\vpn.exe"),
        )
        .unwrap();
        let create = plan.create.descriptions();
        assert!(!create.iter().any(|c| c.starts_with("NRPT")));
        assert!(!create.iter().any(|c| c.starts_with("ActionWFP")));

        let plan = build_with(
            PlatformCapabilities::current(),
            &pulled,
            None,
            &AppIdentity::default(),
        )
        .unwrap();
        let create = plan.create.descriptions();
        assert!(create.iter().any(|c| c.starts_with("NRPT")));
        assert!(!create.iter().any(|c| c.starts_with("ActionWFP")));
    }

    #[test]
    fn test_legacy_dns_syntax() {
        let mut pulled = base();
        pulled.dns_servers.push(DnsServer {
            address: "10.8.0.1".parse().unwrap(),
        });
        let plan = build_with(
            PlatformCapabilities::from_os_version(6, 0),
            &pulled,
            None,
            &AppIdentity::default(),
        )
        .unwrap();
        assert!(plan.create.descriptions().contains(
            &"netsh interface ip set dnsserver 12 static 10.8.0.1 register=primary".to_string()
        ));
    }

    #[test]
    fn test_dns_suffixes() {
        let mut pulled = base();
        assert_eq!(dns_suffixes(&pulled, 1, 0), vec!["."]);

        pulled.search_domains.push(SearchDomain {
            domain: "example.com".to_string(),
        });
        pulled.search_domains.push(SearchDomain {
            domain: String::new(),
        });
        pulled.search_domains.push(SearchDomain {
            domain: ".corp.example".to_string(),
        });
        assert_eq!(dns_suffixes(&pulled, 1, 0), vec![".example.com", ".corp.example"]);

        // Redirect only counts for a family with servers
        pulled.reroute_gw.ipv6 = true;
        assert_eq!(dns_suffixes(&pulled, 1, 0), vec![".example.com", ".corp.example"]);
        pulled.reroute_gw.ipv4 = true;
        assert_eq!(dns_suffixes(&pulled, 1, 0), vec!["."]);
    }

    #[test]
    fn test_wins_servers() {
        let mut pulled = base();
        for addr in [[10, 8, 0, 5], [10, 8, 0, 6]] {
            pulled.wins_servers.push(WinsServer {
                address: Ipv4Addr::from(addr),
            });
        }
        let plan = build(&pulled, None).unwrap();
        let create = plan.create.descriptions();
        assert!(create.contains(&"netsh interface ip set winsservers 12 static 10.8.0.5".to_string()));
        assert!(create.contains(&"netsh interface ip add winsservers 12 10.8.0.6 2".to_string()));
        assert!(plan
            .destroy
            .descriptions()
            .contains(&"netsh interface ip delete winsservers 12 all".to_string()));
        assert_paired(&plan);
    }

    #[test]
    fn test_legacy_plan() {
        let mut pulled = with_ipv6(base());
        pulled
            .add_routes
            .push(Route::new("192.168.50.0".parse().unwrap(), 24));
        pulled.reroute_gw.ipv4 = true;
        pulled.dns_servers.push(DnsServer {
            address: "10.8.0.1".parse().unwrap(),
        });

        let plan = build_with(
            PlatformCapabilities::from_os_version(5, 1),
            &pulled,
            gateway(),
            &AppIdentity::default(),
        )
        .unwrap();
        assert_eq!(
            plan.create.descriptions(),
            vec![
                "DeleteAllRoutesOnInterface iface_index=12",
                "EnsureDHCP iface_index=12",
                "netsh interface ip delete arpcache 12",
                "ipconfig /release \"Local Area Connection 2\"",
                "ipconfig /renew \"Local Area Connection 2\"",
                "WaitForAddress iface_index=12 address=10.8.0.2 attempts=30",
                "Sleeping 5 seconds prior to adding routes...",
                "route ADD 192.168.50.0 MASK 255.255.255.0 10.8.0.1",
                "route ADD 203.0.113.10 MASK 255.255.255.255 192.168.1.1",
                "route ADD 0.0.0.0 MASK 128.0.0.0 10.8.0.1",
                "route ADD 128.0.0.0 MASK 128.0.0.0 10.8.0.1",
                "ipconfig /flushdns",
            ]
        );
        assert_paired(&plan);
        assert_eq!(plan.warnings, vec![PolicyWarning::LegacyIpv6Ignored]);
    }

    #[test]
    fn test_legacy_requires_ipv4() {
        let pulled = PulledConfig::new("203.0.113.10".parse().unwrap());
        assert!(matches!(
            build_with(
                PlatformCapabilities::from_os_version(5, 1),
                &pulled,
                None,
                &AppIdentity::default(),
            ),
            Err(SetupError::MissingIfconfig { .. })
        ));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let mut pulled = with_ipv6(base());
        pulled.reroute_gw.ipv4 = true;
        pulled.dns_servers.push(DnsServer {
            address: "10.8.0.1".parse().unwrap(),
        });
        let a = build(&pulled, gateway()).unwrap();
        let b = build(&pulled, gateway()).unwrap();
        assert_eq!(a.create.descriptions(), b.create.descriptions());
        assert_eq!(a.destroy.descriptions(), b.destroy.descriptions());
    }
}
