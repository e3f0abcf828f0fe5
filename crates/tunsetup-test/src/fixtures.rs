//! Test fixtures for common tunnel configurations

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use tunsetupd::types::{
    AdapterIdentity, AppIdentity, DefaultGateway, DnsServer, LegacyTiming, PlatformCapabilities, PulledConfig,
    Route, SearchDomain, VpnIpv4, VpnIpv6, WinsServer,
};
use tunsetupd::SetupOptions;

/// Interface index of the fixture adapter
pub const ADAPTER_INDEX: u32 = 12;

/// Address of the fixture VPN server
pub const SERVER: &str = "203.0.113.10";

pub fn adapter() -> AdapterIdentity {
    AdapterIdentity {
        index: ADAPTER_INDEX,
        name: "Local Area Connection 2".to_string(),
        guid: "{4A5B6C7D-0000-1111-2222-333344445555}".to_string(),
    }
}

pub fn default_gateway() -> DefaultGateway {
    DefaultGateway {
        interface_index: 4,
        address: Ipv4Addr::new(192, 168, 1, 1),
    }
}

/// Executable exempted by the leak guard.
pub fn app() -> AppIdentity {
    AppIdentity::new(r"C:\Program Files\VPN\vpn.exe")
}

fn parse<T: std::str::FromStr>(s: &str) -> T
where
    T::Err: std::fmt::Debug,
{
    s.parse().expect("fixture address")
}

/// Fluent builder for pulled configurations.
#[derive(Debug, Clone)]
pub struct PulledBuilder {
    pulled: PulledConfig,
}

impl Default for PulledBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PulledBuilder {
    pub fn new() -> Self {
        Self {
            pulled: PulledConfig::new(parse(SERVER)),
        }
    }

    pub fn remote(mut self, address: &str) -> Self {
        self.pulled.remote_address.address = parse(address);
        self
    }

    pub fn ipv4(mut self, address: &str, prefix_length: u8, gateway: &str) -> Self {
        self.pulled.ipv4 = Some(VpnIpv4 {
            address: parse(address),
            prefix_length,
            gateway: parse(gateway),
            net30: false,
        });
        self
    }

    pub fn net30(mut self) -> Self {
        if let Some(v4) = self.pulled.ipv4.as_mut() {
            v4.net30 = true;
        }
        self
    }

    pub fn ipv6(mut self, address: &str, prefix_length: u8, gateway: &str) -> Self {
        self.pulled.ipv6 = Some(VpnIpv6 {
            address: parse::<Ipv6Addr>(address),
            prefix_length,
            gateway: parse::<Ipv6Addr>(gateway),
        });
        self
    }

    pub fn route(mut self, address: &str, prefix_length: u8) -> Self {
        self.pulled
            .add_routes
            .push(Route::new(parse::<IpAddr>(address), prefix_length));
        self
    }

    pub fn exclude(mut self, address: &str, prefix_length: u8) -> Self {
        self.pulled
            .exclude_routes
            .push(Route::new(parse::<IpAddr>(address), prefix_length));
        self
    }

    pub fn redirect_ipv4(mut self) -> Self {
        self.pulled.reroute_gw.ipv4 = true;
        self
    }

    pub fn redirect_ipv6(mut self) -> Self {
        self.pulled.reroute_gw.ipv6 = true;
        self
    }

    pub fn block_ipv6(mut self) -> Self {
        self.pulled.block_ipv6 = true;
        self
    }

    pub fn dns(mut self, address: &str) -> Self {
        self.pulled.dns_servers.push(DnsServer {
            address: parse(address),
        });
        self
    }

    pub fn search_domain(mut self, domain: &str) -> Self {
        self.pulled.search_domains.push(SearchDomain {
            domain: domain.to_string(),
        });
        self
    }

    pub fn wins(mut self, address: &str) -> Self {
        self.pulled.wins_servers.push(WinsServer {
            address: parse(address),
        });
        self
    }

    pub fn build(self) -> PulledConfig {
        self.pulled
    }
}

/// 10.8.0.2/24 via 10.8.0.1 with one pushed route to 192.168.50.0/24.
pub fn split_tunnel() -> PulledConfig {
    PulledBuilder::new()
        .ipv4("10.8.0.2", 24, "10.8.0.1")
        .route("192.168.50.0", 24)
        .build()
}

/// Redirect-gateway with tunnel DNS and a search domain.
pub fn full_tunnel() -> PulledConfig {
    PulledBuilder::new()
        .ipv4("10.8.0.2", 24, "10.8.0.1")
        .redirect_ipv4()
        .dns("10.8.0.1")
        .search_domain("corp.example")
        .build()
}

/// Legacy host options with no waiting between polls.
pub fn legacy_options(poll_attempts: u32) -> SetupOptions {
    SetupOptions {
        capabilities: Some(PlatformCapabilities::from_os_version(5, 1)),
        legacy: LegacyTiming {
            poll_attempts,
            poll_interval: Duration::ZERO,
            settle_delay: Duration::ZERO,
        },
    }
}
