//! Host collaborators the engine drives
//!
//! The engine never touches the host directly. Commands, route-table and
//! interface queries, the TAP device, the DNS policy table and the
//! leak-protection filter are reached through the traits below, bundled in
//! [`HostServices`].

use std::fs::File;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tunsetup_common::{shell, SetupResult};

use crate::types::{
    AdapterIdentity, AppIdentity, DefaultGateway, PlatformCapabilities, PulledConfig,
    TopologyRequest,
};

/// Runs one configuration command against the host.
pub trait CommandRunner: Send + Sync {
    /// Executes `command`, returning its stdout on success.
    fn run(&self, command: &str) -> SetupResult<String>;
}

/// Runs commands through the platform shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> SetupResult<String> {
        shell::exec_or_throw(command)
    }
}

/// Read-mostly view of the host's network state.
pub trait HostNetwork: Send + Sync {
    /// Queried once per orchestrator.
    fn platform_capabilities(&self) -> PlatformCapabilities;

    /// The current default IPv4 gateway, if one is detectable.
    fn default_gateway(&self) -> SetupResult<Option<DefaultGateway>>;

    /// Deletes every route bound to the interface.
    fn delete_all_routes(&self, if_index: u32) -> SetupResult<()>;

    /// Whether the interface is configured for DHCP addressing.
    fn dhcp_enabled(&self, if_index: u32) -> SetupResult<bool>;

    /// Whether the interface currently reports `address`.
    fn has_address(&self, if_index: u32, address: Ipv4Addr) -> SetupResult<bool>;
}

/// Exclusively owned handle to an opened tunnel adapter device.
///
/// Dropping the handle closes the device.
#[derive(Debug)]
pub struct AdapterHandle {
    file: File,
}

impl AdapterHandle {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

/// An adapter returned by [`AdapterDevice::open`].
#[derive(Debug)]
pub struct OpenedAdapter {
    pub handle: AdapterHandle,
    pub identity: AdapterIdentity,
    /// Device path that was opened
    pub path: String,
}

/// Enumeration, acquisition and driver control of tunnel adapters.
pub trait AdapterDevice: Send + Sync {
    /// Lists adapters that could be opened.
    fn candidates(&self) -> SetupResult<Vec<AdapterIdentity>>;

    /// Opens the first usable candidate.
    fn open(&self, candidates: &[AdapterIdentity]) -> SetupResult<OpenedAdapter>;

    /// Driver version string, for the progress log.
    fn driver_version(&self, handle: &AdapterHandle) -> SetupResult<String>;

    /// Reports link up/down to the host.
    fn set_media_status(&self, handle: &AdapterHandle, connected: bool) -> SetupResult<()>;

    /// Programs the IPv4 topology endpoints.
    fn configure_topology(&self, handle: &AdapterHandle, request: &TopologyRequest)
        -> SetupResult<()>;

    /// Programs the driver's DHCP server with the pulled settings.
    fn configure_dhcp_masquerade(&self, handle: &AdapterHandle, pulled: &PulledConfig)
        -> SetupResult<()>;
}

/// Host table mapping domain suffixes to DNS servers.
pub trait DnsPolicyTable: Send + Sync {
    fn create(&self, suffixes: &[String], servers: &[IpAddr]) -> SetupResult<()>;

    /// Removes every entry previously created by [`DnsPolicyTable::create`].
    fn delete(&self) -> SetupResult<()>;
}

/// Firewall layer blocking DNS outside the tunnel.
pub trait LeakGuard: Send + Sync {
    /// Blocks DNS on every interface except `if_index`, exempting `app`.
    fn block_dns(&self, app: &AppIdentity, if_index: u32) -> SetupResult<()>;

    fn unblock_dns(&self, app: &AppIdentity, if_index: u32) -> SetupResult<()>;
}

/// All host collaborators used by one orchestrator.
#[derive(Clone)]
pub struct HostServices {
    pub runner: Arc<dyn CommandRunner>,
    pub network: Arc<dyn HostNetwork>,
    pub device: Arc<dyn AdapterDevice>,
    pub dns_policy: Arc<dyn DnsPolicyTable>,
    /// Absent when the host offers no leak-protection binding
    pub leak_guard: Option<Arc<dyn LeakGuard>>,
}
