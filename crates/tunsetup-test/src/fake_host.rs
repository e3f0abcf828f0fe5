//! Recording fake host
//!
//! Every call the engine makes is appended to a journal. Calls whose journal
//! text contains a registered failure pattern fail after being recorded.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use tunsetup_common::{SetupError, SetupResult};
use tunsetupd::host::{
    AdapterDevice, AdapterHandle, CommandRunner, DnsPolicyTable, HostNetwork, HostServices,
    LeakGuard, OpenedAdapter,
};
use tunsetupd::types::{
    AdapterIdentity, AppIdentity, DefaultGateway, PlatformCapabilities, PulledConfig,
    TopologyRequest,
};

use crate::fixtures;

/// One recorded host interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A host command line
    Command(String),
    /// Route table or interface operation
    Network(String),
    /// TAP driver control
    Device(String),
    /// DNS policy table operation
    DnsPolicy(String),
    /// Leak-protection filter operation
    LeakGuard(String),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Command(s) => write!(f, "{}", s),
            Event::Network(s) => write!(f, "network: {}", s),
            Event::Device(s) => write!(f, "device: {}", s),
            Event::DnsPolicy(s) => write!(f, "dns policy: {}", s),
            Event::LeakGuard(s) => write!(f, "leak guard: {}", s),
        }
    }
}

struct FakeState {
    journal: Vec<Event>,
    failures: Vec<String>,
    gateway: Option<DefaultGateway>,
    capabilities: PlatformCapabilities,
    adapter: AdapterIdentity,
    open_error: Option<String>,
    dhcp_enabled: bool,
    /// Poll on which the adapter reports its address; 0 never
    ready_after: u32,
    polls: u32,
}

/// Fake implementation of every host collaborator.
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                journal: Vec::new(),
                failures: Vec::new(),
                gateway: Some(fixtures::default_gateway()),
                capabilities: PlatformCapabilities::current(),
                adapter: fixtures::adapter(),
                open_error: None,
                dhcp_enabled: true,
                ready_after: 1,
                polls: 0,
            }),
        }
    }
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the journal from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Collaborators backed by this host.
    pub fn services(self: &Arc<Self>) -> HostServices {
        HostServices {
            runner: self.clone(),
            network: self.clone(),
            device: self.clone(),
            dns_policy: self.clone(),
            leak_guard: Some(self.clone()),
        }
    }

    /// Collaborators without a leak-protection binding.
    pub fn services_without_leak_guard(self: &Arc<Self>) -> HostServices {
        HostServices {
            leak_guard: None,
            ..self.services()
        }
    }

    /// Makes every later call whose journal text contains `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.state().failures.push(pattern.into());
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn set_gateway(&self, gateway: Option<DefaultGateway>) {
        self.state().gateway = gateway;
    }

    pub fn set_capabilities(&self, capabilities: PlatformCapabilities) {
        self.state().capabilities = capabilities;
    }

    pub fn set_dhcp_enabled(&self, enabled: bool) {
        self.state().dhcp_enabled = enabled;
    }

    /// The adapter reports its address on poll `n`; 0 never.
    pub fn set_ready_after(&self, n: u32) {
        self.state().ready_after = n;
    }

    pub fn fail_open(&self, reason: impl Into<String>) {
        self.state().open_error = Some(reason.into());
    }

    pub fn journal(&self) -> Vec<Event> {
        self.state().journal.clone()
    }

    /// Journal entries that are host command lines.
    pub fn commands(&self) -> Vec<String> {
        self.state()
            .journal
            .iter()
            .filter_map(|e| match e {
                Event::Command(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    pub fn polls(&self) -> u32 {
        self.state().polls
    }

    fn record(&self, event: Event) -> SetupResult<()> {
        let mut state = self.state();
        let text = event.to_string();
        state.journal.push(event);
        if state.failures.iter().any(|p| text.contains(p.as_str())) {
            return Err(SetupError::ShellCommandFailed {
                command: text,
                exit_code: 1,
                output: "The object already exists.".to_string(),
            });
        }
        Ok(())
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, command: &str) -> SetupResult<String> {
        self.record(Event::Command(command.to_string()))?;
        Ok(String::new())
    }
}

impl HostNetwork for FakeHost {
    fn platform_capabilities(&self) -> PlatformCapabilities {
        self.state().capabilities
    }

    fn default_gateway(&self) -> SetupResult<Option<DefaultGateway>> {
        Ok(self.state().gateway)
    }

    fn delete_all_routes(&self, if_index: u32) -> SetupResult<()> {
        self.record(Event::Network(format!("delete all routes on {}", if_index)))
    }

    fn dhcp_enabled(&self, _if_index: u32) -> SetupResult<bool> {
        Ok(self.state().dhcp_enabled)
    }

    fn has_address(&self, _if_index: u32, _address: Ipv4Addr) -> SetupResult<bool> {
        let mut state = self.state();
        state.polls += 1;
        Ok(state.ready_after != 0 && state.polls >= state.ready_after)
    }
}

impl AdapterDevice for FakeHost {
    fn candidates(&self) -> SetupResult<Vec<AdapterIdentity>> {
        Ok(vec![self.state().adapter.clone()])
    }

    fn open(&self, candidates: &[AdapterIdentity]) -> SetupResult<OpenedAdapter> {
        if let Some(reason) = self.state().open_error.clone() {
            return Err(SetupError::adapter_acquisition(reason));
        }
        let identity = candidates
            .first()
            .cloned()
            .ok_or_else(|| SetupError::adapter_acquisition("no TAP adapters found"))?;
        let file = tempfile::tempfile()
            .map_err(|e| SetupError::adapter_acquisition(e.to_string()))?;
        Ok(OpenedAdapter {
            handle: AdapterHandle::new(file),
            path: format!(r"\\.\Global\{}.tap", identity.guid),
            identity,
        })
    }

    fn driver_version(&self, _handle: &AdapterHandle) -> SetupResult<String> {
        Ok("TAP-Windows Driver Version 9.24".to_string())
    }

    fn set_media_status(&self, _handle: &AdapterHandle, connected: bool) -> SetupResult<()> {
        let status = if connected { "connected" } else { "disconnected" };
        self.record(Event::Device(format!("media {}", status)))
    }

    fn configure_topology(&self, _handle: &AdapterHandle, request: &TopologyRequest) -> SetupResult<()> {
        self.record(Event::Device(format!("topology {}", request)))
    }

    fn configure_dhcp_masquerade(&self, _handle: &AdapterHandle, pulled: &PulledConfig) -> SetupResult<()> {
        let local = pulled
            .ipv4
            .as_ref()
            .map(|v4| v4.address.to_string())
            .unwrap_or_default();
        self.record(Event::Device(format!("dhcp masquerade {}", local)))
    }
}

impl DnsPolicyTable for FakeHost {
    fn create(&self, suffixes: &[String], servers: &[IpAddr]) -> SetupResult<()> {
        let servers: Vec<String> = servers.iter().map(|s| s.to_string()).collect();
        self.record(Event::DnsPolicy(format!(
            "create [{}] -> [{}]",
            suffixes.join(","),
            servers.join(",")
        )))
    }

    fn delete(&self) -> SetupResult<()> {
        self.record(Event::DnsPolicy("delete".to_string()))
    }
}

impl LeakGuard for FakeHost {
    fn block_dns(&self, app: &AppIdentity, if_index: u32) -> SetupResult<()> {
        self.record(Event::LeakGuard(format!("block {} except {}", app, if_index)))
    }

    fn unblock_dns(&self, app: &AppIdentity, if_index: u32) -> SetupResult<()> {
        self.record(Event::LeakGuard(format!("unblock {} except {}", app, if_index)))
    }
}
