//! Host-backed collaborators used by the daemon
//!
//! Route-table, interface and NRPT access go through `netsh` and PowerShell
//! via a [`CommandRunner`]. The TAP device is driven with `DeviceIoControl`
//! on Windows; on other hosts device control reports an error.

use std::fs::{File, OpenOptions};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use tunsetup_common::shell::{self, POWERSHELL_CMD};
use tunsetup_common::{SetupError, SetupResult};

use crate::commands;
use crate::config::AdapterConfig;
use crate::host::{
    AdapterDevice, AdapterHandle, CommandRunner, DnsPolicyTable, HostNetwork, HostServices,
    OpenedAdapter, ShellRunner,
};
use crate::types::{
    netmask_from_prefix_len, AdapterIdentity, DefaultGateway, PlatformCapabilities, PulledConfig,
    Topology, TopologyRequest,
};

/// Comment attached to every NRPT rule this daemon creates
pub const NRPT_RULE_COMMENT: &str = "tunsetupd";

/// DHCP lease handed out by the driver's masquerade server, in seconds
pub const DHCP_LEASE_SECS: u32 = 31_536_000;

static OS_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Version (\d+)\.(\d+)").expect("Invalid regex pattern"));

static DHCP_ENABLED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)DHCP enabled:\s*(Yes|No)").expect("Invalid regex pattern"));

static IP_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)IP Address:\s*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})")
        .expect("Invalid regex pattern")
});

fn powershell(script: &str) -> String {
    format!("{} {}", POWERSHELL_CMD, shell::quote_arg(script))
}

/// Parses `ver` output into capabilities.
pub fn parse_os_version(output: &str) -> Option<PlatformCapabilities> {
    let caps = OS_VERSION_RE.captures(output)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    Some(PlatformCapabilities::from_os_version(major, minor))
}

/// Whether `netsh interface ip show config` output reports DHCP enabled.
pub fn parse_dhcp_enabled(output: &str) -> SetupResult<bool> {
    DHCP_ENABLED_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str() == "Yes")
        .ok_or_else(|| SetupError::internal("DHCP state missing from interface config"))
}

/// Addresses listed in `netsh interface ip show config` output.
pub fn parse_ipv4_addresses(output: &str) -> Vec<Ipv4Addr> {
    IP_ADDRESS_RE
        .captures_iter(output)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

#[derive(Debug, Deserialize)]
struct NetRoute {
    #[serde(rename = "ifIndex")]
    if_index: u32,
    #[serde(rename = "NextHop")]
    next_hop: String,
}

/// Parses the `Get-NetRoute ... | ConvertTo-Json` output for the default route.
pub fn parse_default_route(output: &str) -> SetupResult<Option<DefaultGateway>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(None);
    }
    let route: NetRoute = serde_json::from_str(output)
        .map_err(|e| SetupError::internal(format!("Cannot parse default route: {}", e)))?;
    let address: Ipv4Addr = route
        .next_hop
        .parse()
        .map_err(|_| SetupError::internal(format!("Bad next hop {}", route.next_hop)))?;
    if address.is_unspecified() {
        return Ok(None);
    }
    Ok(Some(DefaultGateway {
        interface_index: route.if_index,
        address,
    }))
}

/// Route table and interface state through host tools.
pub struct WindowsNetwork {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn show_config(&self, if_index: u32) -> SetupResult<String> {
        self.runner
            .run(&commands::build_show_ipv4_config_cmd(if_index))
    }
}

impl HostNetwork for WindowsNetwork {
    fn platform_capabilities(&self) -> PlatformCapabilities {
        match self.runner.run("ver").map(|out| parse_os_version(&out)) {
            Ok(Some(caps)) => caps,
            Ok(None) => {
                warn!("Cannot parse OS version, assuming a current host");
                PlatformCapabilities::current()
            }
            Err(e) => {
                warn!(error = %e, "OS version query failed, assuming a current host");
                PlatformCapabilities::current()
            }
        }
    }

    fn default_gateway(&self) -> SetupResult<Option<DefaultGateway>> {
        let output = self.runner.run(&powershell(
            "Get-NetRoute -DestinationPrefix 0.0.0.0/0 -ErrorAction SilentlyContinue | \
             Sort-Object RouteMetric | Select-Object -First 1 ifIndex,NextHop | ConvertTo-Json",
        ))?;
        let gateway = parse_default_route(&output)?;
        debug!(?gateway, "Default gateway");
        Ok(gateway)
    }

    fn delete_all_routes(&self, if_index: u32) -> SetupResult<()> {
        self.runner
            .run(&powershell(&format!(
                "Remove-NetRoute -InterfaceIndex {} -AddressFamily IPv4 -Confirm:$false -ErrorAction SilentlyContinue",
                if_index
            )))
            .map(|_| ())
    }

    fn dhcp_enabled(&self, if_index: u32) -> SetupResult<bool> {
        parse_dhcp_enabled(&self.show_config(if_index)?)
    }

    fn has_address(&self, if_index: u32, address: Ipv4Addr) -> SetupResult<bool> {
        Ok(parse_ipv4_addresses(&self.show_config(if_index)?).contains(&address))
    }
}

/// Builds the NRPT rule creation script.
pub fn nrpt_create_script(suffixes: &[String], servers: &[IpAddr]) -> String {
    let namespaces: Vec<String> = suffixes.iter().map(|s| shell::psquote(s)).collect();
    let servers: Vec<String> = servers
        .iter()
        .map(|s| shell::psquote(&s.to_string()))
        .collect();
    format!(
        "Add-DnsClientNrptRule -Namespace {} -NameServers {} -Comment {}",
        namespaces.join(","),
        servers.join(","),
        shell::psquote(NRPT_RULE_COMMENT)
    )
}

/// Builds the script removing every rule tagged with [`NRPT_RULE_COMMENT`].
pub fn nrpt_delete_script() -> String {
    format!(
        "Get-DnsClientNrptRule | Where-Object {{ $_.Comment -eq {} }} | \
         Remove-DnsClientNrptRule -Force",
        shell::psquote(NRPT_RULE_COMMENT)
    )
}

/// Name Resolution Policy Table through the DnsClient cmdlets.
pub struct NrptTable {
    runner: Arc<dyn CommandRunner>,
}

impl NrptTable {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl DnsPolicyTable for NrptTable {
    fn create(&self, suffixes: &[String], servers: &[IpAddr]) -> SetupResult<()> {
        self.runner
            .run(&powershell(&nrpt_create_script(suffixes, servers)))
            .map(|_| ())
    }

    fn delete(&self) -> SetupResult<()> {
        self.runner.run(&powershell(&nrpt_delete_script())).map(|_| ())
    }
}

const fn tap_control_code(request: u32) -> u32 {
    // CTL_CODE(FILE_DEVICE_UNKNOWN, request, METHOD_BUFFERED, FILE_ANY_ACCESS)
    (0x22 << 16) | (request << 2)
}

pub const TAP_IOCTL_GET_VERSION: u32 = tap_control_code(2);
pub const TAP_IOCTL_SET_MEDIA_STATUS: u32 = tap_control_code(6);
pub const TAP_IOCTL_CONFIG_DHCP_MASQ: u32 = tap_control_code(7);
pub const TAP_IOCTL_CONFIG_DHCP_SET_OPT: u32 = tap_control_code(9);
pub const TAP_IOCTL_CONFIG_TUN: u32 = tap_control_code(10);

fn pack(addresses: &[Ipv4Addr]) -> Vec<u8> {
    addresses.iter().flat_map(|a| a.octets()).collect()
}

/// `CONFIG_TUN` buffer: local address, remote network, remote netmask.
pub fn topology_buffer(request: &TopologyRequest) -> SetupResult<Vec<u8>> {
    let netmask = netmask_from_prefix_len(request.prefix_length)?;
    let network = Ipv4Addr::from(u32::from(request.local) & u32::from(netmask));
    let endpoints = match request.topology {
        Topology::Subnet => [request.local, network, netmask],
        Topology::Net30 => {
            let remote = Ipv4Addr::from(u32::from(network).wrapping_add(1));
            [request.local, remote, Ipv4Addr::BROADCAST]
        }
    };
    Ok(pack(&endpoints))
}

/// `CONFIG_DHCP_MASQ` buffer: address, netmask, DHCP server, lease time.
///
/// The DHCP server sits one below the subnet's broadcast address.
pub fn dhcp_masquerade_buffer(pulled: &PulledConfig) -> SetupResult<Vec<u8>> {
    let local4 = pulled.ipv4.as_ref().ok_or(SetupError::MissingIfconfig {
        family: tunsetup_common::Family::Ipv4,
    })?;
    let netmask = netmask_from_prefix_len(local4.prefix_length)?;
    let broadcast = u32::from(local4.address) | !u32::from(netmask);
    let server = Ipv4Addr::from(broadcast.wrapping_sub(1));

    let mut buf = pack(&[local4.address, netmask, server]);
    buf.extend_from_slice(&DHCP_LEASE_SECS.to_be_bytes());
    Ok(buf)
}

fn push_option(buf: &mut Vec<u8>, code: u8, data: &[u8]) {
    // Option length is a single byte
    let len = data.len().min(255);
    buf.push(code);
    buf.push(len as u8);
    buf.extend_from_slice(&data[..len]);
}

/// Raw DHCP options served by the masquerade: domain (15), DNS (6), WINS (44).
pub fn dhcp_options_buffer(pulled: &PulledConfig) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(domain) = pulled
        .search_domains
        .iter()
        .map(|d| d.domain.trim_start_matches('.'))
        .find(|d| !d.is_empty())
    {
        push_option(&mut buf, 15, domain.as_bytes());
    }

    let dns: Vec<Ipv4Addr> = pulled
        .dns_servers
        .iter()
        .filter_map(|s| match s.address {
            IpAddr::V4(a) => Some(a),
            IpAddr::V6(_) => None,
        })
        .collect();
    if !dns.is_empty() {
        push_option(&mut buf, 6, &pack(&dns));
    }

    let wins: Vec<Ipv4Addr> = pulled.wins_servers.iter().map(|w| w.address).collect();
    if !wins.is_empty() {
        push_option(&mut buf, 44, &pack(&wins));
    }
    buf
}

/// Formats the `GET_VERSION` reply.
pub fn format_driver_version(reply: &[u8]) -> SetupResult<String> {
    let word = |i: usize| -> SetupResult<u32> {
        reply
            .get(i * 4..i * 4 + 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| SetupError::internal("short driver version reply"))
    };
    let (major, minor, debug) = (word(0)?, word(1)?, word(2)?);
    Ok(format!(
        "TAP-Windows Driver Version {}.{}{}",
        major,
        minor,
        if debug != 0 { " (DEBUG)" } else { "" }
    ))
}

#[cfg(windows)]
fn device_ioctl(file: &File, code: u32, input: &[u8], output: &mut [u8]) -> SetupResult<usize> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::System::IO::DeviceIoControl;

    let mut returned: u32 = 0;
    // SAFETY: the buffers outlive the call and their lengths are passed alongside
    let ok = unsafe {
        DeviceIoControl(
            file.as_raw_handle() as _,
            code,
            input.as_ptr() as _,
            input.len() as u32,
            output.as_mut_ptr() as _,
            output.len() as u32,
            &mut returned,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(SetupError::internal(format!(
            "DeviceIoControl {:#x} failed: {}",
            code,
            std::io::Error::last_os_error()
        )));
    }
    Ok(returned as usize)
}

#[cfg(not(windows))]
fn device_ioctl(_file: &File, code: u32, _input: &[u8], _output: &mut [u8]) -> SetupResult<usize> {
    Err(SetupError::internal(format!(
        "TAP control code {:#x} requires a Windows host",
        code
    )))
}

/// The configured TAP adapter.
pub struct TapDevice {
    adapter: AdapterConfig,
}

impl TapDevice {
    pub fn new(adapter: AdapterConfig) -> Self {
        Self { adapter }
    }

    fn open_path(path: &str) -> std::io::Result<File> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;
            const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
            options.attributes(FILE_ATTRIBUTE_SYSTEM);
        }
        options.open(path)
    }
}

impl AdapterDevice for TapDevice {
    fn candidates(&self) -> SetupResult<Vec<AdapterIdentity>> {
        Ok(vec![self.adapter.identity()])
    }

    fn open(&self, candidates: &[AdapterIdentity]) -> SetupResult<OpenedAdapter> {
        let identity = candidates
            .first()
            .cloned()
            .ok_or_else(|| SetupError::adapter_acquisition("no TAP adapters found"))?;
        let path = self.adapter.device_path();
        let file = Self::open_path(&path).map_err(|e| {
            SetupError::adapter_acquisition(format!("cannot open {}: {}", path, e))
        })?;
        info!(adapter = %identity, path = %path, "TAP device opened");
        Ok(OpenedAdapter {
            handle: AdapterHandle::new(file),
            identity,
            path,
        })
    }

    fn driver_version(&self, handle: &AdapterHandle) -> SetupResult<String> {
        let mut reply = [0u8; 12];
        device_ioctl(handle.file(), TAP_IOCTL_GET_VERSION, &[], &mut reply)?;
        format_driver_version(&reply)
    }

    fn set_media_status(&self, handle: &AdapterHandle, connected: bool) -> SetupResult<()> {
        let status = u32::from(connected).to_le_bytes();
        let mut reply = [0u8; 4];
        device_ioctl(handle.file(), TAP_IOCTL_SET_MEDIA_STATUS, &status, &mut reply)?;
        Ok(())
    }

    fn configure_topology(&self, handle: &AdapterHandle, request: &TopologyRequest) -> SetupResult<()> {
        let buf = topology_buffer(request)?;
        let mut reply = [0u8; 12];
        device_ioctl(handle.file(), TAP_IOCTL_CONFIG_TUN, &buf, &mut reply)?;
        Ok(())
    }

    fn configure_dhcp_masquerade(&self, handle: &AdapterHandle, pulled: &PulledConfig) -> SetupResult<()> {
        let masq = dhcp_masquerade_buffer(pulled)?;
        let mut reply = [0u8; 16];
        device_ioctl(handle.file(), TAP_IOCTL_CONFIG_DHCP_MASQ, &masq, &mut reply)?;

        let options = dhcp_options_buffer(pulled);
        if !options.is_empty() {
            let mut reply = vec![0u8; options.len()];
            device_ioctl(handle.file(), TAP_IOCTL_CONFIG_DHCP_SET_OPT, &options, &mut reply)?;
        }
        Ok(())
    }
}

/// Host services backed by the shell, the configured TAP device and NRPT.
///
/// No leak-protection binding is provided.
pub fn host_services(adapter: &AdapterConfig) -> HostServices {
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
    HostServices {
        runner: runner.clone(),
        network: Arc::new(WindowsNetwork::new(runner.clone())),
        device: Arc::new(TapDevice::new(adapter.clone())),
        dns_policy: Arc::new(NrptTable::new(runner)),
        leak_guard: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DnsServer, SearchDomain, VpnIpv4, WinsServer};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_os_version() {
        let caps = parse_os_version("\r\nMicrosoft Windows [Version 10.0.19045.4046]\r\n").unwrap();
        assert_eq!(caps, PlatformCapabilities::current());
        let vista = parse_os_version("Microsoft Windows [Version 6.0.6002]").unwrap();
        assert!(vista.legacy_dns_syntax);
        assert!(parse_os_version("Linux").is_none());
    }

    #[test]
    fn test_parse_interface_config() {
        let output = "Configuration for interface \"Local Area Connection 2\"\r\n\
                      \x20   DHCP enabled:                         Yes\r\n\
                      \x20   IP Address:                           10.8.0.2\r\n\
                      \x20   Subnet Prefix:                        10.8.0.0/24 (mask 255.255.255.0)\r\n";
        assert!(parse_dhcp_enabled(output).unwrap());
        assert_eq!(parse_ipv4_addresses(output), vec![Ipv4Addr::new(10, 8, 0, 2)]);
        assert!(!parse_dhcp_enabled("DHCP enabled: No").unwrap());
        assert!(parse_dhcp_enabled("").is_err());
    }

    #[test]
    fn test_parse_default_route() {
        let gw = parse_default_route(r#"{"ifIndex": 4, "NextHop": "192.168.1.1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(gw.interface_index, 4);
        assert_eq!(gw.address, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(parse_default_route("").unwrap(), None);
        assert_eq!(
            parse_default_route(r#"{"ifIndex": 4, "NextHop": "0.0.0.0"}"#).unwrap(),
            None
        );
        assert!(parse_default_route("not json").is_err());
    }

    #[derive(Default)]
    struct Recorder {
        commands: std::sync::Mutex<Vec<String>>,
    }

    impl CommandRunner for Recorder {
        fn run(&self, command: &str) -> SetupResult<String> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(String::new())
        }
    }

    #[test]
    fn test_stale_route_cleanup_is_ipv4_only() {
        let recorder = Arc::new(Recorder::default());
        let network = WindowsNetwork::new(recorder.clone());
        network.delete_all_routes(12).unwrap();

        let commands = recorder.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("Remove-NetRoute -InterfaceIndex 12 -AddressFamily IPv4"));
    }

    #[test]
    fn test_nrpt_scripts() {
        assert_eq!(
            nrpt_create_script(
                &[".corp.example".to_string(), ".lab".to_string()],
                &["10.8.0.1".parse().unwrap()]
            ),
            "Add-DnsClientNrptRule -Namespace '.corp.example','.lab' -NameServers '10.8.0.1' -Comment 'tunsetupd'"
        );
        assert!(nrpt_delete_script().contains("$_.Comment -eq 'tunsetupd'"));
    }

    #[test]
    fn test_tap_control_codes() {
        assert_eq!(TAP_IOCTL_GET_VERSION, 0x0022_0008);
        assert_eq!(TAP_IOCTL_SET_MEDIA_STATUS, 0x0022_0018);
        assert_eq!(TAP_IOCTL_CONFIG_TUN, 0x0022_0028);
    }

    #[test]
    fn test_topology_buffers() {
        let subnet = TopologyRequest {
            topology: Topology::Subnet,
            local: Ipv4Addr::new(10, 8, 0, 2),
            prefix_length: 24,
        };
        assert_eq!(
            topology_buffer(&subnet).unwrap(),
            vec![10, 8, 0, 2, 10, 8, 0, 0, 255, 255, 255, 0]
        );

        let net30 = TopologyRequest {
            topology: Topology::Net30,
            local: Ipv4Addr::new(10, 8, 0, 6),
            prefix_length: 30,
        };
        assert_eq!(
            topology_buffer(&net30).unwrap(),
            vec![10, 8, 0, 6, 10, 8, 0, 5, 255, 255, 255, 255]
        );
    }

    #[test]
    fn test_dhcp_masquerade_buffers() {
        let mut pulled = PulledConfig::new("203.0.113.10".parse().unwrap());
        assert!(dhcp_masquerade_buffer(&pulled).is_err());

        pulled.ipv4 = Some(VpnIpv4 {
            address: Ipv4Addr::new(10, 8, 0, 2),
            prefix_length: 24,
            gateway: Ipv4Addr::new(10, 8, 0, 1),
            net30: false,
        });
        let masq = dhcp_masquerade_buffer(&pulled).unwrap();
        assert_eq!(&masq[..12], &[10, 8, 0, 2, 255, 255, 255, 0, 10, 8, 0, 254]);
        assert_eq!(&masq[12..], &DHCP_LEASE_SECS.to_be_bytes());

        assert!(dhcp_options_buffer(&pulled).is_empty());
        pulled.search_domains.push(SearchDomain {
            domain: ".lab".to_string(),
        });
        pulled.dns_servers.push(DnsServer {
            address: "fd00::53".parse().unwrap(),
        });
        pulled.dns_servers.push(DnsServer {
            address: "10.8.0.1".parse().unwrap(),
        });
        pulled.wins_servers.push(WinsServer {
            address: Ipv4Addr::new(10, 8, 0, 5),
        });
        assert_eq!(
            dhcp_options_buffer(&pulled),
            vec![15, 3, b'l', b'a', b'b', 6, 4, 10, 8, 0, 1, 44, 4, 10, 8, 0, 5]
        );
    }

    #[test]
    fn test_driver_version() {
        let mut reply = Vec::new();
        reply.extend_from_slice(&9u32.to_le_bytes());
        reply.extend_from_slice(&24u32.to_le_bytes());
        reply.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            format_driver_version(&reply).unwrap(),
            "TAP-Windows Driver Version 9.24"
        );
        assert!(format_driver_version(&reply[..8]).is_err());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_device_control_needs_windows() {
        let file = tempfile::tempfile().unwrap();
        let device = TapDevice::new(AdapterConfig::default());
        let handle = AdapterHandle::new(file);
        assert!(device.set_media_status(&handle, true).is_err());
    }
}
