//! Reversible configuration actions
//!
//! An action is one host configuration step. Create sequences call
//! [`Action::apply`]; destroy sequences call [`Action::undo`], which for the
//! delete-style actions queued there is the same operation.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tunsetup_common::{ProgressLog, SetupError, SetupResult};

use crate::commands;
use crate::host::{CommandRunner, DnsPolicyTable, HostNetwork, LeakGuard};
use crate::types::AppIdentity;

/// A single host configuration step.
pub trait Action: Send + fmt::Display {
    fn apply(&self, log: &mut dyn ProgressLog) -> SetupResult<()>;

    /// Runs the step during teardown. Teardown continues past failures.
    fn undo(&self, log: &mut dyn ProgressLog) -> SetupResult<()> {
        self.apply(log)
    }
}

/// Runs one host command.
pub struct HostCommand {
    runner: Arc<dyn CommandRunner>,
    command: String,
}

impl HostCommand {
    pub fn new(runner: Arc<dyn CommandRunner>, command: String) -> Self {
        Self { runner, command }
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}

impl Action for HostCommand {
    fn apply(&self, log: &mut dyn ProgressLog) -> SetupResult<()> {
        let output = self.runner.run(&self.command)?;
        if !output.is_empty() {
            log.line(&output);
        }
        Ok(())
    }
}

/// Runs the wrapped action, reporting a failure instead of returning it.
pub struct BestEffort<A> {
    inner: A,
}

impl<A: Action> BestEffort<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

impl<A: Action> fmt::Display for BestEffort<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<A: Action> Action for BestEffort<A> {
    fn apply(&self, log: &mut dyn ProgressLog) -> SetupResult<()> {
        if let Err(e) = self.inner.apply(log) {
            warn!(action = %self.inner, error = %e, "Ignoring failed action");
            log.line(&format!("{} failed: {}", self.inner, e));
        }
        Ok(())
    }
}

/// Removes routes left on the adapter by an earlier session.
///
/// Failures are logged and swallowed: there may be nothing to delete.
pub struct DeleteAllRoutesOnInterface {
    network: Arc<dyn HostNetwork>,
    if_index: u32,
}

impl DeleteAllRoutesOnInterface {
    pub fn new(network: Arc<dyn HostNetwork>, if_index: u32) -> Self {
        Self { network, if_index }
    }
}

impl fmt::Display for DeleteAllRoutesOnInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeleteAllRoutesOnInterface iface_index={}", self.if_index)
    }
}

impl Action for DeleteAllRoutesOnInterface {
    fn apply(&self, log: &mut dyn ProgressLog) -> SetupResult<()> {
        if let Err(e) = self.network.delete_all_routes(self.if_index) {
            warn!(if_index = self.if_index, error = %e, "Stale route cleanup failed");
            log.line(&format!("stale route cleanup failed: {}", e));
        }
        Ok(())
    }
}

/// Creates the DNS policy table entry routing the suffixes to the servers.
pub struct DnsPolicyCreate {
    table: Arc<dyn DnsPolicyTable>,
    suffixes: Vec<String>,
    servers: Vec<IpAddr>,
}

impl DnsPolicyCreate {
    pub fn new(table: Arc<dyn DnsPolicyTable>, suffixes: Vec<String>, servers: Vec<IpAddr>) -> Self {
        Self {
            table,
            suffixes,
            servers,
        }
    }
}

impl fmt::Display for DnsPolicyCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let servers: Vec<String> = self.servers.iter().map(|s| s.to_string()).collect();
        write!(
            f,
            "NRPT::ActionCreate domains=[{}] servers=[{}]",
            self.suffixes.join(","),
            servers.join(",")
        )
    }
}

impl Action for DnsPolicyCreate {
    fn apply(&self, _log: &mut dyn ProgressLog) -> SetupResult<()> {
        self.table.create(&self.suffixes, &self.servers)
    }
}

/// Removes the DNS policy table entries created by [`DnsPolicyCreate`].
pub struct DnsPolicyDelete {
    table: Arc<dyn DnsPolicyTable>,
}

impl DnsPolicyDelete {
    pub fn new(table: Arc<dyn DnsPolicyTable>) -> Self {
        Self { table }
    }
}

impl fmt::Display for DnsPolicyDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NRPT::ActionDelete")
    }
}

impl Action for DnsPolicyDelete {
    fn apply(&self, _log: &mut dyn ProgressLog) -> SetupResult<()> {
        self.table.delete()
    }
}

/// Blocks (or unblocks) DNS on every interface except the adapter.
pub struct DnsLeakFilter {
    guard: Arc<dyn LeakGuard>,
    app: AppIdentity,
    if_index: u32,
    block: bool,
}

impl DnsLeakFilter {
    pub fn new(guard: Arc<dyn LeakGuard>, app: AppIdentity, if_index: u32, block: bool) -> Self {
        Self {
            guard,
            app,
            if_index,
            block,
        }
    }
}

impl fmt::Display for DnsLeakFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActionWFP iface_index={} enable={} app={}",
            self.if_index, self.block, self.app
        )
    }
}

impl Action for DnsLeakFilter {
    fn apply(&self, _log: &mut dyn ProgressLog) -> SetupResult<()> {
        if self.block {
            self.guard.block_dns(&self.app, self.if_index)
        } else {
            self.guard.unblock_dns(&self.app, self.if_index)
        }
    }
}

/// Switches the adapter to DHCP addressing if it is not already.
pub struct EnsureDhcp {
    network: Arc<dyn HostNetwork>,
    runner: Arc<dyn CommandRunner>,
    if_index: u32,
}

impl EnsureDhcp {
    pub fn new(network: Arc<dyn HostNetwork>, runner: Arc<dyn CommandRunner>, if_index: u32) -> Self {
        Self {
            network,
            runner,
            if_index,
        }
    }
}

impl fmt::Display for EnsureDhcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnsureDHCP iface_index={}", self.if_index)
    }
}

impl Action for EnsureDhcp {
    fn apply(&self, log: &mut dyn ProgressLog) -> SetupResult<()> {
        if self.network.dhcp_enabled(self.if_index)? {
            return Ok(());
        }
        log.line("TAP: DHCP is disabled, attempting to enable");
        self.runner
            .run(&commands::build_enable_dhcp_cmd(self.if_index))
            .map(|_| ())
    }
}

/// Polls until the adapter reports its address (legacy hosts).
pub struct WaitForAddress {
    network: Arc<dyn HostNetwork>,
    if_index: u32,
    address: Ipv4Addr,
    attempts: u32,
    interval: Duration,
    cancel: CancellationToken,
}

impl WaitForAddress {
    pub fn new(
        network: Arc<dyn HostNetwork>,
        if_index: u32,
        address: Ipv4Addr,
        attempts: u32,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            network,
            if_index,
            address,
            attempts,
            interval,
            cancel,
        }
    }
}

impl fmt::Display for WaitForAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WaitForAddress iface_index={} address={} attempts={}",
            self.if_index, self.address, self.attempts
        )
    }
}

impl Action for WaitForAddress {
    fn apply(&self, log: &mut dyn ProgressLog) -> SetupResult<()> {
        for attempt in 1..=self.attempts {
            if self.cancel.is_cancelled() {
                return Err(SetupError::cancelled("adapter readiness wait"));
            }
            log.line(&format!(
                "[{}] waiting for TAP adapter to receive DHCP settings...",
                attempt
            ));
            match self.network.has_address(self.if_index, self.address) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => debug!(attempt, error = %e, "Adapter status query failed"),
            }
            if attempt < self.attempts {
                thread::sleep(self.interval);
            }
        }
        Err(SetupError::dhcp_handshake_timeout(self.attempts))
    }
}

/// Fixed pause letting the adapter finish coming up.
pub struct Settle {
    delay: Duration,
}

impl Settle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl fmt::Display for Settle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sleeping {} seconds prior to adding routes...", self.delay.as_secs())
    }
}

impl Action for Settle {
    fn apply(&self, _log: &mut dyn ProgressLog) -> SetupResult<()> {
        thread::sleep(self.delay);
        Ok(())
    }
}
