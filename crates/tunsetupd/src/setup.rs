//! Tunnel adapter setup orchestrator
//!
//! [`TunnelSetup`] owns the destroy sequence of the current session and is the
//! only long-lived mutable state in the engine. Dropping it tears the session
//! down if a destroy sequence is still armed.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunsetup_common::{ProgressLog, SetupError, SetupResult, TracingLog, UndoReport};

use crate::action_list::ActionSequence;
use crate::host::{AdapterHandle, HostServices, OpenedAdapter};
use crate::policy::{AdapterConfigPolicy, AdapterPlan, PolicyInput};
use crate::types::{
    AdapterIdentity, AppIdentity, DefaultGateway, LegacyTiming, PlatformCapabilities,
    PulledConfig,
};

/// Establish/teardown lifecycle of a tunnel adapter.
pub trait TunSetup {
    /// Opens an adapter and applies the pulled configuration to the host.
    ///
    /// Any session still armed is torn down first. On success the caller
    /// owns the returned handle.
    fn establish(
        &mut self,
        pulled: &PulledConfig,
        app: &AppIdentity,
        cancel: &CancellationToken,
        log: &mut dyn ProgressLog,
    ) -> SetupResult<AdapterHandle>;

    /// Reverses the armed session. A no-op when nothing is armed.
    fn teardown(&mut self, log: &mut dyn ProgressLog) -> UndoReport;
}

/// Construction options for [`TunnelSetup`].
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Overrides the capabilities reported by the host
    pub capabilities: Option<PlatformCapabilities>,
    pub legacy: LegacyTiming,
}

pub struct TunnelSetup {
    host: HostServices,
    policy: AdapterConfigPolicy,
    destroy: Option<ActionSequence>,
}

impl TunnelSetup {
    /// Creates an orchestrator. Host capabilities are queried once, here.
    pub fn new(host: HostServices, options: SetupOptions) -> Self {
        let mut caps = options
            .capabilities
            .unwrap_or_else(|| host.network.platform_capabilities());
        if caps.leak_protection && host.leak_guard.is_none() {
            warn!("Leak protection supported by host but no filter binding available, disabling");
            caps.leak_protection = false;
        }
        info!(
            dns_policy_table = caps.dns_policy_table,
            leak_protection = caps.leak_protection,
            legacy_dns_syntax = caps.legacy_dns_syntax,
            legacy_adapter_setup = caps.legacy_adapter_setup,
            "Tunnel setup initialized"
        );

        let policy = AdapterConfigPolicy::new(caps, options.legacy, host.clone());
        Self {
            host,
            policy,
            destroy: None,
        }
    }

    pub fn capabilities(&self) -> &PlatformCapabilities {
        self.policy.capabilities()
    }

    /// Whether a session's destroy sequence is armed.
    pub fn is_armed(&self) -> bool {
        self.destroy.as_ref().is_some_and(|d| d.is_armed())
    }

    /// Whether an unarmed destroy sequence from a failed establish is held.
    pub fn has_partial(&self) -> bool {
        self.destroy.as_ref().is_some_and(|d| !d.is_armed())
    }

    /// Builds the plan for `adapter` without touching the host.
    pub fn plan(
        &self,
        adapter: &AdapterIdentity,
        pulled: &PulledConfig,
        app: &AppIdentity,
    ) -> SetupResult<AdapterPlan> {
        let gateway = self.default_gateway();
        self.policy.build(
            PolicyInput {
                adapter,
                pulled,
                gateway,
                app,
            },
            &CancellationToken::new(),
        )
    }

    /// Runs the destroy sequence retained after a failed establish.
    ///
    /// Every undo runs, including those for actions that never applied, so
    /// some failures are expected. Does nothing if no sequence is held.
    pub fn cleanup_partial(&mut self, log: &mut dyn ProgressLog) -> UndoReport {
        match self.destroy.take() {
            Some(mut destroy) => {
                info!(actions = destroy.len(), "Cleaning up partial setup");
                destroy.arm();
                destroy.undo_all(log)
            }
            None => UndoReport::default(),
        }
    }

    fn default_gateway(&self) -> Option<DefaultGateway> {
        match self.host.network.default_gateway() {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(error = %e, "Default gateway query failed");
                None
            }
        }
    }

    fn open_adapter(&self, log: &mut dyn ProgressLog) -> SetupResult<OpenedAdapter> {
        let candidates = self
            .host
            .device
            .candidates()
            .map_err(|e| SetupError::adapter_acquisition(e.to_string()))?;
        log.line("TAP ADAPTERS:");
        for candidate in &candidates {
            log.line(&candidate.to_string());
        }

        match self.host.device.open(&candidates) {
            Ok(opened) => {
                log.line(&format!(
                    "Open TAP device \"{}\" PATH=\"{}\" SUCCEEDED",
                    opened.identity.name, opened.path
                ));
                Ok(opened)
            }
            Err(e) => {
                log.line(&format!("Open TAP device FAILED: {}", e));
                Err(match e {
                    e @ SetupError::AdapterAcquisition { .. } => e,
                    other => SetupError::adapter_acquisition(other.to_string()),
                })
            }
        }
    }

    /// Device-level settings that must be in place before the create sequence.
    ///
    /// A failure leaves the media status disconnected and is reported as an
    /// acquisition error, since no host configuration has been touched yet.
    fn prepare_device(
        &self,
        handle: &AdapterHandle,
        plan: &AdapterPlan,
        pulled: &PulledConfig,
        log: &mut dyn ProgressLog,
    ) -> SetupResult<()> {
        self.host
            .device
            .set_media_status(handle, true)
            .map_err(|e| SetupError::adapter_acquisition(format!("set media status: {}", e)))?;
        if let Err(e) = self.configure_device(handle, plan, pulled, log) {
            if let Err(revert) = self.host.device.set_media_status(handle, false) {
                warn!(error = %revert, "Cannot reset adapter media status");
            }
            log.line(&format!("Configure TAP device FAILED: {}", e));
            return Err(SetupError::adapter_acquisition(e.to_string()));
        }
        Ok(())
    }

    fn configure_device(
        &self,
        handle: &AdapterHandle,
        plan: &AdapterPlan,
        pulled: &PulledConfig,
        log: &mut dyn ProgressLog,
    ) -> SetupResult<()> {
        if let Some(topology) = &plan.topology {
            debug!(%topology, "Configuring adapter topology");
            self.host.device.configure_topology(handle, topology)?;
        }
        if self.capabilities().legacy_adapter_setup {
            log.line("TAP: configure DHCP masquerade");
            self.host.device.configure_dhcp_masquerade(handle, pulled)?;
        }
        Ok(())
    }
}

impl TunSetup for TunnelSetup {
    fn establish(
        &mut self,
        pulled: &PulledConfig,
        app: &AppIdentity,
        cancel: &CancellationToken,
        log: &mut dyn ProgressLog,
    ) -> SetupResult<AdapterHandle> {
        // Leftovers of an earlier session
        self.teardown(log);

        let opened = self.open_adapter(log)?;
        match self.host.device.driver_version(&opened.handle) {
            Ok(version) => log.line(&version),
            Err(e) => warn!(error = %e, "Cannot read adapter driver version"),
        }

        let gateway = self.default_gateway();
        let plan = self.policy.build(
            PolicyInput {
                adapter: &opened.identity,
                pulled,
                gateway,
                app,
            },
            cancel,
        )?;
        for warning in &plan.warnings {
            warn!(%warning, "Configuration skipped");
            log.note(&warning.to_string());
        }

        self.prepare_device(&opened.handle, &plan, pulled, log)?;

        let AdapterPlan {
            create, destroy, ..
        } = plan;
        // Held unarmed until every create action succeeds
        self.destroy = Some(destroy);
        create.apply_all(log)?;
        if let Some(destroy) = self.destroy.as_mut() {
            destroy.arm();
        }

        info!(
            adapter = %opened.identity,
            actions = create.len(),
            "Tunnel adapter established"
        );
        Ok(opened.handle)
    }

    fn teardown(&mut self, log: &mut dyn ProgressLog) -> UndoReport {
        let Some(mut destroy) = self.destroy.take() else {
            return UndoReport::default();
        };
        if !destroy.is_armed() {
            debug!("Discarding unarmed destroy sequence");
            return UndoReport::default();
        }
        let report = destroy.undo_all(log);
        info!(
            attempted = report.attempted,
            failed = report.failures.len(),
            "Tunnel adapter torn down"
        );
        report
    }
}

impl Drop for TunnelSetup {
    fn drop(&mut self) {
        if self.is_armed() {
            let mut log = TracingLog;
            self.teardown(&mut log);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::null;
    use std::net::Ipv4Addr;

    fn pulled() -> PulledConfig {
        let mut pulled = PulledConfig::new("203.0.113.10".parse().unwrap());
        pulled.ipv4 = Some(crate::types::VpnIpv4 {
            address: Ipv4Addr::new(10, 8, 0, 2),
            prefix_length: 24,
            gateway: Ipv4Addr::new(10, 8, 0, 1),
            net30: false,
        });
        pulled
    }

    #[test]
    fn test_missing_leak_guard_disables_leak_protection() {
        let mut host = null::services();
        host.leak_guard = None;
        let setup = TunnelSetup::new(host, SetupOptions::default());
        assert!(!setup.capabilities().leak_protection);
        assert!(setup.capabilities().dns_policy_table);
    }

    #[test]
    fn test_capability_override() {
        let options = SetupOptions {
            capabilities: Some(PlatformCapabilities::from_os_version(5, 1)),
            ..Default::default()
        };
        let setup = TunnelSetup::new(null::services(), options);
        assert!(setup.capabilities().legacy_adapter_setup);
    }

    #[test]
    fn test_acquisition_failure_changes_nothing() {
        let mut setup = TunnelSetup::new(null::services(), SetupOptions::default());
        let mut log: Vec<String> = Vec::new();
        let err = setup
            .establish(
                &pulled(),
                &AppIdentity::default(),
                &CancellationToken::new(),
                &mut log,
            )
            .unwrap_err();
        assert!(matches!(err, SetupError::AdapterAcquisition { .. }));
        assert!(!err.is_partial());
        assert!(!setup.is_armed());
        assert!(!setup.has_partial());
        assert_eq!(log[0], "TAP ADAPTERS:");
        assert!(log[1].starts_with("Open TAP device FAILED"));
    }

    #[test]
    fn test_teardown_without_session_is_noop() {
        let mut setup = TunnelSetup::new(null::services(), SetupOptions::default());
        let mut log: Vec<String> = Vec::new();
        let report = setup.teardown(&mut log);
        assert_eq!(report.attempted, 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_plan_does_not_arm() {
        let setup = TunnelSetup::new(null::services(), SetupOptions::default());
        let adapter = AdapterIdentity {
            index: 7,
            name: "TAP".to_string(),
            guid: String::new(),
        };
        let plan = setup
            .plan(&adapter, &pulled(), &AppIdentity::default())
            .unwrap();
        assert_eq!(plan.create.len(), 3);
        assert!(!setup.is_armed());
    }
}
