//! Transactional tunnel adapter configuration
//!
//! Brings a VPN session's pulled configuration (addresses, routes, DNS, WINS,
//! gateway redirection) onto the host's tunnel adapter and reverses every
//! change on teardown.
//!
//! - [`policy`]: pulled configuration -> create/destroy action sequences
//! - [`action_list`]: ordered application and best-effort reversal
//! - [`setup`]: the [`TunnelSetup`] orchestrator and its session state
//! - [`host`]: the collaborator traits the engine drives
//! - [`system`]: host-backed collaborators used by the daemon
//!
//! # Example
//!
//! ```ignore
//! use tunsetupd::{SetupOptions, TunSetup, TunnelSetup};
//!
//! let mut setup = TunnelSetup::new(system::host_services(&config.adapter), SetupOptions::default());
//! let handle = setup.establish(&pulled, &app, &cancel, &mut TracingLog)?;
//! // ... data plane ...
//! let report = setup.teardown(&mut TracingLog);
//! ```

pub mod action;
pub mod action_list;
pub mod commands;
pub mod config;
pub mod host;
pub mod policy;
pub mod setup;
pub mod system;
pub mod types;

pub use action::Action;
pub use action_list::{ActionSequence, SequenceBuilder};
pub use config::DaemonConfig;
pub use host::{
    AdapterDevice, AdapterHandle, CommandRunner, DnsPolicyTable, HostNetwork, HostServices,
    LeakGuard, OpenedAdapter,
};
pub use policy::{AdapterConfigPolicy, AdapterPlan, PolicyInput, PolicyWarning};
pub use setup::{SetupOptions, TunSetup, TunnelSetup};
pub use types::{
    AdapterIdentity, AppIdentity, DefaultGateway, LegacyTiming, PlatformCapabilities,
    PulledConfig,
};
