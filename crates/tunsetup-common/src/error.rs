//! Error types for tunnel adapter setup.
//!
//! Fatal conditions are variants of [`SetupError`]. Undo failures during
//! teardown are never raised as errors; they are collected into an
//! [`UndoReport`] so callers can see exactly which cleanup step failed.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for setup operations.
pub type SetupResult<T> = Result<T, SetupError>;

/// Address family named in family-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Ipv4 => write!(f, "IPv4"),
            Family::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Errors that can occur while establishing a tunnel adapter.
#[derive(Debug, Error)]
pub enum SetupError {
    /// No adapter could be opened. Nothing on the host was changed.
    #[error("Cannot acquire tunnel adapter: {reason}")]
    AdapterAcquisition {
        /// Why acquisition failed.
        reason: String,
    },

    /// A pushed route references a family with no configured address.
    #[error("{family} routes pushed without {family} ifconfig")]
    MissingIfconfig {
        /// The family lacking an interface address.
        family: Family,
    },

    /// Redirect-gateway was requested but no default gateway exists.
    #[error("{context} error: cannot detect default gateway")]
    GatewayDetection {
        /// The policy step that needed the gateway.
        context: String,
    },

    /// The adapter never reported its expected address (legacy path).
    #[error("Adapter DHCP handshake failed after {attempts} attempts")]
    DhcpHandshakeTimeout {
        /// Number of polls performed.
        attempts: u32,
        /// Number of create actions applied before the wait started.
        applied: usize,
    },

    /// A create action failed; the remaining create actions did not run.
    #[error("Action #{index} failed ({action}) after {applied} applied: {source}")]
    ActionApply {
        /// Position of the failing action in the create sequence.
        index: usize,
        /// Description of the failing action.
        action: String,
        /// Number of actions that had already been applied.
        applied: usize,
        /// The underlying failure.
        #[source]
        source: Box<SetupError>,
    },

    /// Establishment was cancelled by the caller.
    #[error("Setup cancelled during {stage}")]
    Cancelled {
        /// The stage that observed the cancellation.
        stage: String,
        /// Number of create actions applied before the cancellation.
        applied: usize,
    },

    /// Failed to spawn a host command.
    #[error("Failed to execute host command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Host command returned a non-zero exit code.
    #[error("Host command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl SetupError {
    /// Creates an adapter acquisition error.
    pub fn adapter_acquisition(reason: impl Into<String>) -> Self {
        Self::AdapterAcquisition {
            reason: reason.into(),
        }
    }

    /// Creates a gateway detection error.
    pub fn gateway_detection(context: impl Into<String>) -> Self {
        Self::GatewayDetection {
            context: context.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
            applied: 0,
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a DHCP handshake timeout error.
    pub fn dhcp_handshake_timeout(attempts: u32) -> Self {
        Self::DhcpHandshakeTimeout {
            attempts,
            applied: 0,
        }
    }

    /// Returns true if the host may hold state from this failed attempt,
    /// i.e. at least one create action was applied before the failure.
    pub fn is_partial(&self) -> bool {
        self.applied() > 0
    }

    /// Number of create actions applied before the failure.
    pub fn applied(&self) -> usize {
        match self {
            SetupError::ActionApply { applied, .. }
            | SetupError::DhcpHandshakeTimeout { applied, .. }
            | SetupError::Cancelled { applied, .. } => *applied,
            _ => 0,
        }
    }

    /// Records how many create actions ran before this failure.
    ///
    /// Handshake timeouts and cancellations keep their own kind; any other
    /// failure is wrapped in [`SetupError::ActionApply`].
    pub fn during_apply(self, index: usize, action: String) -> Self {
        match self {
            SetupError::DhcpHandshakeTimeout { attempts, .. } => SetupError::DhcpHandshakeTimeout {
                attempts,
                applied: index,
            },
            SetupError::Cancelled { stage, .. } => SetupError::Cancelled {
                stage,
                applied: index,
            },
            other => SetupError::ActionApply {
                index,
                action,
                applied: index,
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost cause, looking through action wrappers.
    pub fn root_cause(&self) -> &SetupError {
        match self {
            SetupError::ActionApply { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// One failed undo step recorded during teardown.
#[derive(Debug)]
pub struct UndoFailure {
    /// Position of the action in the destroy sequence.
    pub index: usize,
    /// Description of the action.
    pub action: String,
    /// What went wrong.
    pub error: SetupError,
}

impl fmt::Display for UndoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "undo #{} ({}) failed: {}", self.index, self.action, self.error)
    }
}

/// Outcome of running a destroy sequence.
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Number of actions whose undo ran.
    pub attempted: usize,
    /// The undos that failed, in execution order.
    pub failures: Vec<UndoFailure>,
}

impl UndoReport {
    /// Returns true if every undo succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the descriptions of the failed actions.
    pub fn failed_actions(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.action.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(command: &str) -> SetupError {
        SetupError::ShellCommandFailed {
            command: command.to_string(),
            exit_code: 1,
            output: "Element not found.".to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = SetupError::MissingIfconfig {
            family: Family::Ipv4,
        };
        assert_eq!(err.to_string(), "IPv4 routes pushed without IPv4 ifconfig");

        let err = SetupError::gateway_detection("redirect-gateway");
        assert_eq!(
            err.to_string(),
            "redirect-gateway error: cannot detect default gateway"
        );
    }

    #[test]
    fn test_shell_command_failed() {
        let err = failed("netsh interface ip add route 10.0.0.0/8 12 10.8.0.1 store=active");
        assert!(err.to_string().contains("netsh interface ip add route"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_partial_marker() {
        let first = SetupError::ActionApply {
            index: 0,
            action: "a".to_string(),
            applied: 0,
            source: Box::new(failed("a")),
        };
        assert!(!first.is_partial());

        let later = SetupError::ActionApply {
            index: 3,
            action: "d".to_string(),
            applied: 3,
            source: Box::new(failed("d")),
        };
        assert!(later.is_partial());
        assert!(matches!(
            later.root_cause(),
            SetupError::ShellCommandFailed { .. }
        ));

        assert!(!SetupError::internal("bug").is_partial());
    }

    #[test]
    fn test_during_apply_keeps_wait_kinds() {
        let err = SetupError::dhcp_handshake_timeout(30).during_apply(5, "wait".to_string());
        assert!(matches!(
            err,
            SetupError::DhcpHandshakeTimeout {
                attempts: 30,
                applied: 5
            }
        ));
        assert!(err.is_partial());

        let err = SetupError::cancelled("wait").during_apply(2, "wait".to_string());
        assert!(matches!(err, SetupError::Cancelled { applied: 2, .. }));
        assert!(!SetupError::cancelled("policy").is_partial());

        let err = failed("route ADD").during_apply(1, "route ADD".to_string());
        assert!(matches!(
            err,
            SetupError::ActionApply {
                index: 1,
                applied: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_undo_report() {
        let mut report = UndoReport::default();
        assert!(report.is_clean());

        report.attempted = 2;
        report.failures.push(UndoFailure {
            index: 1,
            action: "ipconfig /flushdns".to_string(),
            error: failed("ipconfig /flushdns"),
        });
        assert!(!report.is_clean());
        assert_eq!(report.failed_actions(), vec!["ipconfig /flushdns"]);
        assert!(report.failures[0].to_string().starts_with("undo #1"));
    }
}
