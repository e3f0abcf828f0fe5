//! Common infrastructure for tunnel adapter setup.
//!
//! - [`error`]: fatal error kinds and the aggregated undo report
//! - [`shell`]: blocking host command execution with argument quoting
//! - [`progress`]: the line-oriented progress sink
//!
//! # Example
//!
//! ```ignore
//! use tunsetup_common::{shell::{self, IPCONFIG_CMD}, SetupResult};
//!
//! fn flush_dns() -> SetupResult<()> {
//!     shell::exec_or_throw(&format!("{} /flushdns", IPCONFIG_CMD))?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod progress;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{Family, SetupError, SetupResult, UndoFailure, UndoReport};
pub use progress::{ProgressLog, TracingLog};
