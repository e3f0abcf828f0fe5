//! Ordered create/destroy action sequences
//!
//! A [`SequenceBuilder`] collects the create actions and their destroy
//! counterparts side by side, so the two sequences cannot drift apart.
//! The create sequence is applied in order and stops at the first failure.
//! The destroy sequence only runs once it has been armed, and runs every
//! action even when some of them fail.

use std::fmt;

use tracing::{debug, info, warn};
use tunsetup_common::{ProgressLog, SetupResult, UndoFailure, UndoReport};

use crate::action::Action;

struct Entry {
    action: Box<dyn Action>,
    /// Whether a destroy action was queued for this one
    reverted: bool,
}

/// Builds a create sequence and its matching destroy sequence.
#[derive(Default)]
pub struct SequenceBuilder {
    create: Vec<Entry>,
    destroy: Vec<Entry>,
}

impl SequenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a create action that leaves nothing behind to reverse.
    pub fn add(&mut self, create: impl Action + 'static) -> &mut Self {
        self.create.push(Entry {
            action: Box::new(create),
            reverted: false,
        });
        self
    }

    /// Queues a create action together with the destroy action reversing it.
    pub fn add_reverted(
        &mut self,
        create: impl Action + 'static,
        destroy: impl Action + 'static,
    ) -> &mut Self {
        self.create.push(Entry {
            action: Box::new(create),
            reverted: true,
        });
        self.destroy.push(Entry {
            action: Box::new(destroy),
            reverted: false,
        });
        self
    }

    /// Returns `(create, destroy)`.
    pub fn build(self) -> (ActionSequence, ActionSequence) {
        (
            ActionSequence::from_entries(self.create),
            ActionSequence::from_entries(self.destroy),
        )
    }
}

/// An ordered list of actions with an armed flag.
pub struct ActionSequence {
    entries: Vec<Entry>,
    armed: bool,
}

impl ActionSequence {
    fn from_entries(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            armed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per action, in execution order.
    pub fn descriptions(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.action.to_string()).collect()
    }

    /// Number of actions that have a destroy counterpart.
    pub fn reverted_count(&self) -> usize {
        self.entries.iter().filter(|e| e.reverted).count()
    }

    /// Applies every action in insertion order, stopping at the first failure.
    pub fn apply_all(&self, log: &mut dyn ProgressLog) -> SetupResult<()> {
        for (index, entry) in self.entries.iter().enumerate() {
            let description = entry.action.to_string();
            log.line(&description);
            debug!(index, action = %description, "Applying action");

            if let Err(e) = entry.action.apply(log) {
                warn!(index, action = %description, error = %e, "Action failed");
                log.line(&format!("{} failed: {}", description, e));
                return Err(e.during_apply(index, description));
            }
        }
        info!(count = self.entries.len(), "Action sequence applied");
        Ok(())
    }

    /// Makes the sequence eligible for [`ActionSequence::undo_all`].
    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Runs every action's undo in sequence order, continuing past failures.
    ///
    /// Has no effect unless the sequence is armed. Disarms the sequence.
    pub fn undo_all(&mut self, log: &mut dyn ProgressLog) -> UndoReport {
        let mut report = UndoReport::default();
        if !self.armed {
            debug!("Destroy sequence not armed, nothing to undo");
            return report;
        }

        for (index, entry) in self.entries.iter().enumerate() {
            let description = entry.action.to_string();
            log.line(&description);
            report.attempted += 1;

            if let Err(e) = entry.action.undo(log) {
                warn!(index, action = %description, error = %e, "Undo failed");
                log.line(&format!("Exception: {}", e));
                report.failures.push(UndoFailure {
                    index,
                    action: description,
                    error: e,
                });
            }
        }

        self.armed = false;
        if report.is_clean() {
            info!(count = report.attempted, "Destroy sequence completed");
        } else {
            warn!(
                count = report.attempted,
                failed = report.failures.len(),
                "Destroy sequence completed with failures"
            );
        }
        report
    }
}

impl fmt::Debug for ActionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSequence")
            .field("actions", &self.descriptions())
            .field("armed", &self.armed)
            .finish()
    }
}
