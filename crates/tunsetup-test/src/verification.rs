//! Verification helpers for testing the setup engine
//!
//! Assertions over the fake host's journal of commands and driver calls

use thiserror::Error;

use crate::fake_host::FakeHost;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected journal entry containing '{pattern}' not found")]
    EntryNotFound { pattern: String },

    #[error("Unexpected journal entry '{entry}' matched '{pattern}'")]
    UnexpectedEntry { pattern: String, entry: String },

    #[error("'{first}' expected before '{second}'")]
    OrderMismatch { first: String, second: String },

    #[error("Command {index} mismatch: expected '{expected}', got '{actual}'")]
    CommandMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Expected {expected} commands, found {actual}")]
    CommandCountMismatch { expected: usize, actual: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Journal verification helper
pub struct JournalVerifier<'a> {
    host: &'a FakeHost,
}

impl<'a> JournalVerifier<'a> {
    pub fn new(host: &'a FakeHost) -> Self {
        Self { host }
    }

    fn entries(&self) -> Vec<String> {
        self.host.journal().iter().map(|e| e.to_string()).collect()
    }

    fn position(entries: &[String], pattern: &str) -> VerifyResult<usize> {
        entries
            .iter()
            .position(|e| e.contains(pattern))
            .ok_or_else(|| VerificationError::EntryNotFound {
                pattern: pattern.to_string(),
            })
    }

    /// Verify that some journal entry contains `pattern`
    pub fn assert_contains(&self, pattern: &str) -> VerifyResult<()> {
        Self::position(&self.entries(), pattern).map(|_| ())
    }

    /// Verify that no journal entry contains `pattern`
    pub fn assert_absent(&self, pattern: &str) -> VerifyResult<()> {
        match self.entries().into_iter().find(|e| e.contains(pattern)) {
            Some(entry) => Err(VerificationError::UnexpectedEntry {
                pattern: pattern.to_string(),
                entry,
            }),
            None => Ok(()),
        }
    }

    /// Verify that the first match of each pattern appears in the given order
    pub fn assert_in_order(&self, patterns: &[&str]) -> VerifyResult<()> {
        let entries = self.entries();
        let mut last: Option<(usize, &str)> = None;
        for pattern in patterns {
            let index = Self::position(&entries, pattern)?;
            if let Some((prev_index, prev)) = last {
                if index <= prev_index {
                    return Err(VerificationError::OrderMismatch {
                        first: prev.to_string(),
                        second: pattern.to_string(),
                    });
                }
            }
            last = Some((index, *pattern));
        }
        Ok(())
    }

    /// Verify the exact list of host command lines
    pub fn assert_commands_eq(&self, expected: &[&str]) -> VerifyResult<()> {
        let actual = self.host.commands();
        for (index, (want, got)) in expected.iter().zip(actual.iter()).enumerate() {
            if want != got {
                return Err(VerificationError::CommandMismatch {
                    index,
                    expected: want.to_string(),
                    actual: got.clone(),
                });
            }
        }
        if expected.len() != actual.len() {
            return Err(VerificationError::CommandCountMismatch {
                expected: expected.len(),
                actual: actual.len(),
            });
        }
        Ok(())
    }

    /// Number of entries containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.entries().iter().filter(|e| e.contains(pattern)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunsetupd::CommandRunner;

    #[test]
    fn test_order_and_absence() {
        let host = FakeHost::new();
        host.run("netsh interface ip set address 12 static").unwrap();
        host.run("route ADD 0.0.0.0").unwrap();

        let verifier = JournalVerifier::new(&host);
        verifier.assert_in_order(&["set address", "route ADD"]).unwrap();
        assert!(verifier.assert_in_order(&["route ADD", "set address"]).is_err());
        verifier.assert_absent("dnsserver").unwrap();
        assert!(matches!(
            verifier.assert_absent("route"),
            Err(VerificationError::UnexpectedEntry { .. })
        ));
        assert_eq!(verifier.count("netsh"), 1);
    }

    #[test]
    fn test_commands_eq_reports_first_mismatch() {
        let host = FakeHost::new();
        host.run("a").unwrap();
        host.run("b").unwrap();

        let verifier = JournalVerifier::new(&host);
        verifier.assert_commands_eq(&["a", "b"]).unwrap();
        assert!(matches!(
            verifier.assert_commands_eq(&["a", "c"]),
            Err(VerificationError::CommandMismatch { index: 1, .. })
        ));
        assert!(matches!(
            verifier.assert_commands_eq(&["a"]),
            Err(VerificationError::CommandCountMismatch { expected: 1, actual: 2 })
        ));
    }
}
