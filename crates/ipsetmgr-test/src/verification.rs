//! Verification helpers for recorded executor calls

use thiserror::Error;

use crate::recorder::RecordedCall;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected command containing '{expected}' not found in {actual:?}")]
    CommandMissing {
        expected: String,
        actual: Vec<String>,
    },

    #[error("Unexpected command containing '{pattern}': '{command}'")]
    UnexpectedCommand { pattern: String, command: String },

    #[error("Expected {expected} commands, found {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Expected call sequence not found.\nexpected: {expected:#?}\nactual: {actual:#?}")]
    SequenceNotFound {
        expected: Vec<RecordedCall>,
        actual: Vec<RecordedCall>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Checks that `expected` occurs as one contiguous, ordered run in `actual`
///
/// An empty expectation always matches.
pub fn assert_has_calls(actual: &[RecordedCall], expected: &[RecordedCall]) -> VerifyResult<()> {
    if expected.is_empty() || actual.windows(expected.len()).any(|w| w == expected) {
        Ok(())
    } else {
        Err(VerificationError::SequenceNotFound {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

/// Command execution verifier
pub struct CommandVerifier {
    calls: Vec<RecordedCall>,
}

impl CommandVerifier {
    /// Create a new command verifier
    pub fn new(calls: Vec<RecordedCall>) -> Self {
        Self { calls }
    }

    fn commands(&self) -> Vec<String> {
        self.calls.iter().map(RecordedCall::command).collect()
    }

    /// Verify that a matching command was executed
    pub fn assert_command_executed(&self, expected: &str) -> VerifyResult<()> {
        if self.commands().iter().any(|cmd| cmd.contains(expected)) {
            Ok(())
        } else {
            Err(VerificationError::CommandMissing {
                expected: expected.to_string(),
                actual: self.commands(),
            })
        }
    }

    /// Verify that no matching command was executed
    pub fn assert_command_not_executed(&self, pattern: &str) -> VerifyResult<()> {
        match self.commands().into_iter().find(|cmd| cmd.contains(pattern)) {
            Some(command) => Err(VerificationError::UnexpectedCommand {
                pattern: pattern.to_string(),
                command,
            }),
            None => Ok(()),
        }
    }

    /// Verify the number of commands executed
    pub fn assert_command_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.calls.len();
        if actual != expected {
            Err(VerificationError::CountMismatch { expected, actual })
        } else {
            Ok(())
        }
    }

    /// Verify that `expected` was executed as a contiguous run
    pub fn assert_has_calls(&self, expected: &[RecordedCall]) -> VerifyResult<()> {
        assert_has_calls(&self.calls, expected)
    }

    /// Get all captured calls
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }
}
