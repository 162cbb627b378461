//! Recording executor double
//!
//! Stores every call verbatim and fails the calls selected by the test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ipsetmgr_common::shell::render_argv;
use ipsetmgr_common::{CommandExecutor, IpsetError, IpsetResult};

/// One executor invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Full argv, binary first
    pub argv: Vec<String>,
    /// Payload delivered on stdin
    pub process_input: Option<String>,
    /// Whether elevation was requested
    pub run_as_root: bool,
}

impl RecordedCall {
    /// Create a privileged call without input, the shape of most ipset commands
    pub fn new(argv: &[&str]) -> Self {
        Self {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            process_input: None,
            run_as_root: true,
        }
    }

    /// Attach a stdin payload
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.process_input = Some(input.into());
        self
    }

    /// The argv rendered as one line
    pub fn command(&self) -> String {
        render_argv(&self.argv)
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    patterns: Vec<String>,
    call_indices: Vec<usize>,
}

/// Executor double that records calls instead of running them
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<FailurePlan>,
    total_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingExecutor {
    /// Create an executor where every call succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every call, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All calls recorded since the last [`clear`](Self::clear)
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded argv vectors rendered as single lines
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::command).collect()
    }

    /// Forget recorded calls
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Fail every call whose rendered command contains `pattern`
    pub fn fail_on_match(&self, pattern: &str) {
        self.failures
            .lock()
            .unwrap()
            .patterns
            .push(pattern.to_string());
    }

    /// Fail the call with this 0-based index, counted over the executor's
    /// lifetime (not reset by [`clear`](Self::clear))
    pub fn fail_on_call(&self, index: usize) {
        self.failures.lock().unwrap().call_indices.push(index);
    }

    /// Let every call succeed again
    pub fn clear_failures(&self) {
        *self.failures.lock().unwrap() = FailurePlan::default();
    }

    /// Total number of calls ever made
    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, index: usize, command: &str) -> bool {
        let plan = self.failures.lock().unwrap();
        plan.call_indices.contains(&index) || plan.patterns.iter().any(|p| command.contains(p))
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(
        &self,
        argv: &[String],
        process_input: Option<&str>,
        run_as_root: bool,
    ) -> IpsetResult<String> {
        let index = self.total_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let call = RecordedCall {
            argv: argv.to_vec(),
            process_input: process_input.map(str::to_string),
            run_as_root,
        };
        let command = call.command();
        self.calls.lock().unwrap().push(call);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail(index, &command) {
            return Err(IpsetError::ShellCommandFailed {
                command,
                exit_code: 1,
                output: "injected failure".to_string(),
            });
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_records_calls_verbatim() {
        let exec = RecordingExecutor::new();
        exec.execute(&argv(&["ipset", "restore", "-exist"]), Some("create x"), true)
            .await
            .unwrap();

        assert_eq!(
            exec.calls(),
            vec![RecordedCall::new(&["ipset", "restore", "-exist"]).with_input("create x")]
        );
        assert_eq!(exec.commands(), vec!["ipset restore -exist"]);
    }

    #[tokio::test]
    async fn test_fail_on_match() {
        let exec = RecordingExecutor::new();
        exec.fail_on_match("swap");

        assert!(exec.execute(&argv(&["ipset", "destroy", "a"]), None, true).await.is_ok());
        let err = exec
            .execute(&argv(&["ipset", "swap", "a-new", "a"]), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, IpsetError::ShellCommandFailed { exit_code: 1, .. }));
        assert_eq!(exec.calls().len(), 2);

        exec.clear_failures();
        assert!(exec.execute(&argv(&["ipset", "swap", "a-new", "a"]), None, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_on_call_survives_clear() {
        let exec = RecordingExecutor::new();
        exec.fail_on_call(1);

        assert!(exec.execute(&argv(&["ipset", "list"]), None, true).await.is_ok());
        exec.clear();
        assert!(exec.execute(&argv(&["ipset", "list"]), None, true).await.is_err());
        assert_eq!(exec.total_calls(), 2);
        assert_eq!(exec.calls().len(), 1);
    }
}
