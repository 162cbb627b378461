//! Test fixtures for ipset manager scenarios
//!
//! [`ExpectedCalls`] spells out, token by token, the commands the manager
//! has to emit for each operation on [`TEST_SET_ID`].

use crate::recorder::RecordedCall;

/// Group id used by the fixtures
pub const TEST_SET_ID: &str = "fake_sgid";

/// Live set name of [`TEST_SET_ID`] for IPv4
pub const TEST_SET_NAME: &str = "IPv4fake_sgid";

/// Staging set name of [`TEST_SET_NAME`]
pub const TEST_SET_NAME_NEW: &str = "IPv4fake_sgid-new";

/// Six IPv4 addresses
pub const FAKE_IPS: [&str; 6] = [
    "10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5", "10.0.0.6",
];

/// `hashsize` used by the sized fixtures
pub const TEST_HASHSIZE: u32 = 2048;

/// `maxelem` used by the sized fixtures
pub const TEST_MAXELEM: u32 = 131072;

/// Owned copy of a slice of [`FAKE_IPS`]
pub fn fake_ips(range: std::ops::Range<usize>) -> Vec<String> {
    FAKE_IPS[range].iter().map(|s| s.to_string()).collect()
}

/// Builder for the call sequence expected on [`TEST_SET_NAME`]
#[derive(Debug, Clone, Default)]
pub struct ExpectedCalls {
    hashsize: Option<u32>,
    maxelem: Option<u32>,
    calls: Vec<RecordedCall>,
}

impl ExpectedCalls {
    /// Expectations for sets created with ipset's default sizing
    pub fn new() -> Self {
        Self::default()
    }

    /// Expectations for sets created with explicit sizing
    pub fn with_sizing(hashsize: Option<u32>, maxelem: Option<u32>) -> Self {
        Self {
            hashsize,
            maxelem,
            calls: Vec::new(),
        }
    }

    fn hash_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(hashsize) = self.hashsize {
            args.push("hashsize".to_string());
            args.push(hashsize.to_string());
        }
        if let Some(maxelem) = self.maxelem {
            args.push("maxelem".to_string());
            args.push(maxelem.to_string());
        }
        args
    }

    /// Live set creation
    pub fn expect_create(&mut self) -> &mut Self {
        let mut argv: Vec<String> = [
            "ipset", "create", "-exist", TEST_SET_NAME, "hash:ip", "family", "inet",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        argv.extend(self.hash_args());

        self.calls.push(RecordedCall {
            argv,
            process_input: None,
            run_as_root: true,
        });
        self
    }

    /// Atomic rebuild to `addresses`: restore, swap, staging destroy
    pub fn expect_set<S: AsRef<str>>(&mut self, addresses: &[S]) -> &mut Self {
        let mut header = format!("create {} hash:ip family inet", TEST_SET_NAME_NEW);
        for arg in self.hash_args() {
            header.push(' ');
            header.push_str(&arg);
        }
        let mut lines = vec![header];
        lines.extend(
            addresses
                .iter()
                .map(|ip| format!("add {} {}", TEST_SET_NAME_NEW, ip.as_ref())),
        );

        self.calls.push(
            RecordedCall::new(&["ipset", "restore", "-exist"]).with_input(lines.join("\n")),
        );
        self.calls.push(RecordedCall::new(&[
            "ipset",
            "swap",
            TEST_SET_NAME_NEW,
            TEST_SET_NAME,
        ]));
        self.calls
            .push(RecordedCall::new(&["ipset", "destroy", TEST_SET_NAME_NEW]));
        self
    }

    /// One `add -exist` per address
    pub fn expect_add<S: AsRef<str>>(&mut self, addresses: &[S]) -> &mut Self {
        for ip in addresses {
            self.calls.push(RecordedCall::new(&[
                "ipset",
                "add",
                "-exist",
                TEST_SET_NAME,
                ip.as_ref(),
            ]));
        }
        self
    }

    /// One `del` per address
    pub fn expect_del<S: AsRef<str>>(&mut self, addresses: &[S]) -> &mut Self {
        for ip in addresses {
            self.calls
                .push(RecordedCall::new(&["ipset", "del", TEST_SET_NAME, ip.as_ref()]));
        }
        self
    }

    /// Live set destruction
    pub fn expect_destroy(&mut self) -> &mut Self {
        self.calls
            .push(RecordedCall::new(&["ipset", "destroy", TEST_SET_NAME]));
        self
    }

    /// The accumulated sequence
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_create_sized() {
        let mut expected = ExpectedCalls::with_sizing(Some(TEST_HASHSIZE), Some(TEST_MAXELEM));
        expected.expect_create();
        assert_eq!(
            expected.calls()[0].command(),
            "ipset create -exist IPv4fake_sgid hash:ip family inet hashsize 2048 maxelem 131072"
        );
    }

    #[test]
    fn test_expect_set() {
        let mut expected = ExpectedCalls::new();
        expected.expect_set(&FAKE_IPS[0..2]);

        let calls = expected.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0].process_input.as_deref(),
            Some(
                "create IPv4fake_sgid-new hash:ip family inet\n\
                 add IPv4fake_sgid-new 10.0.0.1\n\
                 add IPv4fake_sgid-new 10.0.0.2"
            )
        );
        assert_eq!(calls[1].command(), "ipset swap IPv4fake_sgid-new IPv4fake_sgid");
        assert_eq!(calls[2].command(), "ipset destroy IPv4fake_sgid-new");
    }

    #[test]
    fn test_fake_ips() {
        assert_eq!(fake_ips(1..3), vec!["10.0.0.2", "10.0.0.3"]);
    }
}
