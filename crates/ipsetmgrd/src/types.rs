//! Type definitions for ipsetmgrd

use std::fmt;
use std::str::FromStr;

use ipsetmgr_common::{IpsetError, SyncStage};
use serde::{Deserialize, Serialize};

use crate::naming;

/// IP version of a managed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4 addresses (`family inet`).
    #[serde(rename = "IPv4", alias = "ipv4", alias = "v4")]
    IPv4,
    /// IPv6 addresses (`family inet6`).
    #[serde(rename = "IPv6", alias = "ipv6", alias = "v6")]
    IPv6,
}

impl AddressFamily {
    /// Prefix prepended to the group id to form the set name.
    pub fn prefix(&self) -> &'static str {
        match self {
            AddressFamily::IPv4 => "IPv4",
            AddressFamily::IPv6 => "IPv6",
        }
    }

    /// Value of the `family` keyword in ipset create commands.
    pub fn ipset_family(&self) -> &'static str {
        match self {
            AddressFamily::IPv4 => "inet",
            AddressFamily::IPv6 => "inet6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for AddressFamily {
    type Err = IpsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "v4" | "4" | "inet" => Ok(AddressFamily::IPv4),
            "ipv6" | "v6" | "6" | "inet6" => Ok(AddressFamily::IPv6),
            _ => Err(IpsetError::precondition(format!(
                "unknown address family '{}'",
                s
            ))),
        }
    }
}

/// Index key of a managed set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetKey {
    /// Group identifier
    pub id: String,
    /// Address family
    pub family: AddressFamily,
}

impl SetKey {
    /// Create a new SetKey
    pub fn new(id: impl Into<String>, family: AddressFamily) -> Self {
        Self {
            id: id.into(),
            family,
        }
    }
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.id)
    }
}

/// Parses `<family>:<id>`, e.g. `IPv4:sg1`.
impl FromStr for SetKey {
    type Err = IpsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (family, id) = s.split_once(':').ok_or_else(|| {
            IpsetError::precondition(format!("expected <family>:<id>, got '{}'", s))
        })?;
        Ok(Self::new(id, family.parse()?))
    }
}

/// In-memory mirror of one kernel set.
#[derive(Debug, Clone)]
pub struct ManagedSet {
    /// Group identifier
    pub id: String,
    /// Address family
    pub family: AddressFamily,
    /// Live set name, fixed at creation
    pub name: String,
    /// Members as of the last successful reconciliation
    pub members: Vec<String>,
    /// Whether the kernel set is believed to exist
    pub exists: bool,
    /// A failed rebuild may have left the staging set behind
    pub staging_left: bool,
    /// The live set may differ from `members` after a failed sync
    pub stale: bool,
}

impl ManagedSet {
    /// Create a record for a set that has not been created yet
    pub fn new(key: &SetKey) -> Self {
        Self {
            id: key.id.clone(),
            family: key.family,
            name: naming::set_name(&key.id, key.family),
            members: Vec::new(),
            exists: false,
            staging_left: false,
            stale: false,
        }
    }

    /// Record what a command sequence that failed at `stage` may have
    /// left in the kernel.
    pub fn note_failure(&mut self, stage: Option<SyncStage>) {
        match stage {
            // restore may stop half way; a failed swap leaves staging filled
            Some(SyncStage::RestoreStaging | SyncStage::Swap) => self.staging_left = true,
            // swapped: the live set already holds the new members
            Some(SyncStage::DestroyStaging) => {
                self.staging_left = true;
                self.stale = true;
            }
            Some(SyncStage::DelMember | SyncStage::AddMember) => self.stale = true,
            _ => {}
        }
    }
}

/// Optional hash sizing hints rendered into every create command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetSizing {
    /// Initial bucket count (`hashsize`)
    pub hashsize: Option<u32>,
    /// Maximum element count (`maxelem`)
    pub maxelem: Option<u32>,
}

/// Desired membership of one set, as listed in a `--sets` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSpec {
    /// Group identifier
    pub id: String,
    /// Address family
    pub family: AddressFamily,
    /// Desired members
    #[serde(default)]
    pub members: Vec<String>,
}

/// What a `set_members` call did to the kernel set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Desired membership already matched; no command was issued.
    Unchanged,
    /// Incremental add/del commands were issued.
    Patched {
        /// Number of members added
        added: usize,
        /// Number of members removed
        removed: usize,
    },
    /// The set was rebuilt through a staging set and swapped in.
    Rebuilt {
        /// Member count after the rebuild
        members: usize,
    },
}
