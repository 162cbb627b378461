//! Test infrastructure for the ipset membership manager
//!
//! Provides:
//! - A recording [`CommandExecutor`](ipsetmgr_common::CommandExecutor) double
//!   with failure injection
//! - A [`KernelModelExecutor`] that applies commands to an in-memory copy
//!   of the kernel's sets
//! - Fixtures producing the literal command sequences the manager must emit
//! - Call sequence verification helpers

pub mod fixtures;
mod kernel;
mod recorder;
mod verification;

pub use fixtures::*;
pub use kernel::KernelModelExecutor;
pub use recorder::{RecordedCall, RecordingExecutor};
pub use verification::*;
