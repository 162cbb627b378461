//! Common infrastructure for the ipset membership manager.
//!
//! - [`shell`]: the [`CommandExecutor`] seam and its process-backed
//!   implementation
//! - [`error`]: error taxonomy shared by the manager and its executors
//!
//! # Example
//!
//! ```ignore
//! use ipsetmgr_common::{shell::{CommandExecutor, ShellExecutor}, IpsetResult};
//!
//! async fn destroy(executor: &ShellExecutor, name: &str) -> IpsetResult<()> {
//!     let argv = vec!["ipset".to_string(), "destroy".to_string(), name.to_string()];
//!     executor.execute(&argv, None, true).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{IpsetError, IpsetResult, SyncStage};
pub use shell::{CommandExecutor, LoggingExecutor, ShellExecutor, IPSET_CMD};
