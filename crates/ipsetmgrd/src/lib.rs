//! ipset membership manager for security group enforcement
//!
//! Keeps kernel `hash:ip` sets in step with the desired address list of each
//! (group id, address family) pair, patching small changes in place and
//! rebuilding larger ones through an atomic `swap`.

pub mod commands;
pub mod config;
mod ipset_mgr;
pub mod naming;
mod types;

pub use config::{load_set_specs, IpsetConfig, SWITCH_SPLIT_THRESHOLD};
pub use ipset_mgr::IpsetMgr;
pub use types::*;
