//! Set naming and identity
//!
//! A live set is named `<family prefix><group id>`, e.g. `IPv4fake_sgid`.
//! The staging set used during an atomic rebuild appends [`SWAP_SUFFIX`].
//! Live names are capped at [`MAX_SET_NAME_LEN`] so the staging name still
//! fits the kernel's [`IPSET_MAXNAMELEN`].

use ipsetmgr_common::{IpsetError, IpsetResult};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::AddressFamily;

/// Suffix of the transient staging set.
pub const SWAP_SUFFIX: &str = "-new";

/// Kernel limit on set name length (excluding the NUL terminator).
pub const IPSET_MAXNAMELEN: usize = 31;

/// Longest live set name whose staging name still fits.
pub const MAX_SET_NAME_LEN: usize = IPSET_MAXNAMELEN - SWAP_SUFFIX.len();

/// Characters allowed in a group id. Anything else could split a line of
/// the restore payload.
static SET_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("Invalid regex pattern"));

/// Address, CIDR or range characters accepted as set members.
static MEMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f:./-]+$").expect("Invalid regex pattern"));

/// Returns the live set name for a group id and family.
pub fn set_name(id: &str, family: AddressFamily) -> String {
    format!("{}{}", family.prefix(), id)
}

/// Returns the staging set name for a live set name.
pub fn staging_name(name: &str) -> String {
    format!("{}{}", name, SWAP_SUFFIX)
}

/// Checks that `id` yields a usable, collision-free set name.
pub fn validate_set_id(id: &str, family: AddressFamily) -> IpsetResult<()> {
    if !SET_ID_RE.is_match(id) {
        return Err(IpsetError::precondition(format!(
            "invalid set id '{}': only [A-Za-z0-9_.:-] allowed",
            id.escape_debug()
        )));
    }

    // A live name ending in the swap suffix would alias another set's staging name.
    if id.ends_with(SWAP_SUFFIX) {
        return Err(IpsetError::precondition(format!(
            "invalid set id '{}': must not end with '{}'",
            id, SWAP_SUFFIX
        )));
    }

    let name = set_name(id, family);
    if name.len() > MAX_SET_NAME_LEN {
        return Err(IpsetError::precondition(format!(
            "set name '{}' is {} characters, limit is {}",
            name,
            name.len(),
            MAX_SET_NAME_LEN
        )));
    }

    Ok(())
}

/// Checks that a member can be written to a command line and restore payload.
pub fn validate_member(member: &str) -> IpsetResult<()> {
    if MEMBER_RE.is_match(member) {
        Ok(())
    } else {
        Err(IpsetError::precondition(format!(
            "invalid set member '{}'",
            member.escape_debug()
        )))
    }
}
