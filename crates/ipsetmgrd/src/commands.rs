//! ipset command builders
//!
//! Each builder returns the full argv (binary first) handed to the
//! executor. The restore payload is built separately since it travels on
//! standard input.

use crate::types::{AddressFamily, SetSizing};

/// Set type of every managed set.
pub const SET_TYPE: &str = "hash:ip";

fn argv(ipset: &str, args: &[&str]) -> Vec<String> {
    std::iter::once(ipset)
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

/// Build the set specification following `create`
///
/// `<name> hash:ip family <inet|inet6> [hashsize N] [maxelem M]`
pub fn build_create_spec(name: &str, family: AddressFamily, sizing: &SetSizing) -> Vec<String> {
    let mut spec = vec![
        name.to_string(),
        SET_TYPE.to_string(),
        "family".to_string(),
        family.ipset_family().to_string(),
    ];
    if let Some(hashsize) = sizing.hashsize {
        spec.push("hashsize".to_string());
        spec.push(hashsize.to_string());
    }
    if let Some(maxelem) = sizing.maxelem {
        spec.push("maxelem".to_string());
        spec.push(maxelem.to_string());
    }
    spec
}

/// Build live set creation command
///
/// `-exist` makes this a no-op if the set is already present
pub fn build_create_set_cmd(
    ipset: &str,
    name: &str,
    family: AddressFamily,
    sizing: &SetSizing,
) -> Vec<String> {
    let mut cmd = argv(ipset, &["create", "-exist"]);
    cmd.extend(build_create_spec(name, family, sizing));
    cmd
}

/// Build batch restore command
pub fn build_restore_cmd(ipset: &str) -> Vec<String> {
    argv(ipset, &["restore", "-exist"])
}

/// Build the restore payload that creates and fills the staging set
///
/// With `flush`, a `flush <staging>` line follows the create so members of
/// a staging set that survived an earlier failure are dropped; `create
/// -exist` alone keeps them.
pub fn build_restore_input(
    staging: &str,
    family: AddressFamily,
    sizing: &SetSizing,
    members: &[String],
    flush: bool,
) -> String {
    let mut lines = Vec::with_capacity(members.len() + 2);
    lines.push(format!(
        "create {}",
        build_create_spec(staging, family, sizing).join(" ")
    ));
    if flush {
        lines.push(format!("flush {}", staging));
    }
    lines.extend(members.iter().map(|ip| format!("add {} {}", staging, ip)));
    lines.join("\n")
}

/// Build atomic swap command
pub fn build_swap_cmd(ipset: &str, staging: &str, live: &str) -> Vec<String> {
    argv(ipset, &["swap", staging, live])
}

/// Build set destruction command
pub fn build_destroy_cmd(ipset: &str, name: &str) -> Vec<String> {
    argv(ipset, &["destroy", name])
}

/// Build incremental member removal command
pub fn build_del_member_cmd(ipset: &str, live: &str, member: &str) -> Vec<String> {
    argv(ipset, &["del", live, member])
}

/// Build incremental member addition command
///
/// `-exist` tolerates members left behind by an earlier partial patch
pub fn build_add_member_cmd(ipset: &str, live: &str, member: &str) -> Vec<String> {
    argv(ipset, &["add", "-exist", live, member])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZED: SetSizing = SetSizing {
        hashsize: Some(2048),
        maxelem: Some(131072),
    };

    #[test]
    fn test_build_create_set_cmd() {
        let cmd = build_create_set_cmd(
            "ipset",
            "IPv4sg",
            AddressFamily::IPv4,
            &SetSizing::default(),
        );
        assert_eq!(
            cmd,
            ["ipset", "create", "-exist", "IPv4sg", "hash:ip", "family", "inet"]
        );
    }

    #[test]
    fn test_build_create_set_cmd_sized() {
        let cmd = build_create_set_cmd("ipset", "IPv6sg", AddressFamily::IPv6, &SIZED);
        assert_eq!(
            cmd,
            [
                "ipset", "create", "-exist", "IPv6sg", "hash:ip", "family", "inet6", "hashsize",
                "2048", "maxelem", "131072"
            ]
        );
    }

    #[test]
    fn test_build_create_spec_maxelem_only() {
        let sizing = SetSizing {
            hashsize: None,
            maxelem: Some(65536),
        };
        let spec = build_create_spec("IPv4sg", AddressFamily::IPv4, &sizing);
        assert_eq!(spec.join(" "), "IPv4sg hash:ip family inet maxelem 65536");
    }

    #[test]
    fn test_build_restore_input() {
        let members = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let input =
            build_restore_input("IPv4sg-new", AddressFamily::IPv4, &SIZED, &members, false);
        assert_eq!(
            input,
            "create IPv4sg-new hash:ip family inet hashsize 2048 maxelem 131072\n\
             add IPv4sg-new 10.0.0.1\n\
             add IPv4sg-new 10.0.0.2"
        );
    }

    #[test]
    fn test_build_restore_input_empty() {
        let input = build_restore_input(
            "IPv4sg-new",
            AddressFamily::IPv4,
            &SetSizing::default(),
            &[],
            false,
        );
        assert_eq!(input, "create IPv4sg-new hash:ip family inet");
    }

    #[test]
    fn test_build_restore_input_flush() {
        let members = vec!["10.0.0.1".to_string()];
        let input = build_restore_input(
            "IPv4sg-new",
            AddressFamily::IPv4,
            &SetSizing::default(),
            &members,
            true,
        );
        assert_eq!(
            input,
            "create IPv4sg-new hash:ip family inet\n\
             flush IPv4sg-new\n\
             add IPv4sg-new 10.0.0.1"
        );
    }

    #[test]
    fn test_simple_builders() {
        assert_eq!(build_restore_cmd("ipset"), ["ipset", "restore", "-exist"]);
        assert_eq!(
            build_swap_cmd("ipset", "IPv4sg-new", "IPv4sg"),
            ["ipset", "swap", "IPv4sg-new", "IPv4sg"]
        );
        assert_eq!(build_destroy_cmd("ipset", "IPv4sg"), ["ipset", "destroy", "IPv4sg"]);
        assert_eq!(
            build_del_member_cmd("ipset", "IPv4sg", "10.0.0.1"),
            ["ipset", "del", "IPv4sg", "10.0.0.1"]
        );
        assert_eq!(
            build_add_member_cmd("/usr/sbin/ipset", "IPv4sg", "10.0.0.1"),
            ["/usr/sbin/ipset", "add", "-exist", "IPv4sg", "10.0.0.1"]
        );
    }
}
