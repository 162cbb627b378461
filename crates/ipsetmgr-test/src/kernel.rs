//! In-memory model of kernel ipset state
//!
//! Applies the commands the manager emits the way the kernel does:
//! `create -exist` leaves an existing set and its members alone, `swap`
//! exchanges contents, `restore` stops at the first bad line with the
//! earlier lines applied, and a set referenced by rules cannot be
//! destroyed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ipsetmgr_common::shell::render_argv;
use ipsetmgr_common::{CommandExecutor, IpsetError, IpsetResult};

use crate::recorder::RecordedCall;

type Sets = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Default)]
struct KernelState {
    sets: Sets,
    in_use: BTreeSet<String>,
    fail_once: Vec<String>,
    calls: Vec<RecordedCall>,
}

/// Executor double backed by a model of the kernel's sets
#[derive(Debug, Default)]
pub struct KernelModelExecutor {
    state: Mutex<KernelState>,
}

impl KernelModelExecutor {
    /// Create an executor over an empty kernel
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a set in place, as left by an earlier process
    pub fn insert_set<S: AsRef<str>>(&self, name: &str, members: &[S]) {
        let members = members.iter().map(|m| m.as_ref().to_string()).collect();
        self.state
            .lock()
            .unwrap()
            .sets
            .insert(name.to_string(), members);
    }

    /// Refuse to destroy `name`, as for a set referenced by iptables rules
    pub fn mark_in_use(&self, name: &str) {
        self.state.lock().unwrap().in_use.insert(name.to_string());
    }

    /// Fail the next command whose rendered argv contains `pattern`
    ///
    /// A failing `restore` applies every payload line but the last.
    pub fn fail_once(&self, pattern: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_once
            .push(pattern.to_string());
    }

    /// Sorted members of a kernel set, `None` if it does not exist
    pub fn members(&self, name: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .sets
            .get(name)
            .map(|set| set.iter().cloned().collect())
    }

    /// Names of all kernel sets
    pub fn set_names(&self) -> Vec<String> {
        self.state.lock().unwrap().sets.keys().cloned().collect()
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls rendered as single lines
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::command).collect()
    }
}

fn split_exist<'a>(words: impl Iterator<Item = &'a str>) -> (Vec<&'a str>, bool) {
    let mut exist = false;
    let words = words
        .filter(|w| {
            let flag = *w == "-exist";
            exist |= flag;
            !flag
        })
        .collect();
    (words, exist)
}

fn lookup<'a>(sets: &'a mut Sets, name: &str) -> Result<&'a mut BTreeSet<String>, String> {
    sets.get_mut(name)
        .ok_or_else(|| format!("The set with the given name does not exist: {}", name))
}

fn apply(state: &mut KernelState, words: &[&str], exist: bool) -> Result<(), String> {
    let sets = &mut state.sets;
    match words {
        ["create", name, ..] => {
            if sets.contains_key(*name) {
                if !exist {
                    return Err(format!("Set cannot be created: {} already exists", name));
                }
            } else {
                sets.insert(name.to_string(), BTreeSet::new());
            }
        }
        ["add", name, member] => {
            if !lookup(sets, name)?.insert(member.to_string()) && !exist {
                return Err(format!("Element cannot be added: {} already in {}", member, name));
            }
        }
        ["del", name, member] => {
            if !lookup(sets, name)?.remove(*member) && !exist {
                return Err(format!("Element cannot be deleted: {} not in {}", member, name));
            }
        }
        ["flush", name] => lookup(sets, name)?.clear(),
        ["swap", from, to] => {
            lookup(sets, to)?;
            let a = std::mem::take(lookup(sets, from)?);
            let b = std::mem::replace(lookup(sets, to)?, a);
            *lookup(sets, from)? = b;
        }
        ["destroy", name] => {
            if state.in_use.contains(*name) {
                return Err(format!("Set cannot be destroyed: {} is in use", name));
            }
            lookup(sets, name)?;
            sets.remove(*name);
        }
        _ => return Err(format!("unsupported command: {}", words.join(" "))),
    }
    Ok(())
}

fn restore(state: &mut KernelState, input: &str, exist: bool, limit: usize) -> Result<(), String> {
    for (index, line) in input.lines().enumerate().take(limit) {
        let (words, line_exist) = split_exist(line.split_whitespace());
        apply(state, &words, exist || line_exist)
            .map_err(|e| format!("Error in line {}: {}", index + 1, e))?;
    }
    Ok(())
}

#[async_trait]
impl CommandExecutor for KernelModelExecutor {
    async fn execute(
        &self,
        argv: &[String],
        process_input: Option<&str>,
        run_as_root: bool,
    ) -> IpsetResult<String> {
        let command = render_argv(argv);
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            argv: argv.to_vec(),
            process_input: process_input.map(str::to_string),
            run_as_root,
        });

        let injected = state.fail_once.iter().position(|p| command.contains(p.as_str()));
        if let Some(index) = injected {
            state.fail_once.remove(index);
        }

        let (words, exist) = split_exist(argv.iter().skip(1).map(String::as_str));
        let result = match (words.as_slice(), process_input) {
            (["restore"], Some(input)) => {
                let lines = input.lines().count();
                match injected {
                    Some(_) => restore(&mut state, input, exist, lines.saturating_sub(1))
                        .and_then(|()| Err(format!("Error in line {}: injected failure", lines))),
                    None => restore(&mut state, input, exist, lines),
                }
            }
            _ => match injected {
                Some(_) => Err("injected failure".to_string()),
                None => apply(&mut state, &words, exist),
            },
        };

        result.map(|()| String::new()).map_err(|output| IpsetError::ShellCommandFailed {
            command,
            exit_code: 1,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    async fn run(kernel: &KernelModelExecutor, parts: &[&str]) -> IpsetResult<String> {
        kernel.execute(&argv(parts), None, true).await
    }

    #[tokio::test]
    async fn test_create_exist_keeps_members() {
        let kernel = KernelModelExecutor::new();
        kernel.insert_set("a", &["10.0.0.1"]);

        run(&kernel, &["ipset", "create", "-exist", "a", "hash:ip"]).await.unwrap();
        assert!(run(&kernel, &["ipset", "create", "a", "hash:ip"]).await.is_err());

        assert_eq!(kernel.members("a").unwrap(), vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_restore_and_swap() {
        let kernel = KernelModelExecutor::new();
        kernel.insert_set("a", &["10.0.0.1"]);

        kernel
            .execute(
                &argv(&["ipset", "restore", "-exist"]),
                Some("create a-new hash:ip family inet\nadd a-new 10.0.0.2\nadd a-new 10.0.0.3"),
                true,
            )
            .await
            .unwrap();
        run(&kernel, &["ipset", "swap", "a-new", "a"]).await.unwrap();

        assert_eq!(kernel.members("a").unwrap(), vec!["10.0.0.2", "10.0.0.3"]);
        assert_eq!(kernel.members("a-new").unwrap(), vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_add_del_semantics() {
        let kernel = KernelModelExecutor::new();
        kernel.insert_set("a", &["10.0.0.1"]);

        assert!(run(&kernel, &["ipset", "add", "a", "10.0.0.1"]).await.is_err());
        run(&kernel, &["ipset", "add", "-exist", "a", "10.0.0.1"]).await.unwrap();
        run(&kernel, &["ipset", "del", "a", "10.0.0.1"]).await.unwrap();
        assert!(run(&kernel, &["ipset", "del", "a", "10.0.0.1"]).await.is_err());
        assert!(run(&kernel, &["ipset", "add", "b", "10.0.0.1"]).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_restore_applies_leading_lines() {
        let kernel = KernelModelExecutor::new();
        kernel.fail_once("restore");

        let result = kernel
            .execute(
                &argv(&["ipset", "restore", "-exist"]),
                Some("create a-new hash:ip\nadd a-new 10.0.0.1\nadd a-new 10.0.0.2"),
                true,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(kernel.members("a-new").unwrap(), vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_fail_once_and_in_use() {
        let kernel = KernelModelExecutor::new();
        kernel.insert_set("a", &["10.0.0.1"]);
        kernel.insert_set("b", &["10.0.0.2"]);
        kernel.fail_once("destroy a");
        kernel.mark_in_use("b");

        assert!(run(&kernel, &["ipset", "destroy", "a"]).await.is_err());
        run(&kernel, &["ipset", "destroy", "a"]).await.unwrap();
        assert!(run(&kernel, &["ipset", "destroy", "b"]).await.is_err());

        assert_eq!(kernel.set_names(), vec!["b"]);
        assert_eq!(kernel.commands().len(), 3);
    }
}
