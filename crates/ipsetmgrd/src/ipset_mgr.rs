//! ipset Manager - membership synchronization for kernel address sets

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use ipsetmgr_common::{CommandExecutor, IpsetError, IpsetResult, SyncStage};
use itertools::Itertools;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::commands::*;
use crate::config::IpsetConfig;
use crate::naming;
use crate::types::*;

type SetEntry = Arc<Mutex<ManagedSet>>;

/// ipset Manager
///
/// Mirrors the membership of every managed set and reconciles the kernel
/// with either incremental add/del commands or an atomic rebuild through a
/// staging set and `swap`.
///
/// Each set has its own lock, held for the whole command sequence of an
/// operation. Operations on one (id, family) pair are therefore serialized
/// while different pairs run in parallel.
pub struct IpsetMgr {
    config: IpsetConfig,
    executor: Arc<dyn CommandExecutor>,
    sets: DashMap<SetKey, SetEntry>,
}

impl IpsetMgr {
    /// Create a new IpsetMgr instance
    pub fn new(config: IpsetConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        info!(
            "IpsetMgr initialized (switch threshold {}, hashsize {:?}, maxelem {:?})",
            config.switch_threshold, config.hashsize, config.maxelem
        );

        Self {
            config,
            executor,
            sets: DashMap::new(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &IpsetConfig {
        &self.config
    }

    /// Live set name for a group id and family
    pub fn get_name(id: &str, family: AddressFamily) -> String {
        naming::set_name(id, family)
    }

    /// Whether the set is tracked and believed to exist in the kernel
    pub async fn set_exists(&self, id: &str, family: AddressFamily) -> bool {
        match self.lock_existing(&SetKey::new(id, family)).await {
            Some((_, set)) => set.exists,
            None => false,
        }
    }

    /// Tracked membership of a set
    pub async fn members(&self, id: &str, family: AddressFamily) -> Option<Vec<String>> {
        let (_, set) = self.lock_existing(&SetKey::new(id, family)).await?;
        set.exists.then(|| set.members.clone())
    }

    /// Keys of all sets believed to exist, sorted
    pub async fn managed_sets(&self) -> Vec<SetKey> {
        let entries: Vec<(SetKey, SetEntry)> = self
            .sets
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut keys = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            if entry.lock().await.exists {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// Reconcile a set's kernel membership with `members`
    ///
    /// The first call for a pair creates the set. Later calls patch the set
    /// in place, or rebuild it when the delta reaches the switch threshold.
    /// On error the tracked membership is left untouched, and if the live set
    /// may have changed anyway the next call rebuilds it.
    #[instrument(skip(self, members), fields(members = members.len()))]
    pub async fn set_members<S>(
        &self,
        id: &str,
        family: AddressFamily,
        members: &[S],
    ) -> IpsetResult<SyncOutcome>
    where
        S: AsRef<str> + Sync,
    {
        naming::validate_set_id(id, family)?;
        let desired: Vec<String> = members
            .iter()
            .map(|m| m.as_ref())
            .unique()
            .map(|m| naming::validate_member(m).map(|_| m.to_string()))
            .collect::<IpsetResult<_>>()?;

        let key = SetKey::new(id, family);
        let (entry, mut set) = self.lock_or_insert(&key).await;

        let result = if set.exists {
            self.update_set(&set, &desired).await
        } else {
            self.create_set(&set, &desired).await
        };

        match result {
            Ok(outcome) => {
                if matches!(outcome, SyncOutcome::Rebuilt { .. }) {
                    set.staging_left = false;
                }
                set.members = desired;
                set.exists = true;
                set.stale = false;
                info!("Synced set {}: {:?}", set.name, outcome);
                Ok(outcome)
            }
            Err(e) => {
                warn!("Failed to sync set {}: {}", set.name, e);
                set.note_failure(e.stage());
                if !set.exists {
                    // Never created; the next call starts from scratch.
                    self.release(&key, &entry, &mut set);
                }
                Err(e)
            }
        }
    }

    /// Destroy a managed set
    ///
    /// The set stays tracked if the kernel destroy fails.
    #[instrument(skip(self))]
    pub async fn destroy(&self, id: &str, family: AddressFamily) -> IpsetResult<()> {
        let key = SetKey::new(id, family);
        let (entry, mut set) = self
            .lock_existing(&key)
            .await
            .filter(|(_, set)| set.exists)
            .ok_or_else(|| IpsetError::precondition(format!("set {} is not managed", key)))?;

        let cmd = build_destroy_cmd(&self.config.ipset_cmd, &set.name);
        self.run(&set.name, SyncStage::DestroySet, cmd, None).await?;

        self.forget_destroyed(&key, &entry, &mut set).await;
        info!("Destroyed set {}", set.name);
        Ok(())
    }

    /// Destroy a set by name whether or not it is tracked
    ///
    /// Only `destroy <name>` is issued. A set still referenced by
    /// packet-filter rules keeps its members when the kernel refuses.
    #[instrument(skip(self))]
    pub async fn purge(&self, id: &str, family: AddressFamily) -> IpsetResult<()> {
        naming::validate_set_id(id, family)?;
        let key = SetKey::new(id, family);
        let (entry, mut set) = self.lock_or_insert(&key).await;

        let cmd = build_destroy_cmd(&self.config.ipset_cmd, &set.name);
        if let Err(e) = self.run(&set.name, SyncStage::DestroySet, cmd, None).await {
            warn!("Failed to destroy set {}: {}", set.name, e);
            if !set.exists {
                self.release(&key, &entry, &mut set);
            }
            return Err(e);
        }

        self.forget_destroyed(&key, &entry, &mut set).await;
        info!("Destroyed set {}", set.name);
        Ok(())
    }

    /// Destroy every managed set
    ///
    /// Attempts all sets and returns the first failure.
    pub async fn destroy_all(&self) -> IpsetResult<()> {
        let mut first_err = None;
        for key in self.managed_sets().await {
            if let Err(e) = self.destroy(&key.id, key.family).await {
                warn!("Failed to destroy set {}: {}", key, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Initial creation: create the live set, then fill it atomically
    async fn create_set(&self, set: &ManagedSet, desired: &[String]) -> IpsetResult<SyncOutcome> {
        debug!("Creating set {}", set.name);
        let cmd = build_create_set_cmd(
            &self.config.ipset_cmd,
            &set.name,
            set.family,
            &self.config.sizing(),
        );
        self.run(&set.name, SyncStage::CreateSet, cmd, None).await?;
        self.refresh_set(set, desired).await
    }

    /// Patch or rebuild an existing set
    async fn update_set(&self, set: &ManagedSet, desired: &[String]) -> IpsetResult<SyncOutcome> {
        let current: HashSet<&str> = set.members.iter().map(String::as_str).collect();
        let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();

        let to_remove: Vec<&str> = set
            .members
            .iter()
            .map(String::as_str)
            .filter(|m| !wanted.contains(m))
            .collect();
        let to_add: Vec<&str> = desired
            .iter()
            .map(String::as_str)
            .filter(|m| !current.contains(m))
            .collect();

        if set.stale {
            debug!("Set {} may not match its tracked members, rebuilding", set.name);
            return self.refresh_set(set, desired).await;
        }

        let delta = to_add.len() + to_remove.len();
        if delta == 0 {
            debug!("Set {} already up to date", set.name);
            return Ok(SyncOutcome::Unchanged);
        }

        if delta >= self.config.switch_threshold {
            debug!(
                "Set {} delta {} reaches threshold {}, rebuilding",
                set.name, delta, self.config.switch_threshold
            );
            return self.refresh_set(set, desired).await;
        }

        let ipset = &self.config.ipset_cmd;
        for member in &to_remove {
            let cmd = build_del_member_cmd(ipset, &set.name, member);
            self.run(&set.name, SyncStage::DelMember, cmd, None).await?;
        }
        for member in &to_add {
            let cmd = build_add_member_cmd(ipset, &set.name, member);
            self.run(&set.name, SyncStage::AddMember, cmd, None).await?;
        }

        Ok(SyncOutcome::Patched {
            added: to_add.len(),
            removed: to_remove.len(),
        })
    }

    /// Atomic rebuild: restore into the staging set, swap, drop the staging set
    async fn refresh_set(&self, set: &ManagedSet, desired: &[String]) -> IpsetResult<SyncOutcome> {
        let ipset = &self.config.ipset_cmd;
        let staging = naming::staging_name(&set.name);

        let flush = set.staging_left && !self.drop_staging(&set.name, &staging).await;
        let input = build_restore_input(
            &staging,
            set.family,
            &self.config.sizing(),
            desired,
            flush,
        );
        self.run(
            &set.name,
            SyncStage::RestoreStaging,
            build_restore_cmd(ipset),
            Some(&input),
        )
        .await?;

        // Rules referencing the live name see the old or new contents, never a mix.
        let cmd = build_swap_cmd(ipset, &staging, &set.name);
        self.run(&set.name, SyncStage::Swap, cmd, None).await?;

        let cmd = build_destroy_cmd(ipset, &staging);
        self.run(&set.name, SyncStage::DestroyStaging, cmd, None).await?;

        Ok(SyncOutcome::Rebuilt {
            members: desired.len(),
        })
    }

    /// Best-effort destroy of a staging set left by a failed rebuild
    ///
    /// Returns false if the set may still be there.
    async fn drop_staging(&self, set: &str, staging: &str) -> bool {
        let cmd = build_destroy_cmd(&self.config.ipset_cmd, staging);
        match self.run(set, SyncStage::DestroyStaging, cmd, None).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Leftover staging set {} not destroyed: {}", staging, e);
                false
            }
        }
    }

    /// Drop the record of a set whose live kernel set is gone
    async fn forget_destroyed(&self, key: &SetKey, entry: &SetEntry, set: &mut ManagedSet) {
        let staging = naming::staging_name(&set.name);
        if set.staging_left && self.drop_staging(&set.name, &staging).await {
            set.staging_left = false;
        }
        self.release(key, entry, set);
    }

    /// Mark a set absent and stop tracking it
    ///
    /// The record survives, absent, while a staging set may remain so the
    /// next rebuild still cleans it up.
    fn release(&self, key: &SetKey, entry: &SetEntry, set: &mut ManagedSet) {
        set.exists = false;
        set.stale = false;
        set.members.clear();
        if !set.staging_left {
            self.sets.remove_if(key, |_, v| Arc::ptr_eq(v, entry));
        }
    }

    /// Execute one command as root, tagging failures with the stage
    async fn run(
        &self,
        set: &str,
        stage: SyncStage,
        cmd: Vec<String>,
        input: Option<&str>,
    ) -> IpsetResult<()> {
        debug!(set = %set, stage = %stage, "{}", cmd.join(" "));
        self.executor
            .execute(&cmd, input, true)
            .await
            .map(|_| ())
            .map_err(|e| IpsetError::sync_failed(set, stage, e))
    }

    /// Lock a set's record, creating it if absent
    async fn lock_or_insert(&self, key: &SetKey) -> (SetEntry, OwnedMutexGuard<ManagedSet>) {
        loop {
            let entry = Arc::clone(
                self.sets
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(ManagedSet::new(key))))
                    .value(),
            );
            let guard = Arc::clone(&entry).lock_owned().await;
            if self.is_current(key, &entry) {
                return (entry, guard);
            }
        }
    }

    /// Lock a set's record if it is tracked
    async fn lock_existing(&self, key: &SetKey) -> Option<(SetEntry, OwnedMutexGuard<ManagedSet>)> {
        loop {
            let entry = self.sets.get(key).map(|e| Arc::clone(e.value()))?;
            let guard = Arc::clone(&entry).lock_owned().await;
            if self.is_current(key, &entry) {
                return Some((entry, guard));
            }
        }
    }

    /// False once the record was dropped by a destroy or failed creation
    /// that completed while we waited for its lock.
    fn is_current(&self, key: &SetKey, entry: &SetEntry) -> bool {
        self.sets
            .get(key)
            .is_some_and(|e| Arc::ptr_eq(e.value(), entry))
    }
}
