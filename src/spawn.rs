//! Per-scope spawn state.
//!
//! A scope is one catching channel in one guild. Each scope is either empty,
//! reserved by a spawn that is being announced, or holding exactly one active
//! spawn. Every transition happens under one synchronous lock that is never
//! held across an `.await`, which is what makes "first claim wins" and
//! "never two spawns" hold on a multi-threaded runtime.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::catalog::EntityDefinition;
use crate::types::Snowflake;

/// Where a spawn lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
}

impl Scope {
    pub fn new(guild_id: impl Into<Snowflake>, channel_id: impl Into<Snowflake>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// A catchable entity that has been announced.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSpawn {
    pub entity: EntityDefinition,
    /// Platform timestamp of the announcement message.
    pub spawned_at: DateTime<Utc>,
    pub channel_id: Snowflake,
    /// The announcement, deleted once caught.
    pub message_id: Snowflake,
}

#[derive(Debug, Clone)]
enum Slot {
    /// A spawn is being announced; the scope counts as occupied.
    Pending,
    Active(ActiveSpawn),
}

/// Owned, injectable spawn state for every scope.
#[derive(Debug, Default)]
pub struct SpawnTable {
    slots: Mutex<HashMap<Scope, Slot>>,
}

impl SpawnTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Scope, Slot>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim an empty scope for a new spawn. `false` if it is occupied.
    pub fn reserve(&self, scope: &Scope) -> bool {
        let mut slots = self.slots();
        if slots.contains_key(scope) {
            return false;
        }
        slots.insert(scope.clone(), Slot::Pending);
        true
    }

    /// Turn a reservation into an active spawn.
    ///
    /// Returns `false` (and records nothing) when the reservation was dropped
    /// in the meantime, e.g. by a teardown.
    pub fn activate(&self, scope: &Scope, spawn: ActiveSpawn) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(scope) {
            Some(slot @ Slot::Pending) => {
                *slot = Slot::Active(spawn);
                true
            }
            _ => false,
        }
    }

    /// Drop a reservation whose announcement failed. Active spawns are kept.
    pub fn release(&self, scope: &Scope) {
        let mut slots = self.slots();
        if matches!(slots.get(scope), Some(Slot::Pending)) {
            slots.remove(scope);
        }
    }

    /// Atomically take the active spawn of `scope` if it lives in `channel_id`.
    ///
    /// At most one caller ever receives a given spawn.
    pub fn take_matching(&self, scope: &Scope, channel_id: &str) -> Option<ActiveSpawn> {
        let mut slots = self.slots();
        match slots.get(scope) {
            Some(Slot::Active(spawn)) if spawn.channel_id == channel_id => {}
            _ => return None,
        }
        match slots.remove(scope) {
            Some(Slot::Active(spawn)) => Some(spawn),
            _ => None,
        }
    }

    /// Install `spawn` unconditionally, returning whatever it displaced.
    pub fn replace(&self, scope: &Scope, spawn: ActiveSpawn) -> Option<ActiveSpawn> {
        match self.slots().insert(scope.clone(), Slot::Active(spawn)) {
            Some(Slot::Active(previous)) => Some(previous),
            _ => None,
        }
    }

    pub fn get(&self, scope: &Scope) -> Option<ActiveSpawn> {
        match self.slots().get(scope) {
            Some(Slot::Active(spawn)) => Some(spawn.clone()),
            _ => None,
        }
    }

    /// Reserved or active.
    pub fn is_occupied(&self, scope: &Scope) -> bool {
        self.slots().contains_key(scope)
    }

    /// Forget one scope, e.g. after it was deregistered.
    pub fn clear(&self, scope: &Scope) -> Option<ActiveSpawn> {
        match self.slots().remove(scope) {
            Some(Slot::Active(spawn)) => Some(spawn),
            _ => None,
        }
    }

    /// Forget every scope of a guild. Returns how many were dropped.
    pub fn clear_guild(&self, guild_id: &str) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|scope, _| scope.guild_id != guild_id);
        before - slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }
}
