//! Advisory resource locks and per-resource commit guards

use crate::entities::{Actor, Context, ProjectId, ResourceId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock a short synchronous section, recovering the data if a previous
/// holder panicked. None of the guarded structures are left half-updated
/// by a panic.
pub(crate) fn unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    /// Taken explicitly on a resource
    Exclusive,
    /// Inherited from an exclusive lock on a sibling
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lock {
    pub holder: Actor,
    pub project: ProjectId,
    pub kind: LockKind,
    /// The resource carrying the exclusive lock this one belongs to
    pub origin: ResourceId,
    #[serde(with = "time::serde::rfc3339")]
    pub acquired_at: OffsetDateTime,
}

/// In-memory lock table. Locks are advisory: they block edits and
/// publishing by other actors but do not survive a restart.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<ResourceId, Lock>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `target` exclusively and its `siblings` shared for `ctx.actor`.
    ///
    /// Fails with the conflicting holder if another actor holds a lock on
    /// any of them. Re-locking by the same holder is a no-op.
    pub fn acquire(
        &self,
        target: ResourceId,
        siblings: &[ResourceId],
        ctx: &Context,
    ) -> Result<(), Actor> {
        let mut locks = unpoisoned(&self.locks);

        let conflict = std::iter::once(&target)
            .chain(siblings)
            .filter_map(|id| locks.get(id))
            .find(|lock| lock.holder != ctx.actor);
        if let Some(lock) = conflict {
            return Err(lock.holder.clone());
        }

        let now = OffsetDateTime::now_utc();
        locks.insert(
            target,
            Lock {
                holder: ctx.actor.clone(),
                project: ctx.project,
                kind: LockKind::Exclusive,
                origin: target,
                acquired_at: now,
            },
        );
        for sibling in siblings.iter().filter(|id| **id != target) {
            locks.entry(*sibling).or_insert_with(|| Lock {
                holder: ctx.actor.clone(),
                project: ctx.project,
                kind: LockKind::Shared,
                origin: target,
                acquired_at: now,
            });
        }
        Ok(())
    }

    /// Release the lock on `target` together with the shared locks it
    /// placed on siblings. Releasing a shared lock releases its origin.
    pub fn release(&self, target: &ResourceId) -> Option<Lock> {
        let mut locks = unpoisoned(&self.locks);
        let lock = locks.get(target)?.clone();
        let origin = lock.origin;
        locks.retain(|id, l| *id != origin && l.origin != origin);
        Some(lock)
    }

    /// Release every lock acquired in `project`; returns how many went
    pub fn release_project(&self, project: &ProjectId) -> usize {
        let mut locks = unpoisoned(&self.locks);
        let before = locks.len();
        locks.retain(|_, lock| lock.project != *project);
        before - locks.len()
    }

    pub fn lock_of(&self, id: &ResourceId) -> Option<Lock> {
        unpoisoned(&self.locks).get(id).cloned()
    }

    /// The lock on `id` if it is held by someone other than `actor`
    pub fn blocking(&self, id: &ResourceId, actor: &Actor) -> Option<Lock> {
        unpoisoned(&self.locks)
            .get(id)
            .filter(|lock| lock.holder != *actor)
            .cloned()
    }

    /// Drop any lock on a resource that no longer exists
    pub fn forget(&self, id: &ResourceId) {
        unpoisoned(&self.locks).remove(id);
    }

    pub fn len(&self) -> usize {
        unpoisoned(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keyed async mutex serializing commits to a single resource.
///
/// Multi-resource sections must go through [`CommitGuards::lock_all`],
/// which acquires in id order.
#[derive(Debug, Default)]
pub struct CommitGuards {
    guards: Mutex<HashMap<ResourceId, Arc<AsyncMutex<()>>>>,
}

impl CommitGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: ResourceId) -> Arc<AsyncMutex<()>> {
        unpoisoned(&self.guards).entry(id).or_default().clone()
    }

    pub async fn lock(&self, id: ResourceId) -> OwnedMutexGuard<()> {
        self.entry(id).lock_owned().await
    }

    /// Lock several resources in ascending id order, skipping duplicates
    pub async fn lock_all(&self, ids: &[ResourceId]) -> Vec<OwnedMutexGuard<()>> {
        let mut ordered = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut held = Vec::with_capacity(ordered.len());
        for id in ordered {
            held.push(self.lock(id).await);
        }
        held
    }

    /// Remove the guard of an erased resource
    pub fn forget(&self, id: &ResourceId) {
        unpoisoned(&self.guards).remove(id);
    }
}
