//! Build registry and aggregate state machine.
//!
//! [`BuildTarget`] is a pure data structure: the aggregate is derived from
//! the current build set on every read, never stored. [`BuildRegistry`] wraps
//! the targets in per-target locks so that concurrent webhook deliveries for
//! the same target serialize their read-mutate-aggregate-notify sequence
//! while deliveries for different targets proceed in parallel.

use crate::{BuildId, BuildStatus, StateError, TargetId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// Build and BuildTarget
// ============================================================================

/// One CI run reported by one provider against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub id: BuildId,
    pub name: String,
    pub status: BuildStatus,
}

/// The set of builds tracked for one review target.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    target_id: TargetId,
    builds: HashMap<BuildId, Build>,
}

impl BuildTarget {
    pub fn new(target_id: TargetId) -> Self {
        Self {
            target_id,
            builds: HashMap::new(),
        }
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    /// Register a build under this target with status [`BuildStatus::Queued`].
    ///
    /// Re-invocation with an already-seen build id overwrites the name and
    /// resets the status: triggering is a create-or-replace operation.
    pub fn queue_build(&mut self, id: BuildId, name: impl Into<String>) {
        let build = Build {
            id: id.clone(),
            name: name.into(),
            status: BuildStatus::Queued,
        };
        self.builds.insert(id, build);
    }

    /// Set the status of an already-registered build.
    ///
    /// The registry never auto-creates on update; a status for an unseen
    /// build id means the queue event was lost or reordered and is a
    /// [`StateError`].
    pub fn update_build_status(
        &mut self,
        id: &BuildId,
        status: BuildStatus,
        policy: &dyn UpdatePolicy,
    ) -> Result<(), StateError> {
        let build = self
            .builds
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownBuild {
                target: self.target_id.clone(),
                build: id.clone(),
            })?;
        build.status = policy.transition(build, status)?;
        Ok(())
    }

    pub fn build(&self, id: &BuildId) -> Option<&Build> {
        self.builds.get(id)
    }

    pub fn builds(&self) -> impl Iterator<Item = &Build> {
        self.builds.values()
    }

    /// Compute the aggregate status over the current build set.
    ///
    /// Deterministic and order-independent. A target with no required builds
    /// vacuously passes, which lets review units that need no CI be treated
    /// as clear.
    pub fn aggregate(&self) -> BuildStatus {
        if self.builds.is_empty() {
            return BuildStatus::Success;
        }
        if self
            .builds
            .values()
            .any(|b| b.status == BuildStatus::Failure)
        {
            return BuildStatus::Failure;
        }
        if self
            .builds
            .values()
            .all(|b| b.status == BuildStatus::Success)
        {
            return BuildStatus::Success;
        }
        if self.builds.values().all(|b| b.status == BuildStatus::Queued) {
            return BuildStatus::Queued;
        }
        BuildStatus::Running
    }

    /// Whether every build has reached a terminal status.
    ///
    /// A target can be finished while its aggregate is Failure; it can never
    /// be finished while anything is still Queued, Running, or Unknown.
    pub fn is_finished(&self) -> bool {
        self.builds.values().all(|b| b.status.is_terminal())
    }
}

// ============================================================================
// Update policy
// ============================================================================

/// Decides whether a proposed status may overwrite a build's current status.
///
/// The observed provider behavior is last-write-wins with no transition
/// graph: a stale queued replay may overwrite a success. That behavior is
/// deliberately preserved, but it lives behind this trait so a
/// transition-guarded variant can be substituted without touching callers.
pub trait UpdatePolicy: Send + Sync {
    fn transition(&self, build: &Build, proposed: BuildStatus) -> Result<BuildStatus, StateError>;
}

/// The default policy: any status may overwrite any other.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriteWins;

impl UpdatePolicy for LastWriteWins {
    fn transition(&self, _build: &Build, proposed: BuildStatus) -> Result<BuildStatus, StateError> {
        Ok(proposed)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Mutable per-target state: the build set plus the last announced aggregate.
///
/// `last_notified` is the duplicate-notification guard; it is only ever read
/// and written under the target's lock.
#[derive(Debug)]
pub struct TargetState {
    pub target: BuildTarget,
    pub last_notified: Option<BuildStatus>,
}

impl TargetState {
    fn new(target_id: TargetId) -> Self {
        Self {
            target: BuildTarget::new(target_id),
            last_notified: None,
        }
    }
}

/// The collection of known build targets.
///
/// The outer map lock is held only for lookup/insert; all per-target work
/// happens under the target's own async lock so that provider fetches and
/// notification posts for one target never block another target's handler.
pub struct BuildRegistry {
    targets: Mutex<HashMap<TargetId, Arc<tokio::sync::Mutex<TargetState>>>>,
    policy: Arc<dyn UpdatePolicy>,
}

impl BuildRegistry {
    pub fn new(policy: Arc<dyn UpdatePolicy>) -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &dyn UpdatePolicy {
        self.policy.as_ref()
    }

    /// Look up the state for a target, creating it on first reference.
    pub fn entry(&self, target_id: &TargetId) -> Arc<tokio::sync::Mutex<TargetState>> {
        let mut targets = self.targets.lock().expect("registry lock poisoned");
        targets
            .entry(target_id.clone())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(TargetState::new(target_id.clone())))
            })
            .clone()
    }

    /// Look up the state for a target without creating it.
    ///
    /// Status events can reference targets this service never queued (e.g.
    /// builds triggered out of band); those are skipped, not created.
    pub fn get(&self, target_id: &TargetId) -> Option<Arc<tokio::sync::Mutex<TargetState>>> {
        let targets = self.targets.lock().expect("registry lock poisoned");
        targets.get(target_id).cloned()
    }
}

impl Default for BuildRegistry {
    fn default() -> Self {
        Self::new(Arc::new(LastWriteWins))
    }
}

impl std::fmt::Debug for BuildRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let targets = self.targets.lock().expect("registry lock poisoned");
        f.debug_struct("BuildRegistry")
            .field("targets", &targets.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
