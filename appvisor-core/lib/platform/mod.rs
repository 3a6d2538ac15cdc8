//! Collaborators the supervisor drives: process groups, security labels, resource limits,
//! process spawning, kill timers, user lookup and sandbox filesystem operations.
//!
//! Each collaborator is a trait object so the supervisor can run against the host or against
//! in-memory fakes.

mod fs;
mod groups;
mod labels;
mod limits;
mod spawn;
mod timers;
mod users;

use std::sync::Arc;

use appvisor_utils::CgroupTree;
use tokio::sync::mpsc;
use typed_builder::TypedBuilder;

use crate::{
    config::{ConfigStore, SupervisorSettings},
    runtime::SupervisorEvent,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use fs::*;
pub use groups::*;
pub use labels::*;
pub use limits::*;
pub use spawn::*;
pub use timers::*;
pub use users::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything an app needs from the outside world.
#[derive(Clone, TypedBuilder)]
pub struct Platform {
    /// Host layout and tunables.
    pub settings: Arc<SupervisorSettings>,

    /// The declarative app configuration.
    pub config: Arc<dyn ConfigStore>,

    /// Per-app process groups.
    pub groups: Arc<dyn ProcessGroups>,

    /// Mandatory access control labels and rules.
    pub labels: Arc<dyn SecurityLabels>,

    /// App and process resource limits.
    pub limits: Arc<dyn ResourceLimits>,

    /// OS process creation and signalling.
    pub spawner: Arc<dyn ProcessSpawner>,

    /// One-shot hard-kill timers.
    pub timers: Arc<dyn KillTimers>,

    /// Account lookup.
    pub users: Arc<dyn UserRegistry>,

    /// Mount and ownership operations for sandboxes.
    pub fs: Arc<dyn SandboxFs>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Platform {
    /// Builds the host platform. Kill timer expiries are delivered on `events`.
    pub fn system(
        settings: SupervisorSettings,
        config: Arc<dyn ConfigStore>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let cgroups = CgroupTree::new(settings.get_cgroup_root());

        Platform::builder()
            .limits(Arc::new(CgroupLimits::new(cgroups.clone())))
            .groups(Arc::new(cgroups))
            .labels(detect_labels())
            .spawner(Arc::new(OsSpawner))
            .timers(Arc::new(TokioKillTimers::new(events)))
            .users(Arc::new(SystemUsers))
            .fs(Arc::new(SystemFs))
            .settings(Arc::new(settings))
            .config(config)
            .build()
    }
}
