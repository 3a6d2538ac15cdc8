//! Two-phase termination of an app's process group.
//!
//! A kill freezes the group so no member can fork or react while the signal is broadcast, runs
//! the caller's bookkeeping, signals every member and thaws the group so the signal is acted on.
//! Freezing is best effort: a group that cannot be frozen is signalled anyway.

use std::time::Duration;

use appvisor_utils::FreezeState;
use nix::sys::signal::Signal;

use crate::{
    platform::{Platform, ProcessGroups},
    AppvisorResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which signal a kill uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillType {
    /// `SIGTERM`, which the app may catch to shut down cleanly.
    Soft,

    /// `SIGKILL`.
    Hard,
}

/// What a kill found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// This many members were signalled.
    Signalled(usize),

    /// The group had no members.
    Empty,
}

/// Runs kills against process groups.
pub struct KillEscalator<'a> {
    groups: &'a dyn ProcessGroups,
    poll_limit: u32,
    poll_interval: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KillType {
    /// The signal sent for this kill.
    pub fn signal(self) -> Signal {
        match self {
            KillType::Soft => Signal::SIGTERM,
            KillType::Hard => Signal::SIGKILL,
        }
    }
}

impl<'a> KillEscalator<'a> {
    /// Uses the platform's process groups and freeze polling settings.
    pub fn new(platform: &'a Platform) -> Self {
        Self {
            groups: platform.groups.as_ref(),
            poll_limit: *platform.settings.get_freeze_poll_limit(),
            poll_interval: platform.settings.freeze_poll_interval(),
        }
    }

    /// Kills every member of `group`. `mark_stopping` runs after the freeze and before the
    /// signal is sent.
    ///
    /// A member that refuses the signal is fatal.
    pub fn kill(
        &self,
        group: &str,
        kill: KillType,
        mark_stopping: impl FnOnce(),
    ) -> AppvisorResult<KillOutcome> {
        let frozen = self.freeze(group);

        mark_stopping();

        let signalled = self.groups.signal_all(group, kill.signal());

        if frozen {
            if let Err(e) = self.groups.thaw(group) {
                tracing::warn!("could not thaw process group {}: {}", group, e);
            }
        }

        match signalled? {
            0 => {
                tracing::debug!("process group {} is already empty", group);
                Ok(KillOutcome::Empty)
            }
            count => {
                tracing::info!("sent {} to {} processes of {}", kill.signal(), count, group);
                Ok(KillOutcome::Signalled(count))
            }
        }
    }

    /// Requests a freeze and waits a bounded time for it. Returns true if the group needs to
    /// be thawed afterwards.
    fn freeze(&self, group: &str) -> bool {
        if let Err(e) = self.groups.freeze(group) {
            tracing::warn!("could not freeze process group {}: {}", group, e);
            return false;
        }

        for _ in 0..self.poll_limit {
            match self.groups.freeze_state(group) {
                Ok(FreezeState::Frozen) => return true,
                Ok(_) => std::thread::sleep(self.poll_interval),
                Err(e) => {
                    tracing::warn!("could not read freeze state of {}: {}", group, e);
                    return true;
                }
            }
        }

        tracing::warn!(
            "process group {} not frozen after {} polls, signalling anyway",
            group,
            self.poll_limit
        );
        true
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
