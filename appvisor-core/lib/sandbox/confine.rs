//! Confinement of a process to its app's sandbox.
//!
//! Confinement runs in the forked child before exec. The steps happen in a fixed order:
//! `chdir` into the working directory inside the sandbox, `chroot` to the sandbox root, replace
//! the supplementary groups, set the gid, and set the uid last. Setting the uid gives up the
//! privilege every earlier step needs, so the sequence stops at the first failure and the child
//! must not exec.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    unistd::{self, Gid, Uid},
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The five system calls confinement is made of.
pub trait ConfineOps {
    /// Changes the working directory.
    fn chdir(&self, dir: &Path) -> Result<(), Errno>;

    /// Changes the root directory.
    fn chroot(&self, root: &Path) -> Result<(), Errno>;

    /// Replaces the supplementary group list.
    fn setgroups(&self, groups: &[Gid]) -> Result<(), Errno>;

    /// Sets the real, effective and saved gid.
    fn setgid(&self, gid: Gid) -> Result<(), Errno>;

    /// Sets the real, effective and saved uid.
    fn setuid(&self, uid: Uid) -> Result<(), Errno>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A confinement plan, computed in the parent so the child only makes system calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confinement {
    /// The sandbox root.
    pub root: PathBuf,

    /// The working directory as a host path inside the sandbox root.
    pub working_dir: PathBuf,

    /// The uid the process runs as.
    pub uid: Uid,

    /// The primary gid.
    pub gid: Gid,

    /// Supplementary groups. Empty clears the list.
    pub groups: Vec<Gid>,
}

/// One confinement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfineStep {
    /// `chdir`
    Chdir,

    /// `chroot`
    Chroot,

    /// `setgroups`
    SetGroups,

    /// `setgid`
    SetGid,

    /// `setuid`
    SetUid,
}

/// The step that failed and its errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfineError {
    /// The failed step.
    pub step: ConfineStep,

    /// The errno it returned.
    pub errno: Errno,
}

/// Confinement through the real system calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConfine;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Confinement {
    /// Plans confinement to `root` with `inner_dir` (an absolute path inside the sandbox) as the
    /// working directory.
    pub fn new(
        root: impl Into<PathBuf>,
        inner_dir: &str,
        uid: Uid,
        gid: Gid,
        groups: Vec<Gid>,
    ) -> Self {
        let root = root.into();
        let working_dir = root.join(inner_dir.trim_start_matches('/'));
        Self {
            root,
            working_dir,
            uid,
            gid,
            groups,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ConfineOps for SystemConfine {
    fn chdir(&self, dir: &Path) -> Result<(), Errno> {
        unistd::chdir(dir)
    }

    fn chroot(&self, root: &Path) -> Result<(), Errno> {
        unistd::chroot(root)
    }

    fn setgroups(&self, groups: &[Gid]) -> Result<(), Errno> {
        unistd::setgroups(groups)
    }

    fn setgid(&self, gid: Gid) -> Result<(), Errno> {
        unistd::setgid(gid)
    }

    fn setuid(&self, uid: Uid) -> Result<(), Errno> {
        unistd::setuid(uid)
    }
}

impl fmt::Display for ConfineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failed: {}", self.step, self.errno)
    }
}

impl std::error::Error for ConfineError {}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Confines the calling process according to `plan`.
pub fn confine<O: ConfineOps>(ops: &O, plan: &Confinement) -> Result<(), ConfineError> {
    let fail = |step: ConfineStep| move |errno: Errno| ConfineError { step, errno };

    // chdir has to come first, the host path does not resolve after chroot.
    ops.chdir(&plan.working_dir).map_err(fail(ConfineStep::Chdir))?;
    ops.chroot(&plan.root).map_err(fail(ConfineStep::Chroot))?;
    ops.setgroups(&plan.groups)
        .map_err(fail(ConfineStep::SetGroups))?;
    ops.setgid(plan.gid).map_err(fail(ConfineStep::SetGid))?;
    ops.setuid(plan.uid).map_err(fail(ConfineStep::SetUid))?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
