use std::{
    io,
    path::{Path, PathBuf},
};

use appvisor_utils::read_mount_table;
use nix::{
    mount::{mount, umount, MsFlags},
    unistd::{chown, Gid, Uid},
};

use crate::AppvisorResult;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Mount and ownership operations used to build sandboxes.
pub trait SandboxFs: Send + Sync {
    /// Mounts a size-bounded tmpfs at `target`.
    fn mount_tmpfs(&self, target: &Path, size_bytes: u64) -> io::Result<()>;

    /// Bind-mounts `src` onto `target`.
    fn bind_mount(&self, src: &Path, target: &Path) -> io::Result<()>;

    /// Unmounts the topmost mount at `target`.
    fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Every current mount point, in mount order.
    fn mount_points(&self) -> AppvisorResult<Vec<PathBuf>>;

    /// Changes the owner of a path.
    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> io::Result<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The host's filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFs;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl SandboxFs for SystemFs {
    fn mount_tmpfs(&self, target: &Path, size_bytes: u64) -> io::Result<()> {
        let options = format!("size={},mode=0701,uid=0", size_bytes);
        mount(
            Some("none"),
            target,
            Some("tmpfs"),
            MsFlags::MS_NOSUID,
            Some(options.as_str()),
        )?;
        Ok(())
    }

    fn bind_mount(&self, src: &Path, target: &Path) -> io::Result<()> {
        mount(
            Some(src),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        umount(target)?;
        Ok(())
    }

    fn mount_points(&self) -> AppvisorResult<Vec<PathBuf>> {
        Ok(read_mount_table()?
            .into_iter()
            .map(|entry| entry.target)
            .collect())
    }

    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> io::Result<()> {
        chown(path, Some(uid), Some(gid))?;
        Ok(())
    }
}
