//! Construction and teardown of an app's sandbox.
//!
//! A sandbox is a size-bounded tmpfs at `<runtime_dir>/sandboxes/<app>` holding a few fixed
//! directories and bind mounts of the host files the app imports. Bind mounts keep host-side
//! updates visible and cost no storage inside the tmpfs.

use std::{
    cmp::Reverse,
    fs::{self, File, Permissions},
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use nix::unistd::{Gid, Uid};
use scopeguard::ScopeGuard;

use crate::{
    config::{join_path, ConfigStore, ImportSpec},
    platform::Platform,
    AppvisorError, AppvisorResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const TMP_DIR_MODE: u32 = 0o1707;

const HOME_DIR_MODE: u32 = 0o705;

const APP_HOME_DIR_MODE: u32 = 0o700;

const DEVICE_IMPORT_DIR: &str = "/dev/";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What the builder needs to know about the app.
#[derive(Debug, Clone, Copy)]
pub struct SandboxSpec<'a> {
    /// App name.
    pub app: &'a str,

    /// The app's node in the configuration tree.
    pub cfg_path: &'a str,

    /// Sandbox root on the host.
    pub root: &'a Path,

    /// The app's install directory. Relative import sources resolve against it.
    pub install_dir: &'a Path,

    /// Owner of the app's home directory.
    pub uid: Uid,

    /// Group of the app's home directory.
    pub gid: Gid,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the sandbox described by `spec`.
///
/// A stale sandbox left at the same path is removed first. If any step fails, whatever was
/// built is removed again and the error is returned.
pub fn setup(platform: &Platform, spec: &SandboxSpec) -> AppvisorResult<()> {
    let fail = |what: &str, e: io::Error| {
        AppvisorError::sandbox(spec.app, format!("{} {}: {}", what, spec.root.display(), e))
    };

    if let Some(sandboxes_dir) = spec.root.parent() {
        fs::create_dir_all(sandboxes_dir).map_err(|e| fail("creating parent of", e))?;
    }

    match fs::create_dir(spec.root) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            tracing::warn!(
                "stale sandbox found for app {} at {}, rebuilding",
                spec.app,
                spec.root.display()
            );
            remove(platform, spec.app, spec.root)?;
            fs::create_dir(spec.root).map_err(|e| fail("creating", e))?;
        }
        Err(e) => return Err(fail("creating", e)),
    }

    let rollback = scopeguard::guard((), |_| {
        if let Err(e) = remove(platform, spec.app, spec.root) {
            tracing::error!("could not clean up sandbox of app {}: {}", spec.app, e);
        }
    });

    populate(platform, spec)?;

    ScopeGuard::into_inner(rollback);
    tracing::info!("built sandbox for app {} at {}", spec.app, spec.root.display());

    Ok(())
}

/// Tears down the sandbox at `root`.
///
/// Every mount nested under `root` is unmounted deepest first, repeating passes until none is
/// left, which takes care of several mounts stacked on one path. The root mount goes last and
/// the directory tree is deleted. Works on partially built and already removed sandboxes.
pub fn remove(platform: &Platform, app: &str, root: &Path) -> AppvisorResult<()> {
    let pass_limit = *platform.settings.get_unmount_pass_limit();
    let mut cleared = false;

    for _ in 0..pass_limit {
        let mut nested: Vec<PathBuf> = platform
            .fs
            .mount_points()?
            .into_iter()
            .filter(|point| point != root && point.starts_with(root))
            .collect();

        if nested.is_empty() {
            cleared = true;
            break;
        }

        nested.sort_by_key(|point| Reverse(point.components().count()));
        for point in &nested {
            unmount_tolerant(platform, app, point)?;
            delete_mount_point(point);
        }
    }

    if !cleared {
        tracing::warn!(
            "mounts remain under {} after {} passes",
            root.display(),
            pass_limit
        );
    }

    unmount_tolerant(platform, app, root)?;

    match fs::remove_dir_all(root) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(AppvisorError::sandbox(
                app,
                format!("deleting {}: {}", root.display(), e),
            ))
        }
    }

    tracing::info!("removed sandbox of app {}", app);
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn populate(platform: &Platform, spec: &SandboxSpec) -> AppvisorResult<()> {
    let config = platform.config.as_ref();

    let size = platform.limits.sandbox_fs_bytes(config, spec.cfg_path);
    platform
        .fs
        .mount_tmpfs(spec.root, size)
        .map_err(|e| AppvisorError::sandbox(spec.app, format!("mounting tmpfs: {}", e)))?;

    make_dir(spec, &spec.root.join("tmp"), TMP_DIR_MODE)?;
    make_dir(spec, &spec.root.join("home"), HOME_DIR_MODE)?;

    let app_home = spec.root.join("home").join(spec.app);
    make_dir(spec, &app_home, APP_HOME_DIR_MODE)?;
    platform
        .fs
        .chown(&app_home, spec.uid, spec.gid)
        .map_err(|e| AppvisorError::sandbox(spec.app, format!("chown home: {}", e)))?;

    let mut imports = Vec::new();
    if config.get_bool(&join_path(spec.cfg_path, "debug"), false) {
        tracing::info!("app {} is in debug mode", spec.app);
        imports.extend(platform.settings.get_debug_imports().iter().cloned());
    }
    imports.extend(configured_files(config, spec)?);
    imports.extend(configured_devices(config, spec)?);
    imports.extend(platform.settings.get_default_imports().iter().cloned());

    for import in &imports {
        import_object(platform, spec, import)?;
    }

    Ok(())
}

fn make_dir(spec: &SandboxSpec, dir: &Path, mode: u32) -> AppvisorResult<()> {
    fs::create_dir_all(dir)
        .and_then(|()| fs::set_permissions(dir, Permissions::from_mode(mode)))
        .map_err(|e| AppvisorError::sandbox(spec.app, format!("creating {}: {}", dir.display(), e)))
}

fn configured_files(config: &dyn ConfigStore, spec: &SandboxSpec) -> AppvisorResult<Vec<ImportSpec>> {
    let files = join_path(spec.cfg_path, "requires/files");
    let mut imports = Vec::new();

    for child in config.children(&files) {
        let node = join_path(&files, &child);
        let src = required_string(config, spec, &join_path(&node, "src"))?;
        let dest = required_string(config, spec, &join_path(&node, "dest"))?;

        imports.push(ImportSpec {
            src: spec.install_dir.join(src),
            dest: PathBuf::from(dest),
        });
    }

    Ok(imports)
}

fn configured_devices(
    config: &dyn ConfigStore,
    spec: &SandboxSpec,
) -> AppvisorResult<Vec<ImportSpec>> {
    let devices = join_path(spec.cfg_path, "requires/devices");

    config
        .children(&devices)
        .into_iter()
        .map(|child| {
            let src = required_string(config, spec, &join_path(&join_path(&devices, &child), "src"))?;
            Ok(ImportSpec {
                src: PathBuf::from(src),
                dest: PathBuf::from(DEVICE_IMPORT_DIR),
            })
        })
        .collect()
}

fn required_string(config: &dyn ConfigStore, spec: &SandboxSpec, path: &str) -> AppvisorResult<String> {
    match config.get_string(path)? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AppvisorError::sandbox(
            spec.app,
            format!("'{}' is missing or empty", path),
        )),
    }
}

fn import_object(platform: &Platform, spec: &SandboxSpec, import: &ImportSpec) -> AppvisorResult<()> {
    let fail = |message: String| AppvisorError::sandbox(spec.app, message);

    let name = import
        .src
        .file_name()
        .ok_or_else(|| fail(format!("cannot import {}", import.src.display())))?;
    let dest_dir = spec
        .root
        .join(import.dest.strip_prefix("/").unwrap_or(&import.dest));
    let target = dest_dir.join(name);

    let metadata = fs::metadata(&import.src)
        .map_err(|e| fail(format!("import source {}: {}", import.src.display(), e)))?;

    let prepared = if metadata.is_dir() {
        fs::create_dir_all(&target)
    } else {
        fs::create_dir_all(&dest_dir).and_then(|()| {
            if target.exists() {
                Ok(())
            } else {
                File::create(&target).map(drop)
            }
        })
    };
    prepared.map_err(|e| fail(format!("creating {}: {}", target.display(), e)))?;

    platform.fs.bind_mount(&import.src, &target).map_err(|e| {
        fail(format!(
            "binding {} to {}: {}",
            import.src.display(),
            target.display(),
            e
        ))
    })?;

    tracing::debug!(
        "imported {} into app {} at {}",
        import.src.display(),
        spec.app,
        target.display()
    );

    Ok(())
}

fn unmount_tolerant(platform: &Platform, app: &str, point: &Path) -> AppvisorResult<()> {
    match platform.fs.unmount(point) {
        Ok(()) => {
            tracing::debug!("unmounted {}", point.display());
            Ok(())
        }
        Err(e) if matches!(e.raw_os_error(), Some(libc::EINVAL) | Some(libc::ENOENT)) => Ok(()),
        Err(e) => Err(AppvisorError::sandbox(
            app,
            format!("unmounting {}: {}", point.display(), e),
        )),
    }
}

fn delete_mount_point(point: &Path) {
    let deleted = match fs::symlink_metadata(point) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir(point),
        Ok(_) => fs::remove_file(point),
        Err(e) => Err(e),
    };

    match deleted {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // Still covered by another mount, or holding nested mount points.
        Err(e) if matches!(e.raw_os_error(), Some(libc::EBUSY) | Some(libc::ENOTEMPTY)) => {}
        Err(e) => tracing::warn!("could not delete mount point {}: {}", point.display(), e),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
