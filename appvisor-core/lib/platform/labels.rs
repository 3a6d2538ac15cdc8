//! Mandatory access control labels.
//!
//! Every app is identified by the label `app.<name>`. Access labels `app.<name><perms>` let
//! objects carry a permission set for one app, and device nodes are labelled
//! `dev.<major>.<minor>`.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use appvisor_utils::{SMACK_LOAD_PATH, SMACK_REVOKE_SUBJECT_PATH, SMACK_XATTR_NAME};

use crate::{AppvisorError, AppvisorResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Assigns labels and installs or revokes access rules.
pub trait SecurityLabels: Send + Sync {
    /// Grants `subject` the `access` permissions (a subset of `rwx`) on `object`.
    fn set_rule(&self, subject: &str, access: &str, object: &str) -> AppvisorResult<()>;

    /// Revokes every rule whose subject is `subject`.
    fn revoke_subject(&self, subject: &str) -> AppvisorResult<()>;

    /// Labels a file.
    fn set_file_label(&self, path: &Path, label: &str) -> AppvisorResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Labels backed by smackfs.
#[derive(Debug, Clone)]
pub struct SmackLabels {
    load_path: PathBuf,
    revoke_path: PathBuf,
}

/// Labels on a host without a mandatory access control module. Every call succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabels;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SmackLabels {
    /// Uses the smackfs interface files at the given paths.
    pub fn new(load_path: impl Into<PathBuf>, revoke_path: impl Into<PathBuf>) -> Self {
        Self {
            load_path: load_path.into(),
            revoke_path: revoke_path.into(),
        }
    }

    fn write_interface(&self, path: &Path, line: &str) -> AppvisorResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| AppvisorError::Label(format!("{}: {}", path.display(), e)))?;

        file.write_all(line.as_bytes())
            .map_err(|e| AppvisorError::Label(format!("'{}' -> {}: {}", line, path.display(), e)))
    }
}

impl Default for SmackLabels {
    fn default() -> Self {
        Self::new(SMACK_LOAD_PATH, SMACK_REVOKE_SUBJECT_PATH)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl SecurityLabels for SmackLabels {
    fn set_rule(&self, subject: &str, access: &str, object: &str) -> AppvisorResult<()> {
        let access = if access.is_empty() { "-" } else { access };
        tracing::debug!("smack rule: {} {} {}", subject, object, access);
        self.write_interface(&self.load_path, &format!("{} {} {}", subject, object, access))
    }

    fn revoke_subject(&self, subject: &str) -> AppvisorResult<()> {
        tracing::debug!("revoking smack rules of subject {}", subject);
        self.write_interface(&self.revoke_path, subject)
    }

    fn set_file_label(&self, path: &Path, label: &str) -> AppvisorResult<()> {
        xattr::set(path, SMACK_XATTR_NAME, label.as_bytes()).map_err(|e| {
            AppvisorError::Label(format!("labelling {} as {}: {}", path.display(), label, e))
        })
    }
}

impl SecurityLabels for NoLabels {
    fn set_rule(&self, _subject: &str, _access: &str, _object: &str) -> AppvisorResult<()> {
        Ok(())
    }

    fn revoke_subject(&self, _subject: &str) -> AppvisorResult<()> {
        Ok(())
    }

    fn set_file_label(&self, _path: &Path, _label: &str) -> AppvisorResult<()> {
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Uses smackfs when it is mounted, and no labels otherwise.
pub fn detect_labels() -> Arc<dyn SecurityLabels> {
    if Path::new(SMACK_LOAD_PATH).exists() {
        tracing::info!("smackfs found, enforcing app labels");
        Arc::new(SmackLabels::default())
    } else {
        tracing::warn!("smackfs not found, app labels are not enforced");
        Arc::new(NoLabels)
    }
}

/// The label of an app.
pub fn app_label(app: &str) -> String {
    format!("app.{}", app)
}

/// The label granting `perms` on an object to an app.
pub fn access_label(app: &str, perms: &str) -> String {
    format!("app.{}{}", app, perms)
}

/// The label of a device node.
pub fn device_label(major: u64, minor: u64) -> String {
    format!("dev.{}.{}", major, minor)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
