//! Access rules installed for a running app.

use std::{
    fs,
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::Path,
};

use nix::sys::stat::{major, minor};

use crate::{
    config::{join_path, ConfigStore, FRAMEWORK_LABEL, SYSLOG_LABEL},
    platform::{access_label, app_label, device_label, SecurityLabels},
    AppvisorError, AppvisorResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Every permission combination an app has an access label for.
const ACCESS_PERMISSIONS: [&str; 7] = ["x", "w", "wx", "r", "rx", "rw", "rwx"];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Replaces the rules of `app` with the ones its configuration calls for.
pub fn install_app_rules(
    labels: &dyn SecurityLabels,
    config: &dyn ConfigStore,
    app: &str,
    app_cfg: &str,
) -> AppvisorResult<()> {
    let subject = app_label(app);
    labels.revoke_subject(&subject)?;

    for perms in ACCESS_PERMISSIONS {
        labels.set_rule(&subject, perms, &access_label(app, perms))?;
    }

    labels.set_rule(FRAMEWORK_LABEL, "w", &subject)?;
    labels.set_rule(&subject, "rw", FRAMEWORK_LABEL)?;
    labels.set_rule(&subject, "w", SYSLOG_LABEL)?;

    install_binding_rules(labels, config, &subject, app_cfg)?;
    install_device_rules(labels, config, &subject, app_cfg)?;

    tracing::debug!("installed access rules for app {}", app);
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn install_binding_rules(
    labels: &dyn SecurityLabels,
    config: &dyn ConfigStore,
    subject: &str,
    app_cfg: &str,
) -> AppvisorResult<()> {
    let bindings = join_path(app_cfg, "bindings");

    for binding in config.children(&bindings) {
        let peer_path = join_path(&join_path(&bindings, &binding), "app");
        match config.get_string(&peer_path)? {
            Some(peer) if !peer.is_empty() => {
                let peer = app_label(&peer);
                labels.set_rule(subject, "rw", &peer)?;
                labels.set_rule(&peer, "rw", subject)?;
            }
            _ => tracing::debug!("binding {} names no server app", binding),
        }
    }

    Ok(())
}

fn install_device_rules(
    labels: &dyn SecurityLabels,
    config: &dyn ConfigStore,
    subject: &str,
    app_cfg: &str,
) -> AppvisorResult<()> {
    let devices = join_path(app_cfg, "requires/devices");

    for device in config.children(&devices) {
        let node = join_path(&devices, &device);
        let src = config
            .get_string(&join_path(&node, "src"))?
            .filter(|src| !src.is_empty())
            .ok_or_else(|| AppvisorError::Label(format!("{} has no src", node)))?;
        let readable = config.get_bool(&join_path(&node, "isReadable"), false);
        let writable = config.get_bool(&join_path(&node, "isWritable"), false);

        let label = label_device(labels, Path::new(&src))?;
        let perms = match (readable, writable) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => continue,
        };
        labels.set_rule(subject, perms, &label)?;
    }

    Ok(())
}

fn label_device(labels: &dyn SecurityLabels, src: &Path) -> AppvisorResult<String> {
    let metadata = fs::metadata(src)
        .map_err(|e| AppvisorError::Label(format!("cannot stat {}: {}", src.display(), e)))?;

    let file_type = metadata.file_type();
    if !file_type.is_char_device() && !file_type.is_block_device() {
        return Err(AppvisorError::Label(format!(
            "{} is not a device",
            src.display()
        )));
    }

    let rdev = metadata.rdev();
    let label = device_label(major(rdev), minor(rdev));
    labels.set_file_label(src, &label)?;

    Ok(label)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
