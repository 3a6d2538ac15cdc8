use nix::unistd::{Gid, Uid};

use crate::{AppvisorError, AppvisorResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Resolves the accounts apps run under.
pub trait UserRegistry: Send + Sync {
    /// The uid and primary gid of the account an app runs as.
    fn app_ids(&self, app: &str) -> AppvisorResult<(Uid, Gid)>;

    /// The gid of a named group.
    fn group_id(&self, group: &str) -> AppvisorResult<Gid>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Accounts from the host user database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUsers;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl UserRegistry for SystemUsers {
    fn app_ids(&self, app: &str) -> AppvisorResult<(Uid, Gid)> {
        let name = app_user_name(app);
        let user = uzers::get_user_by_name(&name)
            .ok_or_else(|| AppvisorError::Config(format!("user '{}' does not exist", name)))?;

        Ok((
            Uid::from_raw(user.uid()),
            Gid::from_raw(user.primary_group_id()),
        ))
    }

    fn group_id(&self, group: &str) -> AppvisorResult<Gid> {
        let found = uzers::get_group_by_name(group)
            .ok_or_else(|| AppvisorError::Config(format!("group '{}' does not exist", group)))?;

        Ok(Gid::from_raw(found.gid()))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The account name of an app.
pub fn app_user_name(app: &str) -> String {
    format!("app{}", app)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
