//! `appvisor-utils` is a library containing low-level helpers for the appvisor supervisor:
//! the cgroup-v2 tree that groups each app's processes, and parsing of the live mount table.

#![warn(missing_docs)]

pub mod cgroup;
pub mod error;
pub mod mounts;
pub mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cgroup::*;
pub use error::*;
pub use mounts::*;
pub use path::*;
