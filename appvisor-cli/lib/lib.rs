//! `appvisor-cli` is the command line front end of the app supervisor.
//!
//! It parses the `appvisord` arguments, sets up logging and loads the settings and app
//! configuration before handing control to [`appvisor_core::runtime::run`].

#![warn(missing_docs)]

mod args;
mod daemon;
mod error;
mod styles;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
pub use daemon::*;
pub use error::*;
pub use styles::*;
