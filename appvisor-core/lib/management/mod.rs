//! App supervision: apps and their processes, fault and watchdog policy, and the two-phase
//! kill used to stop them.

mod action;
mod app;
mod kill;
mod policy;
mod process;
mod rules;
mod supervisor;

#[cfg(test)]
mod scenario_tests;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use action::*;
pub use app::*;
pub use kill::*;
pub use policy::*;
pub use process::*;
pub use rules::*;
pub use supervisor::*;
