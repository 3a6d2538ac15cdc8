//! Configuration types and helpers.
//!
//! Two sources feed the supervisor: the [`SupervisorSettings`] file that describes the host
//! layout and tunables, and the declarative app configuration queried through [`ConfigStore`].

mod defaults;
mod settings;
mod tree;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use settings::*;
pub use tree::*;
