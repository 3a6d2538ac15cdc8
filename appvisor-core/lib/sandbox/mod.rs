//! App sandboxes: building the isolated filesystem root and confining processes to it.

mod builder;
mod confine;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use builder::*;
pub use confine::*;
