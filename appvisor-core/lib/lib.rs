//! `appvisor-core` supervises sandboxed applications on an embedded Linux host.
//!
//! # Overview
//!
//! An app is a named set of processes described by a declarative configuration tree. The
//! supervisor starts each app in its own process group, optionally inside a sandbox (a small
//! tmpfs root with bind-mounted imports that the processes are chrooted into), applies resource
//! limits and access rules, and reacts to process deaths and watchdog timeouts according to
//! the configured fault policy.
//!
//! # Modules
//!
//! - [`config`] - Supervisor settings and the app configuration tree
//! - [`platform`] - The OS collaborators: process groups, labels, limits, spawning, timers,
//!   users and mounts
//! - [`sandbox`] - Building, tearing down and entering app sandboxes
//! - [`management`] - Apps, processes, fault policy and the supervisor
//! - [`runtime`] - The event loop that drives the supervisor

#![warn(missing_docs)]

mod error;

#[cfg(test)]
pub(crate) mod testing;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod management;
pub mod platform;
pub mod runtime;
pub mod sandbox;

pub use error::*;
