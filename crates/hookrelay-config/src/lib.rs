//! Hookrelay Config - configuration file handling
//!
//! One JSON file holds everything: server binding, security policy,
//! heartbeat tuning, logging, and the tenant table itself. The file is
//! self-healing on load (missing fields take defaults, an unreadable file
//! is set aside and replaced) and every save rotates a bounded set of
//! backups first.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod settings;
mod store;

pub use error::*;
pub use settings::*;
pub use store::*;

/// Backups kept per config file, newest first.
pub const MAX_BACKUPS: usize = 5;
