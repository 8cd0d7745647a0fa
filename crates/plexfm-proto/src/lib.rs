//! Shared core of plexfm: domain and wire types, configuration, and the two
//! long-running pieces of logic, the Session Tracker and the Reconnect
//! Supervisor.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod supervisor;
