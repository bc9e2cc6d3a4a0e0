//! Subcommand implementations. Each returns the process exit code.

pub mod pending;
pub mod profiles;
pub mod send;
pub mod status;
