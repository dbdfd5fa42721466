//! Platform-neutral contracts shared by the gateway and its Unix backend.

pub mod command;
pub mod executor;
pub mod filesystem;
