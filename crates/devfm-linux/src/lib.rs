// Unix implementations of the platform contracts

#[cfg(unix)]
pub mod executor;

#[cfg(unix)]
pub mod filesystem;
