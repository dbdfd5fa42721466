//! File manager backend: every filesystem verb the front-end issues,
//! carried out natively when the service account may, and through an
//! allow-listed elevated command when it may not.

pub mod api;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod lister;
mod maintenance;
pub mod outcome;
pub mod paths;
pub mod resolver;
pub mod search;
pub mod upload;
pub mod walk;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::Gateway;
