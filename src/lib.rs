//! Core library for the `bastion` tool.
//!
//! The crate provisions short-lived EC2 bastions, waits for them to become
//! reachable, connects the operator through AWS Session Manager, and tears
//! every created resource down again on exit (launch → wait → session →
//! teardown). Remote collaborators sit behind the ports in [`provider`]; the
//! production adapter lives in [`aws`].

pub mod aws;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod grant;
pub mod identity;
pub mod interrupt;
pub mod orchestrator;
pub mod provider;
pub mod provision;
pub mod runner;
pub mod select;
pub mod teardown;
pub mod test_support;
pub mod wait;

pub use config::{BastionConfig, ConfigError, ConfigOverrides, Settings};
pub use orchestrator::{BastionError, FlowReport, Orchestrator};
pub use provider::{CloudPorts, ProviderError};
