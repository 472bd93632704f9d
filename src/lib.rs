//! sshPilot core library
//!
//! Connection records backed by the OpenSSH client config, a hierarchical
//! group tree for organising them, and credential storage. The binary and
//! integration tests use it through these modules.

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod secrets;
pub mod security_log;
pub mod ssh_config;
pub mod validation;
