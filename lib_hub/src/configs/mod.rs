//! # Configuration Modules
//!
//! Runtime settings for the hub server, layered from defaults, an optional
//! JSON file and the environment / command line.

/// Hub server configuration loading and resolution.
pub mod config_hub;
