// src/config/mod.rs

//! Configuration file for `procmux`.
//!
//! - `model.rs`: the TOML-backed data model and its conversion into runtime
//!   values ([`ExecSettings`](crate::process::ExecSettings),
//!   [`PlatformCapabilities`](crate::platform::PlatformCapabilities)).
//! - `loader.rs`: reading a file from disk.
//! - `validate.rs`: semantic checks (durations, sizes, backend names).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigFile, ExecutionSection, PlatformSection, ReactorSection};
pub use validate::validate_config;
