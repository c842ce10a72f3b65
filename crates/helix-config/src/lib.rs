//! Config discovery, loading, and the root schema for the control plane.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use loader::{config_dir, discover_and_load, find_or_default_config_path, load_config, save_config};
pub use schema::{
    ConfirmConfig, ConsensusConfig, HelixConfig, LlmConfig, SandboxConfig, VisionConfig,
    WorkersConfig,
};
