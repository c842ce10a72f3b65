//! Per-worker sandbox lifecycle: OS user + directory provisioning,
//! resource caps, command wrapping, and TTL-based eviction.
//!
//! Sandbox creation and teardown run remote shell commands on the owning
//! worker; this crate is transport-agnostic and drives them through the
//! [`RemoteExec`] trait, which the worker pool implements over SSH.

mod manager;
mod provision;
mod remote;
mod types;

pub use manager::{spawn_eviction_ticker, SandboxManager};
pub use provision::wrap_command;
pub use remote::RemoteExec;
pub use types::{ExecOutput, ResourceCaps, Sandbox, SandboxId};
