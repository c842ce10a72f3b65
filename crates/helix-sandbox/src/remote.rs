use std::time::Duration;

use async_trait::async_trait;
use helix_common::Result;

use crate::types::ExecOutput;

/// Abstracts over "run this shell command on the worker" so the sandbox
/// manager can provision OS users and wrap commands without owning an SSH
/// connection itself. Implemented by the worker pool.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput>;
}
