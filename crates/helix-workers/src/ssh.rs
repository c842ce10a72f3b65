//! SSH transport: client construction, host-key verification, and command
//! execution over `russh`. Everything here is the one deliberate dependency
//! addition beyond the teacher's stack (see `DESIGN.md`); the connection
//! pooling, retry, and capability-probing logic around it follows teacher
//! idioms (`ProviderChain`'s circuit-breaker discipline).

use std::{sync::Arc, time::Duration};

use helix_common::{Error, Result};
use helix_hostkeys::HostKeyStore;
use russh::{client, keys::PublicKey};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::types::{WorkerAuth, WorkerConnection};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Ciphers/MACs restricted to modern algorithms per spec §4.C.
fn client_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: Some(DIAL_TIMEOUT),
        preferred: russh::Preferred {
            cipher: std::borrow::Cow::Borrowed(&[
                russh::cipher::AES_256_CTR,
                russh::cipher::AES_192_CTR,
                russh::cipher::AES_128_CTR,
            ]),
            mac: std::borrow::Cow::Borrowed(&[
                russh::mac::HMAC_SHA256_ETM,
                russh::mac::HMAC_SHA256,
            ]),
            ..Default::default()
        },
        ..Default::default()
    })
}

/// `russh::client::Handler` that delegates host-key verification to
/// [`helix_hostkeys::HostKeyStore`] (§4.A).
struct HostKeyHandler {
    store: Arc<HostKeyStore>,
    host: String,
}

#[async_trait::async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        let key_type = server_public_key.algorithm().to_string();
        let key_b64 = server_public_key.to_openssh().unwrap_or_default();
        match self.store.verify(&self.host, &key_type, &key_b64) {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(host = %self.host, error = %e, "host key verification failed");
                Ok(false)
            },
        }
    }
}

/// A live SSH session to one worker, wrapping a `russh` client handle and
/// the channel used to run commands.
pub struct SshSession {
    handle: client::Handle<HostKeyHandler>,
}

impl SshSession {
    /// Dial `conn`, authenticate, and verify the host key via `host_keys`.
    /// 30s timeout per spec §4.C.
    pub async fn connect(conn: &WorkerConnection, host_keys: Arc<HostKeyStore>) -> Result<Self> {
        if conn.host.is_empty() || conn.user.is_empty() {
            return Err(Error::invalid_argument("worker host and user must be non-empty"));
        }
        if conn.port == 0 {
            return Err(Error::invalid_argument("worker port must be 1..=65535"));
        }

        let handler = HostKeyHandler {
            store: host_keys,
            host: conn.host.clone(),
        };

        let addr = (conn.host.as_str(), conn.port);
        let handle = tokio::time::timeout(DIAL_TIMEOUT, client::connect(client_config(), addr, handler))
            .await
            .map_err(|_| Error::Timeout(format!("dialing worker {}", conn.host)))?
            .map_err(|e| Error::Unavailable(format!("ssh dial to {} failed: {e}", conn.host)))?;

        let mut session = Self { handle };
        session.authenticate(conn).await?;
        Ok(session)
    }

    async fn authenticate(&mut self, conn: &WorkerConnection) -> Result<()> {
        let authenticated = match &conn.auth {
            WorkerAuth::PrivateKey(key_pem) => {
                let key_pair = russh::keys::decode_secret_key(key_pem.expose_secret(), None)
                    .map_err(|e| Error::Unauthorized(format!("invalid private key: {e}")))?;
                self.handle
                    .authenticate_publickey(&conn.user, Arc::new(key_pair))
                    .await
            },
            WorkerAuth::KeyPath(path) => {
                let key_pair = russh::keys::load_secret_key(path, None)
                    .map_err(|e| Error::Unauthorized(format!("loading key {}: {e}", path.display())))?;
                self.handle
                    .authenticate_publickey(&conn.user, Arc::new(key_pair))
                    .await
            },
            WorkerAuth::Password(password) => {
                self.handle
                    .authenticate_password(&conn.user, password.expose_secret())
                    .await
            },
        }
        .map_err(|e| Error::Unauthorized(format!("ssh authentication to {}: {e}", conn.host)))?;

        if !authenticated {
            return Err(Error::Unauthorized(format!("ssh authentication rejected for {}", conn.host)));
        }
        Ok(())
    }

    /// Run `command` over a fresh channel, collecting stdout/stderr/exit code.
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<(String, String, i32)> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Unavailable(format!("opening ssh channel: {e}")))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::ExecutionFailed {
                message: format!("exec failed: {e}"),
                stdout: String::new(),
                stderr: String::new(),
            })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = -1;

        let collect = async {
            loop {
                match channel.wait().await {
                    Some(russh::ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(russh::ChannelMsg::ExtendedData { data, .. }) => stderr.extend_from_slice(&data),
                    Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = i32::try_from(exit_status).unwrap_or(-1);
                    },
                    Some(russh::ChannelMsg::Eof) | Some(russh::ChannelMsg::Close) | None => break,
                    Some(_) => {},
                }
            }
        };

        tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| Error::Timeout(format!("command timed out after {timeout:?}")))?;

        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        ))
    }

    /// SSH keepalive probe used to detect a dead connection before reuse.
    pub async fn is_alive(&self) -> bool {
        self.handle
            .send_keepalive(true)
            .await
            .is_ok()
    }
}

/// Run a small set of shell commands over `session` and fold presence/output
/// into the declared capability and resource sets (spec §4.C step: `nproc`,
/// `free -b`, `lspci`, `which python3 docker nvcc`).
pub async fn detect_capabilities(session: &SshSession) -> (std::collections::HashSet<String>, helix_common::WorkerResources) {
    let mut capabilities = std::collections::HashSet::new();
    let mut resources = helix_common::WorkerResources::default();

    if let Ok((out, _, 0)) = session.exec("nproc", Duration::from_secs(10)).await {
        resources.cpu_count = out.trim().parse().unwrap_or(0);
    }
    if let Ok((out, _, 0)) = session
        .exec("free -b | awk 'NR==2{print $2}'", Duration::from_secs(10))
        .await
    {
        resources.total_memory_bytes = out.trim().parse().unwrap_or(0);
    }
    if let Ok((out, _, 0)) = session
        .exec("lspci | grep -c -i nvidia", Duration::from_secs(10))
        .await
    {
        let gpu_count: u32 = out.trim().parse().unwrap_or(0);
        if gpu_count > 0 {
            resources.gpu_count = gpu_count;
            capabilities.insert("cuda-computation".to_string());
        }
    }
    for bin in ["python3", "docker", "nvcc"] {
        if let Ok((out, _, code)) = session
            .exec(&format!("which {bin}"), Duration::from_secs(10))
            .await
        {
            if code == 0 && !out.trim().is_empty() {
                capabilities.insert(bin.to_string());
            }
        }
    }
    debug!(?capabilities, ?resources, "worker capabilities detected");
    (capabilities, resources)
}
