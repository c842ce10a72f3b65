//! Builds the shell fragments used to provision, wrap commands for, and
//! tear down a sandbox. These are pure string builders; actually running
//! them against a worker is the caller's job via [`crate::remote::RemoteExec`].

use std::borrow::Cow;

use uuid::Uuid;

use crate::types::{ResourceCaps, SandboxId};

/// Generate a fresh sandbox id and the `helix-<first-8-hex>` username
/// derived from it (§4.B step 1).
#[must_use]
pub fn new_sandbox_id() -> (SandboxId, String) {
    let id = Uuid::new_v4();
    let hex = id.simple().to_string();
    let username = format!("helix-{}", &hex[..8]);
    (SandboxId(id.to_string()), username)
}

/// Directory for a sandbox, under the OS temp root.
#[must_use]
pub fn directory_for(username: &str) -> String {
    format!("/tmp/helix-sandboxes/{username}")
}

/// `mkdir -p <dir>` with mode 0750. Critical: failure aborts sandbox creation.
#[must_use]
pub fn mkdir_script(directory: &str) -> String {
    format!("mkdir -p {d} && chmod 0750 {d}", d = sh_quote(directory))
}

/// Provision the OS user: home = sandbox dir, minimal shell, then chown
/// the directory to the new user.
#[must_use]
pub fn useradd_script(username: &str, directory: &str) -> String {
    format!(
        "useradd --system --home-dir {dir} --shell /usr/sbin/nologin --no-create-home {user} \
         && chown {user}:{user} {dir}",
        dir = sh_quote(directory),
        user = sh_quote(username),
    )
}

/// Per-user limits file (memlock, nproc, nofile) plus a best-effort cgroup.
/// Every step here is non-fatal on failure per §4.B.
#[must_use]
pub fn limits_script(username: &str, caps: ResourceCaps) -> String {
    let limits_path = format!("/etc/security/limits.d/{username}.conf");
    let limits_body = format!(
        "{user} hard memlock {mem_kb}\n{user} hard nproc {nproc}\n{user} hard nofile 4096\n",
        user = username,
        mem_kb = caps.max_memory_bytes / 1024,
        nproc = caps.max_processes,
    );
    format!(
        "printf '%s' {body} | sudo tee {path} >/dev/null 2>&1 || true; \
         sudo systemd-run --quiet --unit=helix-{user}-cg --slice=helix.slice \
           --property=MemoryMax={mem} --property=CPUQuota={cpu}% --property=TasksMax={procs} \
           --scope true >/dev/null 2>&1 || true",
        body = sh_quote(&limits_body),
        path = sh_quote(&limits_path),
        user = username,
        mem = caps.max_memory_bytes,
        cpu = caps.max_cpu.max(1) * 100,
        procs = caps.max_processes,
    )
}

/// Remove directory, delete user, remove limits file, remove cgroup unit.
/// Every step is best-effort; errors are logged, not propagated.
#[must_use]
pub fn cleanup_script(username: &str, directory: &str) -> String {
    format!(
        "sudo rm -rf {dir} 2>&1 || true; \
         sudo userdel -r {user} >/dev/null 2>&1 || true; \
         sudo rm -f /etc/security/limits.d/{user}.conf 2>&1 || true; \
         sudo systemctl --quiet stop helix-{user}-cg.scope >/dev/null 2>&1 || true",
        dir = sh_quote(directory),
        user = username,
    )
}

/// Wrap `command` to run as the sandbox's dedicated user with the
/// configured resource limits, per §4.B:
/// exports `HELIX_SANDBOX_*`, `mkdir -p $TMPDIR`, then
/// `sudo -u <user> bash -c '<escaped cmd>'` with `set -eu`,
/// `ulimit -t 300`, `ulimit -f 100`. Single-quote escaping is mandatory.
///
/// `file_size_limit_blocks` is passed straight through as `ulimit -f`'s
/// argument (512-byte blocks, matching the shell builtin's own unit) —
/// it is not a megabyte figure, so no unit conversion happens here.
#[must_use]
pub fn wrap_command(
    id: &SandboxId,
    username: &str,
    directory: &str,
    command: &str,
    command_timeout_secs: u64,
    file_size_limit_blocks: u64,
) -> String {
    let inner = format!("set -eu; ulimit -t {command_timeout_secs}; ulimit -f {file_size_limit_blocks}; {command}");
    format!(
        "export HELIX_SANDBOX_ID={id} HELIX_SANDBOX_USER={user} HELIX_SANDBOX_DIR={dir}; \
         mkdir -p \"$TMPDIR\"; sudo -u {user} bash -c {escaped}",
        id = sh_quote(&id.0),
        user = sh_quote(username),
        dir = sh_quote(directory),
        escaped = sh_quote(&inner),
    )
}

/// Single-quote a shell argument the way §4.B mandates: `'` becomes
/// `'"'"'`.
#[must_use]
fn sh_quote(value: &str) -> Cow<'_, str> {
    shell_escape::escape(Cow::Borrowed(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sandbox_id_derives_eight_char_username() {
        let (_id, username) = new_sandbox_id();
        assert!(username.starts_with("helix-"));
        assert_eq!(username.len(), "helix-".len() + 8);
    }

    #[test]
    fn wrap_command_single_quotes_embedded_quotes() {
        let (id, _) = new_sandbox_id();
        let wrapped = wrap_command(&id, "helix-abcd1234", "/tmp/x", "echo 'hi'", 300, 100);
        assert!(wrapped.contains("sudo -u"));
        assert!(wrapped.contains(r#"'"'"'"#));
    }

    #[test]
    fn mkdir_script_sets_expected_mode() {
        let script = mkdir_script("/tmp/helix-sandboxes/helix-abcd1234");
        assert!(script.contains("chmod 0750"));
    }
}
