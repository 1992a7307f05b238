//! Remote command execution over SSH
//!
//! One authenticated session per invocation:
//! - public-key auth, with `~/` expansion on the key path
//! - host key policy: strict (default) or trust-on-first-use
//! - exactly one command, stdout/stderr read to completion, session dropped
//!
//! libssh2 is blocking, so the whole exchange runs in a blocking task; the
//! handler awaits it like any other remote call.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{CheckResult, HostKeyType, KnownHostFileKind, KnownHostKeyFormat, Session};
use tracing::{info, warn};

use crate::config::HostKeyPolicy;
use crate::error::BridgeError;
use crate::models::SshTarget;

const SSH_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on any blocking SSH operation, remote command included.
const SESSION_TIMEOUT_MS: u32 = 300_000;

/// Executes one command on a remote host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` on `target` and returns its trimmed stdout.
    async fn run(&self, target: &SshTarget, command: &str) -> Result<String, BridgeError>;
}

pub struct SshExecutor {
    host_key_policy: HostKeyPolicy,
}

impl SshExecutor {
    pub fn new(host_key_policy: HostKeyPolicy) -> Self {
        Self { host_key_policy }
    }
}

#[async_trait]
impl CommandRunner for SshExecutor {
    async fn run(&self, target: &SshTarget, command: &str) -> Result<String, BridgeError> {
        info!(host = %target.host, user = %target.username, command, "executing SSH command");
        let target = target.clone();
        let command = command.to_string();
        let policy = self.host_key_policy;
        tokio::task::spawn_blocking(move || run_blocking(&target, &command, policy))
            .await
            .map_err(|e| BridgeError::Unknown(format!("SSH task failed: {e}")))?
    }
}

fn run_blocking(
    target: &SshTarget,
    command: &str,
    policy: HostKeyPolicy,
) -> Result<String, BridgeError> {
    let key_path = resolve_key_path(&target.key_path);
    if !key_path.exists() {
        return Err(BridgeError::KeyNotFound(key_path.display().to_string()));
    }

    let addr = (target.host.as_str(), SSH_PORT)
        .to_socket_addrs()
        .map_err(|e| BridgeError::Transport(format!("cannot resolve {}: {}", target.host, e)))?
        .next()
        .ok_or_else(|| BridgeError::Transport(format!("cannot resolve {}", target.host)))?;
    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| BridgeError::Transport(format!("cannot connect to {}: {}", target.host, e)))?;

    let mut session = Session::new().map_err(|e| BridgeError::Transport(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(SESSION_TIMEOUT_MS);
    session
        .handshake()
        .map_err(|e| BridgeError::Transport(format!("handshake with {} failed: {}", target.host, e)))?;

    verify_host_key(&session, &target.host, policy)?;

    session
        .userauth_pubkey_file(&target.username, None, &key_path, None)
        .map_err(|e| {
            BridgeError::AuthenticationFailed(format!(
                "{}@{}: {}. Check the SSH key.",
                target.username, target.host, e
            ))
        })?;

    let mut channel = session
        .channel_session()
        .map_err(|e| BridgeError::Transport(e.to_string()))?;
    channel
        .exec(command)
        .map_err(|e| BridgeError::Transport(format!("exec failed: {e}")))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| BridgeError::Transport(format!("reading stdout failed: {e}")))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| BridgeError::Transport(format!("reading stderr failed: {e}")))?;
    channel
        .wait_close()
        .map_err(|e| BridgeError::Transport(format!("closing channel failed: {e}")))?;

    if !stderr.trim().is_empty() {
        warn!(host = %target.host, "SSH command produced stderr: {}", stderr.trim());
    }

    Ok(stdout.trim().to_string())
}

/// Expands a leading `~/` against the home directory.
fn resolve_key_path(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

fn known_hosts_file() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("known_hosts"))
        .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"))
}

fn verify_host_key(session: &Session, host: &str, policy: HostKeyPolicy) -> Result<(), BridgeError> {
    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| BridgeError::Transport(format!("no host key received from {host}")))?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| BridgeError::Transport(e.to_string()))?;
    let file = known_hosts_file();
    if file.exists() {
        known_hosts
            .read_file(&file, KnownHostFileKind::OpenSSH)
            .map_err(|e| BridgeError::Transport(format!("cannot read known_hosts: {e}")))?;
    }

    match known_hosts.check_port(host, SSH_PORT, key) {
        CheckResult::Match => Ok(()),
        // a changed key is never acceptable, whatever the policy
        CheckResult::Mismatch => Err(BridgeError::Transport(format!(
            "host key mismatch for {host}; refusing to connect"
        ))),
        CheckResult::NotFound | CheckResult::Failure => match policy {
            HostKeyPolicy::AcceptNew => {
                info!(host, "recording new host key (accept-new policy)");
                known_hosts
                    .add(host, key, "added by vmbridge-server", known_host_format(key_type))
                    .map_err(|e| BridgeError::Transport(e.to_string()))?;
                known_hosts
                    .write_file(&file, KnownHostFileKind::OpenSSH)
                    .map_err(|e| BridgeError::Transport(format!("cannot update known_hosts: {e}")))?;
                Ok(())
            }
            HostKeyPolicy::Strict => Err(BridgeError::Transport(format!(
                "unknown host key for {host}; add it to known_hosts or set VMBRIDGE_SSH_HOST_KEY_POLICY=accept-new"
            ))),
        },
    }
}

fn known_host_format(key_type: HostKeyType) -> KnownHostKeyFormat {
    match key_type {
        HostKeyType::Rsa => KnownHostKeyFormat::SshRsa,
        HostKeyType::Dss => KnownHostKeyFormat::SshDss,
        HostKeyType::Ecdsa256 => KnownHostKeyFormat::Ecdsa256,
        HostKeyType::Ecdsa384 => KnownHostKeyFormat::Ecdsa384,
        HostKeyType::Ecdsa521 => KnownHostKeyFormat::Ecdsa521,
        HostKeyType::Ed25519 => KnownHostKeyFormat::Ed25519,
        HostKeyType::Unknown => KnownHostKeyFormat::Unknown,
    }
}
