//! Configuration: process settings from the environment, plus the on-disk
//! JSON document holding virtualization credentials and guest defaults.
//!
//! The JSON document is re-read on every request that needs it; there is no
//! caching and the service never writes it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;

use crate::error::BridgeError;

/// How unknown SSH host keys are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Reject hosts absent from known_hosts (default).
    Strict,
    /// Trust-on-first-use: record unknown keys in known_hosts.
    AcceptNew,
}

/// Process-level settings, resolved once at startup from `VMBRIDGE_*`
/// environment variables and passed to handlers through the app state.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub config_path: PathBuf,
    /// Accept any TLS certificate from the control plane. Off by default;
    /// opt-in for self-signed management endpoints.
    pub insecure_tls: bool,
    pub host_key_policy: HostKeyPolicy,
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let bind = std::env::var("VMBRIDGE_BIND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)));

        let config_path = std::env::var("VMBRIDGE_CONFIG")
            .unwrap_or_else(|_| "config.json".to_string())
            .into();

        let insecure_tls = env_flag("VMBRIDGE_INSECURE_TLS");
        if insecure_tls {
            tracing::warn!("TLS certificate verification disabled for ESXi/vCenter (VMBRIDGE_INSECURE_TLS)");
        }

        let host_key_policy = match std::env::var("VMBRIDGE_SSH_HOST_KEY_POLICY").as_deref() {
            Ok("accept-new") => HostKeyPolicy::AcceptNew,
            _ => HostKeyPolicy::Strict,
        };

        Self { bind, config_path, insecure_tls, host_key_policy }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

/// Credentials for the virtualization control plane. All three keys must be
/// present in the document.
#[derive(Debug, Clone)]
pub struct VirtCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

/// Guest-OS defaults. Missing keys fall back instead of failing. The sudo
/// password is kept only because the file format carries it; privileged
/// commands run under a non-interactive sudo policy and never receive it.
#[derive(Debug, Clone)]
pub struct VmDefaults {
    pub username: String,
    pub sudo_password: String,
}

async fn read_document(path: &Path) -> Result<Value, BridgeError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|e| BridgeError::ConfigUnavailable(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| BridgeError::ConfigUnavailable(format!("{}: {}", path.display(), e)))
}

fn require_key(doc: &Value, key: &str) -> Result<String, BridgeError> {
    doc.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Unknown(format!("missing key '{key}' in configuration")))
}

pub async fn load_virtualization_credentials(path: &Path) -> Result<VirtCredentials, BridgeError> {
    let doc = read_document(path).await?;
    Ok(VirtCredentials {
        host: require_key(&doc, "esxi_host_ip")?,
        username: require_key(&doc, "esxi_username")?,
        password: require_key(&doc, "esxi_password")?,
    })
}

pub async fn load_vm_defaults(path: &Path) -> Result<VmDefaults, BridgeError> {
    let doc = read_document(path).await?;
    Ok(VmDefaults {
        username: doc
            .get("default_vm_username")
            .and_then(Value::as_str)
            .unwrap_or("root")
            .to_string(),
        sudo_password: doc
            .get("default_vm_sudo_password")
            .and_then(Value::as_str)
            .unwrap_or("changeme")
            .to_string(),
    })
}
