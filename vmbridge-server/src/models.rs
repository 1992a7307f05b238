use serde::{Deserialize, Serialize};

use crate::config::VmDefaults;

/// Power state as reported by the virtualization control plane.
///
/// The wire format of the Automation API is SCREAMING_SNAKE; callers of this
/// service see the classic camelCase values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    #[serde(rename(serialize = "poweredOn", deserialize = "POWERED_ON"))]
    PoweredOn,
    #[serde(rename(serialize = "poweredOff", deserialize = "POWERED_OFF"))]
    PoweredOff,
    #[serde(rename(serialize = "suspended", deserialize = "SUSPENDED"))]
    Suspended,
    #[serde(other, rename(serialize = "unknown"))]
    Unknown,
}

/// One VM as surfaced to callers. Rebuilt live from the inventory on every
/// request; IP and guest OS are absent when the guest agent is not reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct VmRecord {
    pub name: String,
    pub ip_address: Option<String>,
    pub guest_os: Option<String>,
    pub power_state: PowerState,
}

// --- Request bodies ---

#[derive(Debug, Deserialize)]
pub struct VmNameQuery {
    pub vm_name: String,
}

/// Target of an upgrade operation. The username is advisory: upgrade
/// operations always connect as the configured `default_vm_username`
/// (connect-as policy), and the replacement is logged when it differs.
#[derive(Debug, Deserialize)]
pub struct SshTargetRequest {
    pub ip_address: String,
    pub username: String,
    #[serde(default = "default_key_path")]
    pub ssh_key_path: String,
}

fn default_key_path() -> String {
    "~/.ssh/openwebui_vm_key".to_string()
}

/// Resolved SSH target for one request.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub username: String,
    pub key_path: String,
}

impl SshTarget {
    /// Applies the connect-as policy: the configured default identity wins
    /// over the caller-supplied username.
    pub fn connect_as(req: &SshTargetRequest, defaults: &VmDefaults) -> Self {
        if req.username != defaults.username {
            tracing::info!(
                requested = %req.username,
                effective = %defaults.username,
                "caller-supplied username overridden by configured connect-as identity"
            );
        }
        Self {
            host: req.ip_address.clone(),
            username: defaults.username.clone(),
            key_path: req.ssh_key_path.clone(),
        }
    }
}

// --- Response bodies ---

#[derive(Debug, Serialize)]
pub struct LinuxVmResponse {
    pub status: &'static str,
    pub vm_name: String,
    pub ip_address: String,
    pub guest_os: String,
    #[serde(rename = "powerState")]
    pub power_state: PowerState,
}

#[derive(Debug, Serialize)]
pub struct VmView {
    pub vm_name: String,
    pub ip_address: Option<String>,
    pub guest_os: Option<String>,
    #[serde(rename = "powerState")]
    pub power_state: PowerState,
}

impl From<VmRecord> for VmView {
    fn from(record: VmRecord) -> Self {
        Self {
            vm_name: record.name,
            ip_address: record.ip_address,
            guest_os: record.guest_os,
            power_state: record.power_state,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PoweredOnVmsResponse {
    pub status: &'static str,
    pub powered_on_vms: Vec<VmView>,
}
