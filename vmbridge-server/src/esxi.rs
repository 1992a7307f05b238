//! Virtualization directory client for ESXi/vCenter
//!
//! Talks to the vCenter Automation REST API:
//! - session per request (create, use, delete; never pooled)
//! - full inventory snapshot in one linear pass, guest details best-effort
//! - TLS verification on by default; trust-everything is an explicit opt-in
//!
//! The derived operations (`find_linux_vm`, `filter_powered_on`) are pure
//! functions over an inventory snapshot.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::VirtCredentials;
use crate::error::BridgeError;
use crate::models::{PowerState, VmRecord};

const SESSION_HEADER: &str = "vmware-api-session-id";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of VM inventory snapshots.
#[async_trait]
pub trait VmDirectory: Send + Sync {
    /// Fetches a fresh snapshot of the full VM inventory. No caching: two
    /// nearly-simultaneous calls may observe different inventories.
    async fn fetch_inventory(&self, creds: &VirtCredentials) -> Result<Vec<VmRecord>, BridgeError>;
}

/// VM summary as returned by `GET /api/vcenter/vm`.
#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    name: String,
    power_state: PowerState,
}

/// Guest identity as returned by `GET /api/vcenter/vm/{vm}/guest/identity`.
/// Unavailable while the guest agent is not reporting.
#[derive(Debug, Deserialize)]
struct GuestIdentity {
    #[serde(default)]
    full_name: Option<LocalizableMessage>,
    #[serde(default)]
    ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalizableMessage {
    default_message: String,
}

pub struct VsphereDirectory {
    insecure_tls: bool,
}

impl VsphereDirectory {
    pub fn new(insecure_tls: bool) -> Self {
        Self { insecure_tls }
    }

    fn http_client(&self) -> Result<reqwest::Client, BridgeError> {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(self.insecure_tls)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Directory(e.to_string()))
    }

    async fn connect(
        &self,
        client: &reqwest::Client,
        creds: &VirtCredentials,
    ) -> Result<String, BridgeError> {
        let url = format!("https://{}/api/session", creds.host);
        let response = client
            .post(&url)
            .basic_auth(&creds.username, Some(&creds.password))
            .send()
            .await
            .map_err(|e| BridgeError::Directory(format!("failed to reach {}: {}", creds.host, e)))?;

        match response.status() {
            s if s.is_success() => response
                .json::<String>()
                .await
                .map_err(|e| BridgeError::Directory(format!("invalid session response: {e}"))),
            s if s == reqwest::StatusCode::UNAUTHORIZED || s == reqwest::StatusCode::FORBIDDEN => {
                Err(BridgeError::PermissionDenied(
                    "Check credentials and user roles.".to_string(),
                ))
            }
            s => Err(BridgeError::Directory(format!(
                "session creation against {} returned {}",
                creds.host, s
            ))),
        }
    }

    async fn disconnect(&self, client: &reqwest::Client, host: &str, token: &str) {
        let url = format!("https://{host}/api/session");
        if let Err(e) = client.delete(&url).header(SESSION_HEADER, token).send().await {
            debug!(host, "failed to close vCenter session: {e}");
        }
    }

    async fn list_all(
        &self,
        client: &reqwest::Client,
        host: &str,
        token: &str,
    ) -> Result<Vec<VmRecord>, BridgeError> {
        let url = format!("https://{host}/api/vcenter/vm");
        let response = client
            .get(&url)
            .header(SESSION_HEADER, token)
            .send()
            .await
            .map_err(|e| BridgeError::Directory(format!("inventory request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BridgeError::Directory(format!(
                "inventory request against {} returned {}",
                host,
                response.status()
            )));
        }

        let summaries: Vec<VmSummary> = response
            .json()
            .await
            .map_err(|e| BridgeError::Directory(format!("invalid inventory response: {e}")))?;

        info!(host, count = summaries.len(), "retrieved VM inventory");

        let mut records = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let guest = self.guest_identity(client, host, token, &summary.vm).await;
            records.push(VmRecord {
                name: summary.name,
                ip_address: guest.as_ref().and_then(|g| g.ip_address.clone()),
                guest_os: guest.and_then(|g| g.full_name.map(|m| m.default_message)),
                power_state: summary.power_state,
            });
        }
        Ok(records)
    }

    /// Guest details are best-effort: the endpoint answers 503 while the
    /// guest agent is down, which simply leaves IP and OS absent.
    async fn guest_identity(
        &self,
        client: &reqwest::Client,
        host: &str,
        token: &str,
        vm: &str,
    ) -> Option<GuestIdentity> {
        let url = format!("https://{host}/api/vcenter/vm/{vm}/guest/identity");
        let response = match client.get(&url).header(SESSION_HEADER, token).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(vm, "guest identity request failed: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(vm, status = %response.status(), "no guest identity reported");
            return None;
        }
        response.json().await.ok()
    }
}

#[async_trait]
impl VmDirectory for VsphereDirectory {
    async fn fetch_inventory(&self, creds: &VirtCredentials) -> Result<Vec<VmRecord>, BridgeError> {
        let client = self.http_client()?;
        let token = self.connect(&client, creds).await?;
        // session is torn down whatever the inventory fetch returns
        let result = self.list_all(&client, &creds.host, &token).await;
        self.disconnect(&client, &creds.host, &token).await;
        result
    }
}

/// First record whose name matches exactly (case-sensitive), provided it is
/// a Linux guest with a reported IP.
pub fn find_linux_vm(inventory: &[VmRecord], name: &str) -> Result<VmRecord, BridgeError> {
    let Some(record) = inventory.iter().find(|vm| vm.name == name) else {
        return Err(BridgeError::NotFound(format!(
            "VM '{name}' not found on ESXi/vCenter."
        )));
    };

    let guest_os = record.guest_os.as_deref().unwrap_or("Unknown");
    if !guest_os.contains("Linux") && !guest_os.contains("Ubuntu") {
        return Err(BridgeError::NotLinux(format!(
            "VM '{name}' is not a Linux VM (detected OS: {guest_os})."
        )));
    }

    if record.ip_address.is_none() {
        return Err(BridgeError::NoIpReported(format!(
            "VM '{name}' found, but no IP address reported. Ensure the guest agent is installed and running."
        )));
    }

    Ok(record.clone())
}

/// Exactly the records whose power state is `poweredOn`; every other field
/// passes through verbatim.
pub fn filter_powered_on(inventory: Vec<VmRecord>) -> Vec<VmRecord> {
    inventory
        .into_iter()
        .filter(|vm| vm.power_state == PowerState::PoweredOn)
        .collect()
}
