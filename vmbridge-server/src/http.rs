// API REST VMBRIDGE - Serveur HTTP principal
//
// RÔLE :
// Ce module expose l'API REST du bridge : découverte de VMs sur ESXi/vCenter
// et gestion des mises à jour apt sur VMs Ubuntu via SSH.
//
// FONCTIONNEMENT :
// - Routes organisées : /, /status, /esxi/*, /vm/*
// - Handlers stateless : une opération distante par requête, séquentielle
// - Sérialisation JSON automatique des réponses
// - Mapping manuel des erreurs par type (401, 400, 403, 404, 500...)
//
// UTILITÉ :
// 🎯 Résolution d'IP guest par nom exact de VM
// 🎯 Inventaire des VMs sous tension
// 🎯 Vérification/application des upgrades apt à distance

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::{self, ServerSettings};
use crate::error::BridgeError;
use crate::esxi::{self, VmDirectory};
use crate::models::{
    LinuxVmResponse, PoweredOnVmsResponse, SshTarget, SshTargetRequest, VmNameQuery, VmView,
};
use crate::ssh::CommandRunner;
use crate::upgrade::{self, UpgradeReport};

/// État unique construit au démarrage et passé aux handlers ; aucun état
/// global, aucun état mutable partagé.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<ServerSettings>,
    pub directory: Arc<dyn VmDirectory>,
    pub runner: Arc<dyn CommandRunner>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/esxi/get_linux_vm_ip", post(get_linux_vm_ip))
        .route("/esxi/list_powered_on_vms", get(list_powered_on_vms))
        .route("/vm/check_upgrades", post(check_upgrades))
        .route("/vm/apply_upgrades", post(apply_upgrades))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

// GET /
async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "vmbridge: VM discovery on ESXi/vCenter and apt upgrades on Ubuntu guests over SSH."
    }))
}

// GET /status (liveness)
async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "running" }))
}

// POST /esxi/get_linux_vm_ip
async fn get_linux_vm_ip(
    State(app): State<AppState>,
    Json(query): Json<VmNameQuery>,
) -> Result<Json<LinuxVmResponse>, BridgeError> {
    info!(vm_name = %query.vm_name, "resolving guest IP on ESXi/vCenter");
    let creds = config::load_virtualization_credentials(&app.settings.config_path).await?;
    let inventory = app.directory.fetch_inventory(&creds).await?;
    let record = esxi::find_linux_vm(&inventory, &query.vm_name)?;
    // find_linux_vm guarantees a reported IP and a guest OS description
    Ok(Json(LinuxVmResponse {
        status: "success",
        vm_name: record.name,
        ip_address: record.ip_address.unwrap_or_default(),
        guest_os: record.guest_os.unwrap_or_default(),
        power_state: record.power_state,
    }))
}

// GET /esxi/list_powered_on_vms
async fn list_powered_on_vms(
    State(app): State<AppState>,
) -> Result<Json<PoweredOnVmsResponse>, BridgeError> {
    let creds = config::load_virtualization_credentials(&app.settings.config_path).await?;
    let inventory = app.directory.fetch_inventory(&creds).await?;
    let powered_on = esxi::filter_powered_on(inventory);
    info!(count = powered_on.len(), "listing powered-on VMs");
    Ok(Json(PoweredOnVmsResponse {
        status: "success",
        powered_on_vms: powered_on.into_iter().map(VmView::from).collect(),
    }))
}

// POST /vm/check_upgrades
async fn check_upgrades(
    State(app): State<AppState>,
    Json(req): Json<SshTargetRequest>,
) -> Result<Json<UpgradeReport>, BridgeError> {
    info!(host = %req.ip_address, "checking for apt upgrades");
    let output = execute_on_target(&app, &req, upgrade::CHECK_COMMAND).await?;
    Ok(Json(upgrade::classify_check(&output)))
}

// POST /vm/apply_upgrades
async fn apply_upgrades(
    State(app): State<AppState>,
    Json(req): Json<SshTargetRequest>,
) -> Result<Json<UpgradeReport>, BridgeError> {
    info!(host = %req.ip_address, "applying apt upgrades");
    let output = execute_on_target(&app, &req, upgrade::APPLY_COMMAND).await?;
    Ok(Json(upgrade::classify_apply(&output)))
}

async fn execute_on_target(
    app: &AppState,
    req: &SshTargetRequest,
    command: &str,
) -> Result<String, BridgeError> {
    let defaults = config::load_vm_defaults(&app.settings.config_path).await?;
    if !defaults.sudo_password.is_empty() {
        debug!("configured sudo password is ignored; privileged commands rely on non-interactive sudo");
    }
    let target = SshTarget::connect_as(req, &defaults);
    app.runner.run(&target, command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::{HostKeyPolicy, VirtCredentials};
    use crate::models::{PowerState, VmRecord};

    struct FakeDirectory {
        inventory: Vec<VmRecord>,
    }

    #[async_trait::async_trait]
    impl VmDirectory for FakeDirectory {
        async fn fetch_inventory(
            &self,
            _creds: &VirtCredentials,
        ) -> Result<Vec<VmRecord>, BridgeError> {
            Ok(self.inventory.clone())
        }
    }

    struct DeniedDirectory;

    #[async_trait::async_trait]
    impl VmDirectory for DeniedDirectory {
        async fn fetch_inventory(
            &self,
            _creds: &VirtCredentials,
        ) -> Result<Vec<VmRecord>, BridgeError> {
            Err(BridgeError::PermissionDenied(
                "Check credentials and user roles.".to_string(),
            ))
        }
    }

    struct FakeRunner {
        output: String,
        seen_target: Mutex<Option<SshTarget>>,
    }

    impl FakeRunner {
        fn new(output: &str) -> Self {
            Self { output: output.to_string(), seen_target: Mutex::new(None) }
        }
    }

    #[async_trait::async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, target: &SshTarget, _command: &str) -> Result<String, BridgeError> {
            *self.seen_target.lock().unwrap() = Some(target.clone());
            Ok(self.output.clone())
        }
    }

    fn test_config(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vmbridge-http-{}-{}.json",
            name,
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{"esxi_host_ip":"127.0.0.1","esxi_username":"dummy_user","esxi_password":"dummy_password",
                "default_vm_username":"testuser","default_vm_sudo_password":"testpassword"}"#,
        )
        .unwrap();
        path
    }

    fn settings(config_path: PathBuf) -> Arc<ServerSettings> {
        Arc::new(ServerSettings {
            bind: "127.0.0.1:0".parse().unwrap(),
            config_path,
            insecure_tls: false,
            host_key_policy: HostKeyPolicy::Strict,
        })
    }

    fn inventory() -> Vec<VmRecord> {
        vec![
            VmRecord {
                name: "MyTestLinuxVM".to_string(),
                ip_address: Some("192.168.1.10".to_string()),
                guest_os: Some("Ubuntu Linux (64-bit)".to_string()),
                power_state: PowerState::PoweredOn,
            },
            VmRecord {
                name: "WinBox".to_string(),
                ip_address: Some("192.168.1.20".to_string()),
                guest_os: Some("Microsoft Windows 11 (64-bit)".to_string()),
                power_state: PowerState::PoweredOn,
            },
            VmRecord {
                name: "Archive".to_string(),
                ip_address: None,
                guest_os: None,
                power_state: PowerState::PoweredOff,
            },
        ]
    }

    fn discovery_router(name: &str) -> Router {
        let state = AppState {
            settings: settings(test_config(name)),
            directory: Arc::new(FakeDirectory { inventory: inventory() }),
            runner: Arc::new(FakeRunner::new("")),
        };
        build_router(state)
    }

    async fn request_json(
        router: Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap();
        (status, value)
    }

    #[tokio::test]
    async fn test_root_and_status_endpoints() {
        let (status, body) =
            request_json(discovery_router("root"), Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("message").is_some());

        let (status, body) =
            request_json(discovery_router("status"), Method::GET, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "running" }));
    }

    #[tokio::test]
    async fn test_get_linux_vm_ip_success() {
        let (status, body) = request_json(
            discovery_router("find-ok"),
            Method::POST,
            "/esxi/get_linux_vm_ip",
            Some(json!({ "vm_name": "MyTestLinuxVM" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "status": "success",
                "vm_name": "MyTestLinuxVM",
                "ip_address": "192.168.1.10",
                "guest_os": "Ubuntu Linux (64-bit)",
                "powerState": "poweredOn"
            })
        );
    }

    #[tokio::test]
    async fn test_get_linux_vm_ip_unknown_name_is_404() {
        let (status, body) = request_json(
            discovery_router("find-missing"),
            Method::POST,
            "/esxi/get_linux_vm_ip",
            Some(json!({ "vm_name": "NoSuchVM" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_get_linux_vm_ip_non_linux_is_400() {
        let (status, body) = request_json(
            discovery_router("find-windows"),
            Method::POST,
            "/esxi/get_linux_vm_ip",
            Some(json!({ "vm_name": "WinBox" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("not a Linux VM"));
    }

    #[tokio::test]
    async fn test_list_powered_on_vms_filters_inventory() {
        let (status, body) = request_json(
            discovery_router("list"),
            Method::GET,
            "/esxi/list_powered_on_vms",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        let vms = body["powered_on_vms"].as_array().unwrap();
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0]["vm_name"], "MyTestLinuxVM");
        assert_eq!(vms[1]["vm_name"], "WinBox");
        assert!(vms.iter().all(|vm| vm["powerState"] == "poweredOn"));
    }

    #[tokio::test]
    async fn test_permission_denied_maps_to_403() {
        let state = AppState {
            settings: settings(test_config("denied")),
            directory: Arc::new(DeniedDirectory),
            runner: Arc::new(FakeRunner::new("")),
        };
        let (status, body) = request_json(
            build_router(state),
            Method::GET,
            "/esxi/list_powered_on_vms",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["detail"].as_str().unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_missing_config_maps_to_500() {
        let state = AppState {
            settings: settings(PathBuf::from("/nonexistent/vmbridge.json")),
            directory: Arc::new(FakeDirectory { inventory: inventory() }),
            runner: Arc::new(FakeRunner::new("")),
        };
        let (status, body) = request_json(
            build_router(state),
            Method::GET,
            "/esxi/list_powered_on_vms",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("configuration unavailable"));
    }

    #[tokio::test]
    async fn test_check_upgrades_up_to_date() {
        let runner = Arc::new(FakeRunner::new(
            "Hit:1 http://archive.ubuntu.com/ubuntu jammy InRelease\nReading package lists... Done\nAll packages are up to date.\n0 packages can be upgraded.",
        ));
        let state = AppState {
            settings: settings(test_config("check")),
            directory: Arc::new(FakeDirectory { inventory: vec![] }),
            runner: runner.clone(),
        };
        let (status, body) = request_json(
            build_router(state),
            Method::POST,
            "/vm/check_upgrades",
            Some(json!({ "ip_address": "192.168.1.100", "username": "ubuntu" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no_upgrades");
        assert_eq!(body["package_manager"], "apt");

        // the configured connect-as identity wins over the caller-supplied one
        let seen = runner.seen_target.lock().unwrap().clone().unwrap();
        assert_eq!(seen.username, "testuser");
        assert_eq!(seen.host, "192.168.1.100");
        assert_eq!(seen.key_path, "~/.ssh/openwebui_vm_key");
    }

    #[tokio::test]
    async fn test_apply_upgrades_reports_success_with_raw_details() {
        let output = "Setting up bash (5.1-6ubuntu1.1) ...\nProcessing triggers for man-db ...";
        let state = AppState {
            settings: settings(test_config("apply")),
            directory: Arc::new(FakeDirectory { inventory: vec![] }),
            runner: Arc::new(FakeRunner::new(output)),
        };
        let (status, body) = request_json(
            build_router(state),
            Method::POST,
            "/vm/apply_upgrades",
            Some(json!({ "ip_address": "192.168.1.100", "username": "ubuntu" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["details"], output);
    }
}
