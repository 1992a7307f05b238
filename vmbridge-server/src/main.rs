/**
 * VMBRIDGE SERVER - Point d'entrée principal
 *
 * RÔLE : Bootstrap du serveur : env, logging, settings, clients distants,
 * routeur HTTP. Aucun état global : tout est construit ici une fois puis
 * passé aux handlers via AppState.
 *
 * ARCHITECTURE : API REST (axum) + client vCenter Automation (reqwest) +
 * exécuteur SSH (ssh2). Une requête = une session distante, séquentielle.
 */

mod config;
mod error;
mod esxi;
mod http;
mod models;
mod ssh;
mod upgrade;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerSettings;
use crate::esxi::{VmDirectory, VsphereDirectory};
use crate::http::AppState;
use crate::ssh::{CommandRunner, SshExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vmbridge_server=info,tower_http=info")),
        )
        .init();

    let settings = Arc::new(ServerSettings::from_env());
    let directory: Arc<dyn VmDirectory> = Arc::new(VsphereDirectory::new(settings.insecure_tls));
    let runner: Arc<dyn CommandRunner> = Arc::new(SshExecutor::new(settings.host_key_policy));

    let app_state = AppState {
        settings: settings.clone(),
        directory,
        runner,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("cannot bind {}", settings.bind))?;
    info!("listening on http://{}", settings.bind);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
