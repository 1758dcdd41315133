pub mod audit;
pub mod catalog;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod responder;
pub mod session;

use std::sync::Arc;

use anyhow::Context;
use dimse::DimseScp;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::audit::AuditLogger;
use crate::catalog::RecordStore;
use crate::config::Config;
use crate::dashboard::DashboardState;
use crate::responder::HoneypotResponder;
use crate::session::SessionRegistry;

/// Run the honeypot until the DICOM listener stops or ctrl-c is received
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    tracing::info!("🔧 Starting DICOMHAWK '{}'", config.honeypot.id);

    let audit = Arc::new(
        AuditLogger::open_files(&config.logging).context("Failed to open honeypot log files")?,
    );
    let store = Arc::new(RecordStore::load_or_generate(&config.catalog, &audit));
    let registry = Arc::new(SessionRegistry::new());
    let shutdown = CancellationToken::new();

    let dashboard = if config.dashboard.enabled {
        let state = DashboardState::new(Arc::clone(&registry), Arc::clone(&store), &config.logging);
        Some(
            dashboard::start(&config.dashboard, state, shutdown.clone())
                .await
                .context("Failed to start dashboard")?,
        )
    } else {
        None
    };

    let responder = Arc::new(HoneypotResponder::new(store, registry, audit));
    let scp = DimseScp::new(config.dimse.clone(), responder);
    let mut scp_task = tokio::spawn(scp.run(shutdown.clone()));

    let outcome = tokio::select! {
        result = &mut scp_task => result.context("DICOM listener panicked")?
            .context("DICOM listener failed"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            shutdown.cancel();
            scp_task
                .await
                .context("DICOM listener panicked")?
                .context("DICOM listener failed")
        }
    };

    shutdown.cancel();
    if let Some(handle) = dashboard {
        if let Err(e) = handle.await {
            tracing::warn!("Dashboard task ended abnormally: {}", e);
        }
    }

    tracing::info!("DICOMHAWK stopped");
    outcome
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.honeypot.log_level));
    let stdout = config.logging.log_to_stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
    });

    // a subscriber may already be installed, e.g. by tests
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .try_init();
}
