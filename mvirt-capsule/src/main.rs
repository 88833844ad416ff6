use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mvirt_capsule::rest::{AppState, create_router};
use mvirt_capsule::store::Event;
use mvirt_capsule::{
    CapsuleAuditLogger, DataStore, LocalCompute, LocalComputeConfig, MemoryStore, Orchestrator,
    OrchestratorConfig, RandomNameGenerator, create_audit_logger,
};

#[derive(Parser)]
#[command(name = "mvirt-capsule")]
#[command(about = "mvirt capsule controller - multi-container lifecycle over a compute backend")]
struct Args {
    /// Listen address for REST API (client)
    #[arg(short, long, default_value = "[::]:8080")]
    listen: String,

    /// Run in development mode (no audit trail)
    #[arg(long)]
    dev: bool,

    /// Image known to the local compute backend (can be repeated)
    #[arg(long = "image", default_values_t = LocalComputeConfig::default().images)]
    images: Vec<String>,

    /// Delay before realized containers report Running, in milliseconds
    #[arg(long, default_value_t = 500)]
    start_delay_ms: u64,

    /// Largest page a list request may return
    #[arg(long, default_value_t = 1000)]
    max_limit: usize,

    /// Restart policy for capsules that name none (always, unless-stopped, on-failure, no)
    #[arg(long, default_value = "always")]
    default_restart_policy: String,

    /// Destroy the records of a failed create instead of leaving them for inspection
    #[arg(long)]
    rollback_on_failure: bool,
}

/// Log store changes until the channel closes.
fn spawn_event_logger(mut events: broadcast::Receiver<Event>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(
                    resource = event.resource_type(),
                    id = %event.resource_id(),
                    "Store event"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, skipped {} events", skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("mvirt_capsule=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.max_limit == 0 {
        return Err("--max-limit must be at least 1".into());
    }

    info!(
        "Starting mvirt-capsule - REST: {}, images: {}",
        args.listen,
        args.images.join(", ")
    );

    let audit = if args.dev {
        Arc::new(CapsuleAuditLogger::new_noop())
    } else {
        create_audit_logger()
    };

    let store = Arc::new(MemoryStore::default());
    spawn_event_logger(store.subscribe());

    let compute = Arc::new(LocalCompute::new(LocalComputeConfig {
        images: args.images,
        start_delay: Duration::from_millis(args.start_delay_ms),
    }));

    let config = OrchestratorConfig {
        default_restart_policy: Some(args.default_restart_policy).filter(|p| !p.is_empty()),
        max_limit: args.max_limit,
        rollback_on_failure: args.rollback_on_failure,
    };
    if config.rollback_on_failure {
        info!("Failed creates will be rolled back");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        compute,
        Arc::new(RandomNameGenerator),
        audit,
        config,
    ));

    let router = create_router(Arc::new(AppState { orchestrator }));

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("REST API listening on {}", args.listen);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = ctrl_c.await;
            info!("Received SIGINT");
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}
