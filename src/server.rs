use anyhow::{Context, Result};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::graphql::{self, CadenceSchema};
use crate::api::rest::{self, AppState};
use crate::config::{DaemonConfig, PolicyConfig};
use crate::domain::fleet::FleetService;
use crate::domain::fleet_store::FleetStore;
use crate::domain::governor::Governor;
use crate::domain::policy::DefaultPolicy;

pub async fn run(config: DaemonConfig, policy: PolicyConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();

    let max_cluster_active = policy.max_cluster_active()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_cluster_active = max_cluster_active.get(),
        "Cadence daemon starting"
    );

    let store = config
        .state_file
        .as_ref()
        .map(|path| FleetStore::new(PathBuf::from(path)));
    let fleet = Arc::new(FleetService::new(store));
    fleet.load_from_disk().await;

    let governor = Arc::new(Governor::new(
        fleet,
        DefaultPolicy::new(max_cluster_active),
    ));

    let app_state = AppState {
        governor: governor.clone(),
    };

    let schema = graphql::build_schema(governor.clone());

    let graphql_router = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .with_state(schema);

    let app = rest::router(app_state)
        .merge(graphql_router)
        .layer(TraceLayer::new_for_http());

    let http_addr = &config.http_addr;
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding to {}", http_addr))?;

    info!(addr = %http_addr, "HTTP server listening");

    // Spawn the reconciliation loop
    if config.reconcile_interval_secs > 0 {
        let reconcile_governor = governor.clone();
        let interval_secs = config.reconcile_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let result = reconcile_governor.reconcile().await;
                info!(
                    advanced = result.advanced,
                    deferred = result.deferred,
                    faulted = result.faulted,
                    idle = result.idle,
                    "reconciliation pass completed"
                );
            }
        });
    }

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Cadence daemon stopped");
    Ok(())
}

async fn graphql_playground() -> Html<String> {
    Html(
        async_graphql::http::playground_source(
            async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
        ),
    )
}

async fn graphql_handler(
    State(schema): State<CadenceSchema>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down"); },
        _ = terminate => { info!("Received SIGTERM, shutting down"); },
    }
}
