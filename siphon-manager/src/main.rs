use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use siphon_manager::core::Manager;
use siphon_manager::grpc::{proto, SessionManagerService};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9500";
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const SESSION_EXPIRY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    if let Err(error) = run().await {
        tracing::error!(%error, "session manager exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = std::env::var("SIPHON_MANAGER_BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()?;

    let manager = Arc::new(Manager::default());
    let cancellation_token = CancellationToken::new();

    let sweeper = manager.spawn_sweeper(SESSION_SWEEP_INTERVAL, SESSION_EXPIRY, cancellation_token.clone());

    let service = SessionManagerService::new(Arc::clone(&manager)).into_server();
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    tracing::info!(%addr, "session manager listening");

    let shutdown = {
        let cancellation_token = cancellation_token.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal, draining");
            cancellation_token.cancel();
        }
    };

    Server::builder()
        .add_service(service)
        .add_service(reflection)
        .serve_with_shutdown(addr, shutdown)
        .await?;

    sweeper.abort();
    Ok(())
}
