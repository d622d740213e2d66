//! gridagentd — agent daemon serving one task's worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use gridagent_core::config::GridConfig;
use gridagent_core::CommunicationToken;
use gridagent_services::{
    Agent, FsResourceStore, MemoryResourceStore, MemorySubmitter, ResourceStore,
};

mod transport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = GridConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GridConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GridConfig::default()
    });

    // Token
    let token = if config.agent.communication_token.is_empty() {
        let token = CommunicationToken::generate();
        // Picked up by whoever launched the worker; never logged.
        println!("GRIDAGENT_TOKEN={}", token.expose());
        token
    } else {
        CommunicationToken::new(config.agent.communication_token.clone())
    };
    tracing::info!(fingerprint = token.fingerprint(), "communication token ready");

    // Collaborators
    let resources: Arc<dyn ResourceStore> = if config.storage.in_memory {
        Arc::new(MemoryResourceStore::new())
    } else {
        Arc::new(
            FsResourceStore::new(
                &config.storage.resources_path,
                config.streaming.resource_chunk_bytes,
            )
            .context("failed to open resource store")?,
        )
    };
    let submitter = Arc::new(MemorySubmitter::new(
        config.streaming.max_task_payload_bytes,
    ));

    let agent = Arc::new(
        Agent::new(&config.agent, token, submitter, resources)
            .with_task_queue_capacity(config.streaming.task_queue_capacity),
    );

    // Listener
    let addr = format!("{}:{}", config.network.listen_addr, config.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        session_id = %agent.session_id(),
        task_id = %agent.task_id(),
        partition_id = %config.agent.partition_id,
        in_memory = config.storage.in_memory,
        "gridagentd listening"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let server_task = tokio::spawn(transport::serve(
        listener,
        agent.clone(),
        shutdown_tx.subscribe(),
    ));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = server_task        => tracing::error!("server task exited: {:?}", r),
    }

    agent.shutdown_token().cancel();
    Ok(())
}
