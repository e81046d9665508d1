//! `petition-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): load configuration, open the database,
//!   bind the socket and serve until Ctrl+C.
//! - **`--ping`**: connect to the running service socket, send a hello
//!   handshake, verify the response, then exit. Suitable as a health check.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use petition_core::{PetitionConfig, PetitionEngine};
use petition_service::images::FsImageStore;
use petition_service::protocol::{HelloParams, RequestId, RpcRequest};
use petition_service::{PROTOCOL_VERSION, ServiceState};

fn load_config() -> std::io::Result<PetitionConfig> {
    PetitionConfig::load().map_err(|e| std::io::Error::other(format!("Failed to load config: {e}")))
}

/// Send one `hello` to the configured socket and report whether the service
/// answered with a result.
fn ping() -> std::io::Result<()> {
    let path = load_config()?.resolved_socket_path();
    let mut stream = UnixStream::connect(&path).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", path.display()))
    })?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    let params = serde_json::to_value(HelloParams {
        protocol_version: PROTOCOL_VERSION.to_string(),
        client_version: format!("ping/{}", env!("CARGO_PKG_VERSION")),
    })
    .map_err(std::io::Error::other)?;
    let request = RpcRequest {
        id: RequestId::Integer(0),
        method: "hello".to_string(),
        params: Some(params),
    };
    let mut bytes = serde_json::to_vec(&request).map_err(std::io::Error::other)?;
    bytes.push(b'\n');
    stream.write_all(&bytes)?;
    stream.flush()?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;
    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;

    match resp.get("error") {
        None if resp.get("result").is_some() => {
            eprintln!("ping: {} is alive", path.display());
            Ok(())
        }
        error => {
            let msg = error
                .and_then(|e| e.get("message"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("no result");
            Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
        }
    }
}

fn main() -> std::io::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("--ping") {
        return ping();
    }

    run_service()
}

#[tokio::main]
async fn run_service() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("petition-service v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = load_config()?;
    let engine = PetitionEngine::open(&cfg)
        .map_err(|e| std::io::Error::other(format!("Failed to open petition store: {e}")))?;
    let images = Arc::new(FsImageStore::new(cfg.resolved_signatures_dir()));
    tracing::info!("Signature images at {}", images.dir().display());

    let state = Arc::new(ServiceState::new(engine, images));
    let socket_path = cfg.resolved_socket_path();
    let listener = petition_service::ipc::bind_listener(&socket_path)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    petition_service::ipc::serve(state, listener, shutdown_rx).await?;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("Socket cleanup skipped: {e}");
    }
    tracing::info!("petition-service exiting cleanly");
    Ok(())
}
