//! `petition-service`: socket front end for the petition engine.
//!
//! Listens on a Unix domain socket (`service.socket_path`, by default
//! `$XDG_RUNTIME_DIR/petition.sock`) and speaks newline-delimited
//! JSON-RPC-lite. Caller identity arrives as an opaque `caller_id` from
//! whatever authenticates the user in front of this service.

use std::sync::Arc;
use std::time::Instant;

use petition_core::PetitionEngine;

pub mod images;
pub mod ipc;
pub mod protocol;

use images::SignatureImageStore;

/// Protocol version for the petition service IPC.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Everything a connection handler needs.
pub struct ServiceState {
    pub engine: PetitionEngine,
    pub images: Arc<dyn SignatureImageStore>,
    started_at: Instant,
}

impl ServiceState {
    pub fn new(engine: PetitionEngine, images: Arc<dyn SignatureImageStore>) -> Self {
        Self {
            engine,
            images,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
