use super::config::ServerConfig;
use crate::access_store::AccessStore;
use crate::delivery::{AttemptLogger, DownloadGate, UrlSigner};
use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

pub type GuardedAccessStore = Arc<dyn AccessStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub access_store: GuardedAccessStore,
    pub gate: Arc<DownloadGate>,
    pub signer: Arc<UrlSigner>,
    pub attempt_logger: AttemptLogger,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        access_store: GuardedAccessStore,
        gate: Arc<DownloadGate>,
        signer: Arc<UrlSigner>,
    ) -> Self {
        let attempt_logger = AttemptLogger::new(access_store.clone());
        ServerState {
            config,
            start_time: Instant::now(),
            access_store,
            gate,
            signer,
            attempt_logger,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(state: &ServerState) -> Self {
        state.config.clone()
    }
}

impl FromRef<ServerState> for GuardedAccessStore {
    fn from_ref(state: &ServerState) -> Self {
        state.access_store.clone()
    }
}

impl FromRef<ServerState> for Arc<DownloadGate> {
    fn from_ref(state: &ServerState) -> Self {
        state.gate.clone()
    }
}

impl FromRef<ServerState> for Arc<UrlSigner> {
    fn from_ref(state: &ServerState) -> Self {
        state.signer.clone()
    }
}
