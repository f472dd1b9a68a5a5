mod config;
mod http_layers;
mod server;
mod state;
mod stream;

pub use config::ServerConfig;
pub use http_layers::RequestsLoggingLevel;
pub use server::{make_app, run_server};
pub use state::{GuardedAccessStore, ServerState};
