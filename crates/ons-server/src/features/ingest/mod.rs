pub mod commands;
pub mod routes;

pub use commands::{RunIngestionCommand, RunIngestionError, RunIngestionResponse};
pub use routes::ingest_routes;
