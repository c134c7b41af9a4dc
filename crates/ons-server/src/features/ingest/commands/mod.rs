pub mod run;

pub use run::{RunIngestionCommand, RunIngestionError, RunIngestionResponse};
