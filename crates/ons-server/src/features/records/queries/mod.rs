pub mod fetch;

pub use fetch::{FetchRecordsQuery, FetchRecordsResponse};
