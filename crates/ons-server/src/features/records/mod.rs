pub mod queries;
pub mod routes;

pub use queries::{FetchRecordsQuery, FetchRecordsResponse};
pub use routes::records_routes;
