pub mod config;
pub mod ingest;
pub mod routes;
