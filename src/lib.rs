pub mod analysis;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod output;
pub mod record;
pub mod registry;
pub mod scoring;
pub mod session;
pub mod store;
