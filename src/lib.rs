pub mod app;
pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod ena;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod output;
pub mod progress;
pub mod resolve;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod transport;
