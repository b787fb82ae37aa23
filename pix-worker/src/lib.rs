pub mod app_context;
pub mod artifact_store;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fetch;
pub mod metric_consts;
pub mod processor;
pub mod publisher;
pub mod transform;
pub mod types;
