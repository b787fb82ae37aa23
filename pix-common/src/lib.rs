pub mod config;
pub mod health;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod metrics;
