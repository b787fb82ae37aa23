use envconfig::Envconfig;

/// Broker connection and producer tuning, shared by the consumer and the
/// completion event producer.
#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    // Completion events are small and sparse, keep the linger short
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    // Upper bound on delivery of one completion event, retries included
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    // One of none, gzip, snappy, lz4, zstd
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // where a new group starts: earliest or latest
}

impl ConsumerConfig {
    /// Consumer group and topic are application specific, so callers set their own
    /// defaults here before reading the rest of their config from the environment.
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        };
        if std::env::var("KAFKA_CONSUMER_TOPIC").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPIC", consumer_topic);
        };
    }
}
