pub const EVENTS_RECEIVED: &str = "pix_events_received";
pub const RECV_ERRORS: &str = "pix_recv_errors";
pub const BATCH_SIZE: &str = "pix_batch_size";
pub const BATCH_DURATION: &str = "pix_batch_duration_ms";
pub const ITEM_OUTCOMES: &str = "pix_item_outcomes";
pub const STAGE_DURATION: &str = "pix_stage_duration_ms";
pub const ITEM_SATURATION: &str = "pix_item_saturation_percent";
pub const OFFSET_STORE_ERRORS: &str = "pix_offset_store_errors";
