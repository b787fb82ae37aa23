use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};

pub const PRODUCT_CREATED_EVENT_TYPE: &str = "ProductCreated";
pub const COMPLETION_DATA_VERSION: &str = "1.0";

/// A product announcement as published upstream. Only `blob_url` is needed to
/// attempt processing; everything else is carried into the catalog record.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "deserialize_flexible_i64")]
    pub quantity_available: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_url: Option<String>,
}

impl InboundEvent {
    /// The source image reference, treating blank strings the same as a missing one.
    pub fn source_url(&self) -> Option<&str> {
        self.blob_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub partition_key: String,
    pub row_key: String,
    pub name: String,
    pub brand: String,
    pub price: f64,
    pub quantity_available: i64,
    pub image_url: String,
}

impl CatalogRecord {
    pub fn new(event: &InboundEvent, image_url: String) -> Self {
        Self {
            partition_key: event.brand.clone(),
            row_key: event.name.clone(),
            name: event.name.clone(),
            brand: event.brand.clone(),
            price: event.price,
            quantity_available: event.quantity_available,
            image_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub event_type: String,
    pub subject: String,
    pub data_version: String,
    pub data: CatalogRecord,
}

impl From<CatalogRecord> for CompletionEvent {
    fn from(record: CatalogRecord) -> Self {
        Self {
            event_type: PRODUCT_CREATED_EVENT_TYPE.to_owned(),
            subject: format!("Products/{}/{}", record.brand, record.name),
            data_version: COMPLETION_DATA_VERSION.to_owned(),
            data: record,
        }
    }
}

/// Terminal state of one item. Skips are expected conditions, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Skipped(SkipReason),
    Failed(FailureReason),
    /// Catalog written. A warning means the best-effort notification did not go out.
    Completed(Option<CompletionWarning>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingUrl,
    UnsupportedFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    FetchError,
    TransformError,
    StoreError,
    Conflict,
    CatalogError,
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionWarning {
    PublishError,
}

impl ItemOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ItemOutcome::Completed(_))
    }

    /// Values for the `outcome` and `reason` metric labels.
    pub fn labels(&self) -> (&'static str, &'static str) {
        match self {
            ItemOutcome::Skipped(reason) => ("skipped", reason.as_str()),
            ItemOutcome::Failed(reason) => ("failed", reason.as_str()),
            ItemOutcome::Completed(None) => ("completed", "none"),
            ItemOutcome::Completed(Some(CompletionWarning::PublishError)) => {
                ("completed", "publish_error")
            }
        }
    }
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingUrl => "missing_url",
            SkipReason::UnsupportedFormat => "unsupported_format",
        }
    }
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::FetchError => "fetch_error",
            FailureReason::TransformError => "transform_error",
            FailureReason::StoreError => "store_error",
            FailureReason::Conflict => "conflict",
            FailureReason::CatalogError => "catalog_error",
            FailureReason::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (outcome, reason) = self.labels();
        write!(f, "{outcome}({reason})")
    }
}

// Upstream producers are inconsistent about numeric fields, "4.50" and 4.5 both show up.
fn deserialize_flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(f64),
        Text(String),
        Null(()),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Number(n) => Ok(n),
        Flexible::Text(s) if s.trim().is_empty() => Ok(0.0),
        Flexible::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&s), &"a decimal number")),
        Flexible::Null(()) => Ok(0.0),
    }
}

fn deserialize_flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(i64),
        Text(String),
        Null(()),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Number(n) => Ok(n),
        Flexible::Text(s) if s.trim().is_empty() => Ok(0),
        Flexible::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&s), &"an integer")),
        Flexible::Null(()) => Ok(0),
    }
}
