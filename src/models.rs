use crate::catalog::ProductRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRequest {
    pub urls_source: UrlsSource,
    /// Initial size selection applied to every product; defaults to the
    /// configured size options.
    #[serde(default)]
    pub sizes: Option<Vec<String>>,
    #[serde(default)]
    pub expansion: ExpansionMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UrlsSource {
    Single(String),
    Multiple(Vec<String>),
}

/// How records flatten into CSV rows: one parent plus one row per size variant
/// (the importer's variable-product shape), or a single row with the sizes
/// combined into the attribute column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMode {
    #[default]
    Variations,
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub session_id: String,
    pub products: Vec<ProductSummary>,
    pub failed: Vec<FailedItem>,
    pub stages: Vec<StageReport>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSummary {
    pub sku: String,
    pub name: String,
    pub regular_price: f64,
    pub sale_price: f64,
    pub brand: Option<String>,
    pub short_description: String,
    pub image: String,
    pub sizes: Vec<String>,
}

impl From<&ProductRecord> for ProductSummary {
    fn from(record: &ProductRecord) -> Self {
        Self {
            sku: record.sku.clone(),
            name: record.name.clone(),
            regular_price: record.regular_price,
            sale_price: record.sale_price,
            brand: record.brand.clone(),
            short_description: record.short_description.clone(),
            image: record.image.clone(),
            sizes: record.sizes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    pub url: String,
    pub error: ItemErrorKind,
    pub detail: String,
}

/// Per-item failure taxonomy. These skip the item; they never abort the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    UnreachableSource,
    InvalidFormat,
    ExtractionFailed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExportRequest {
    /// Overrides the expansion mode the session was created with.
    #[serde(default)]
    pub expansion: Option<ExpansionMode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResponse {
    pub success: bool,
    pub download_url: String,
    pub filename: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizeSelectionRequest {
    pub sizes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizeSelectionResponse {
    pub sku: String,
    pub sizes: Vec<String>,
}
