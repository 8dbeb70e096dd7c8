use crate::catalog::{self, ProductRecord, SkuGenerator};
use crate::http::build_client;
use crate::models::{FailedItem, ItemErrorKind, ProcessRequest, StageReport};
use crate::pricing::PricingConfig;
use crate::resolver::{self, FetchError, ResolveError};
use crate::vision::{self, ExtractedAttributes, VisionClient, VisionConfig};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    vision: Arc<VisionClient>,
    http: reqwest::Client,
}

#[derive(Clone)]
pub struct PipelineConfig {
    pub pricing: PricingConfig,
    pub size_options: Vec<String>,
    pub max_images: usize,
    pub max_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            size_options: catalog::default_size_options(),
            max_images: 24,
            max_concurrency: 4,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pricing: PricingConfig::from_env(),
            size_options: size_options_from_env().unwrap_or(defaults.size_options),
            max_images: env_usize("MAX_IMAGES", defaults.max_images),
            max_concurrency: env_usize("MAX_CONCURRENCY", defaults.max_concurrency),
        }
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    ServiceUnavailable,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn unavailable(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::ServiceUnavailable,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

/// Result of one batch: export-ready records in input order, per-item
/// failures, and the stage transcript.
#[derive(Debug)]
pub struct BatchOutcome {
    pub products: Vec<ProductRecord>,
    pub failed: Vec<FailedItem>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug)]
struct StageOutcome<T> {
    value: T,
    output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

/// Outcome of one per-image unit of work.
#[derive(Debug)]
enum UnitError {
    /// Skip this item, keep the batch going.
    Item(ItemErrorKind, String),
    /// Every remaining call would fail the same way; abort the batch.
    Fatal(String),
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let vision = VisionClient::new(VisionConfig::from_env());
        Self {
            config: Arc::new(config),
            vision: Arc::new(vision),
            http: build_client(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(PipelineConfig::from_env())
    }

    pub async fn run(&self, request: &ProcessRequest) -> Result<BatchOutcome, PipelineError> {
        let mut stages = Vec::new();

        let urls = self
            .capture_stage("resolve_sources", &mut stages, {
                let source = request.urls_source.clone();
                let max_images = self.config.max_images;
                async move {
                    let urls = resolver::resolve_sources(&source, max_images)
                        .map_err(map_resolve_error)?;
                    let preview: Vec<&str> = urls.iter().take(4).map(String::as_str).collect();
                    let output = json!({
                        "count": urls.len(),
                        "preview": preview,
                    });
                    Ok(StageOutcome::new(urls, output))
                }
            })
            .await?;

        let sizes = match &request.sizes {
            Some(requested) => catalog::normalize_selection(requested, &self.config.size_options),
            None => self.config.size_options.clone(),
        };

        let started = Instant::now();
        let results = self.extract_all(&urls).await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("extract_attributes", elapsed_ms);
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        stages.push(StageReport::new(
            "extract_attributes",
            elapsed_ms,
            json!({
                "images": urls.len(),
                "extracted": ok_count,
                "failed": urls.len() - ok_count,
            }),
        ));

        let (products, failed) = self
            .capture_stage("assemble_records", &mut stages, {
                let urls = urls.clone();
                let pricing = self.config.pricing;
                let sizes = sizes.clone();
                async move {
                    let (products, failed) = collect_batch(&urls, results, &pricing, &sizes);
                    let skus: Vec<&str> =
                        products.iter().take(4).map(|p| p.sku.as_str()).collect();
                    let output = json!({
                        "products": products.len(),
                        "failed": failed.len(),
                        "sku_preview": skus,
                    });
                    Ok(StageOutcome::new((products, failed), output))
                }
            })
            .await?;

        Ok(BatchOutcome {
            products,
            failed,
            stages,
        })
    }

    /// Run the fetch → extract unit for every URL under the concurrency cap.
    /// Results come back in input order regardless of completion order. A
    /// fatal vision error aborts the still-pending units.
    async fn extract_all(
        &self,
        urls: &[String],
    ) -> Result<Vec<Result<ExtractedAttributes, UnitError>>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(urls.len());
        for url in urls {
            let semaphore = semaphore.clone();
            let http = self.http.clone();
            let vision = self.vision.clone();
            let url = url.clone();
            handles.push(tokio::spawn(async move {
                // The limiter lives for the whole batch and is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                process_one(&http, &vision, &url).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut handles = handles.into_iter();
        while let Some(handle) = handles.next() {
            let unit = match handle.await {
                Ok(result) => result,
                Err(err) => Err(UnitError::Item(
                    ItemErrorKind::ExtractionFailed,
                    format!("worker task failed: {err}"),
                )),
            };
            if let Err(UnitError::Fatal(message)) = &unit {
                for pending in handles {
                    pending.abort();
                }
                return Err(PipelineError::unavailable(
                    "extract_attributes",
                    message.clone(),
                ));
            }
            results.push(unit);
        }
        Ok(results)
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

async fn process_one(
    http: &reqwest::Client,
    vision: &VisionClient,
    url: &str,
) -> Result<ExtractedAttributes, UnitError> {
    let image = resolver::fetch_image(http, url).await.map_err(|err| {
        let kind = match &err {
            FetchError::Unreachable(_) => ItemErrorKind::UnreachableSource,
            FetchError::NotAnImage(_) => ItemErrorKind::InvalidFormat,
        };
        UnitError::Item(kind, err.to_string())
    })?;

    vision::extract_attributes(vision, &image)
        .await
        .map_err(|err| {
            if err.is_fatal() {
                UnitError::Fatal(err.to_string())
            } else {
                warn!(target = "wooex.pipeline", url = url, error = %err, "extraction failed; skipping item");
                UnitError::Item(ItemErrorKind::ExtractionFailed, err.to_string())
            }
        })
}

/// Join per-item results into export-ready records, preserving input order.
/// One item's failure never blocks another's result.
fn collect_batch(
    urls: &[String],
    results: Vec<Result<ExtractedAttributes, UnitError>>,
    pricing: &PricingConfig,
    sizes: &[String],
) -> (Vec<ProductRecord>, Vec<FailedItem>) {
    let mut skus = SkuGenerator::new();
    let mut products = Vec::new();
    let mut failed = Vec::new();

    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(attributes) => {
                let sku = skus.next(&attributes.name);
                products.push(ProductRecord::assemble(
                    attributes, pricing, sku, url, sizes,
                ));
            }
            Err(UnitError::Item(kind, detail)) => {
                failed.push(FailedItem {
                    url: url.clone(),
                    error: kind,
                    detail,
                });
            }
            // Fatal units abort in extract_all before reaching here.
            Err(UnitError::Fatal(detail)) => {
                failed.push(FailedItem {
                    url: url.clone(),
                    error: ItemErrorKind::ExtractionFailed,
                    detail,
                });
            }
        }
    }

    (products, failed)
}

fn map_resolve_error(err: ResolveError) -> PipelineError {
    match err {
        ResolveError::Empty => PipelineError::invalid_input("resolve_sources", err.to_string()),
        ResolveError::TooMany(_)
        | ResolveError::InvalidUrl(_)
        | ResolveError::UnsupportedScheme(_)
        | ResolveError::DomainNotAllowed(_) => {
            PipelineError::invalid_input("resolve_sources", err.to_string())
        }
    }
}

fn size_options_from_env() -> Option<Vec<String>> {
    std::env::var("SIZE_OPTIONS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|options| !options.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value >= 1)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessRequest, UrlsSource};

    fn sample_attributes(name: &str, price: f64) -> ExtractedAttributes {
        ExtractedAttributes {
            name: name.to_string(),
            original_price: price,
            brand: None,
            categories: vec!["Clothing".into()],
            short_description: String::new(),
            long_description: vec![],
        }
    }

    #[tokio::test]
    async fn empty_input_rejected_before_any_processing() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let request = ProcessRequest {
            urls_source: UrlsSource::Single("   ".into()),
            sizes: None,
            expansion: Default::default(),
        };
        let err = pipeline.run(&request).await.expect_err("should reject");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "resolve_sources");
    }

    #[tokio::test]
    async fn non_http_scheme_rejected() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let request = ProcessRequest {
            urls_source: UrlsSource::Single("ftp://example.com/a.jpg".into()),
            sizes: None,
            expansion: Default::default(),
        };
        let err = pipeline.run(&request).await.expect_err("should reject");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn unreachable_sources_fail_per_item_not_the_batch() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        // Nothing listens on port 9; every fetch fails fast with a connect
        // error and the batch still completes through the worker fan-out.
        let urls: Vec<String> = (1..=3)
            .map(|i| format!("http://127.0.0.1:9/{i}.jpg"))
            .collect();
        let request = ProcessRequest {
            urls_source: UrlsSource::Multiple(urls.clone()),
            sizes: None,
            expansion: Default::default(),
        };
        let outcome = pipeline.run(&request).await.expect("batch completes");
        assert!(outcome.products.is_empty());
        assert_eq!(outcome.failed.len(), 3);
        for (failed, url) in outcome.failed.iter().zip(&urls) {
            assert_eq!(failed.url, *url);
            assert_eq!(failed.error, ItemErrorKind::UnreachableSource);
        }
    }

    #[test]
    fn partial_failure_preserves_order_and_counts() {
        let urls: Vec<String> = (1..=3)
            .map(|i| format!("https://cdn.example.com/{i}.jpg"))
            .collect();
        let results = vec![
            Ok(sample_attributes("First Hoodie", 1000.0)),
            Err(UnitError::Item(
                ItemErrorKind::ExtractionFailed,
                "bad payload".into(),
            )),
            Ok(sample_attributes("Third Tee", 100.0)),
        ];
        let pricing = PricingConfig::default();
        let sizes = catalog::default_size_options();

        let (products, failed) = collect_batch(&urls, results, &pricing, &sizes);

        assert_eq!(products.len(), 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(products[0].name, "First Hoodie");
        assert_eq!(products[1].name, "Third Tee");
        assert_eq!(products[0].image, urls[0]);
        assert_eq!(products[1].image, urls[2]);
        assert_eq!(failed[0].url, urls[1]);
        assert_eq!(failed[0].error, ItemErrorKind::ExtractionFailed);
    }

    #[test]
    fn assembled_records_carry_pricing_and_sizes() {
        let urls = vec!["https://cdn.example.com/1.jpg".to_string()];
        let results = vec![Ok(sample_attributes("Hoodie", 1000.0))];
        let pricing = PricingConfig::default();
        let sizes = vec!["S".to_string(), "M".to_string()];

        let (products, failed) = collect_batch(&urls, results, &pricing, &sizes);

        assert!(failed.is_empty());
        assert_eq!(products[0].regular_price, 1000.0);
        assert_eq!(products[0].sale_price, 200.0);
        assert_eq!(products[0].sizes, sizes);
        assert!(products[0].sku.starts_with("HOODIE-"));
    }

    #[test]
    fn skus_are_sequential_over_successes_only() {
        let urls: Vec<String> = (1..=3)
            .map(|i| format!("https://cdn.example.com/{i}.jpg"))
            .collect();
        let results = vec![
            Ok(sample_attributes("Tee", 10.0)),
            Err(UnitError::Item(
                ItemErrorKind::UnreachableSource,
                "404".into(),
            )),
            Ok(sample_attributes("Tee", 10.0)),
        ];
        let (products, _) = collect_batch(
            &urls,
            results,
            &PricingConfig::default(),
            &catalog::default_size_options(),
        );
        assert_eq!(products[0].sku, "TEE-001");
        assert_eq!(products[1].sku, "TEE-002");
    }
}
