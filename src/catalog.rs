use crate::pricing::PricingConfig;
use crate::vision::ExtractedAttributes;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub const DEFAULT_SIZE_OPTIONS: [&str; 4] = ["S", "M", "L", "XL"];

pub fn default_size_options() -> Vec<String> {
    DEFAULT_SIZE_OPTIONS.iter().map(|s| s.to_string()).collect()
}

/// One export-ready product, assembled from extracted attributes plus the
/// pricing pass. Mutated only by size-selection edits before export.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub sku: String,
    pub name: String,
    pub regular_price: f64,
    pub sale_price: f64,
    pub brand: Option<String>,
    pub categories: Vec<String>,
    pub short_description: String,
    pub long_description: Vec<String>,
    pub image: String,
    pub sizes: Vec<String>,
}

impl ProductRecord {
    pub fn assemble(
        attributes: ExtractedAttributes,
        pricing: &PricingConfig,
        sku: String,
        image_url: &str,
        sizes: &[String],
    ) -> Self {
        let sale_price = pricing.sale_price(attributes.original_price);
        Self {
            sku,
            name: attributes.name,
            regular_price: attributes.original_price,
            sale_price,
            brand: attributes.brand,
            categories: attributes.categories,
            short_description: attributes.short_description,
            long_description: attributes.long_description,
            image: image_url.to_string(),
            sizes: sizes.to_vec(),
        }
    }

    /// Replace the size selection, keeping only labels from `options` and
    /// preserving option order.
    pub fn set_sizes(&mut self, requested: &[String], options: &[String]) {
        self.sizes = normalize_selection(requested, options);
    }

    /// Toggle-all: if every option is currently selected, clear the set;
    /// otherwise select every option. Applying it twice restores the input.
    pub fn toggle_all_sizes(&mut self, options: &[String]) {
        let all_selected =
            !options.is_empty() && options.iter().all(|option| self.sizes.contains(option));
        if all_selected {
            self.sizes.clear();
        } else {
            self.sizes = options.to_vec();
        }
    }
}

/// Filter a requested size set down to known options, in option order.
pub fn normalize_selection(requested: &[String], options: &[String]) -> Vec<String> {
    options
        .iter()
        .filter(|option| requested.iter().any(|r| r == *option))
        .cloned()
        .collect()
}

/// Generates SKUs that are stable for a given name/position within one run.
#[derive(Debug, Default)]
pub struct SkuGenerator {
    issued: u32,
}

impl SkuGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, product_name: &str) -> String {
        self.issued += 1;
        format!("{}-{:03}", slugify(product_name), self.issued)
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_uppercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 16 {
            break;
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        "PROD".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(sizes: &[&str]) -> ProductRecord {
        ProductRecord {
            sku: "TEST-001".into(),
            name: "Test Hoodie".into(),
            regular_price: 1000.0,
            sale_price: 200.0,
            brand: Some("Acme".into()),
            categories: vec!["Clothing".into()],
            short_description: "A hoodie".into(),
            long_description: vec!["Warm".into()],
            image: "https://example.com/a.jpg".into(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn toggle_all_from_partial_selects_everything() {
        let options = default_size_options();
        let mut record = sample_record(&["S", "M"]);
        record.toggle_all_sizes(&options);
        assert_eq!(record.sizes, options);
    }

    #[test]
    fn toggle_all_from_full_clears() {
        let options = default_size_options();
        let mut record = sample_record(&["S", "M", "L", "XL"]);
        record.toggle_all_sizes(&options);
        assert!(record.sizes.is_empty());
    }

    #[test]
    fn toggle_all_twice_is_identity_on_extremes() {
        let options = default_size_options();
        for initial in [vec![], default_size_options()] {
            let mut record = sample_record(&[]);
            record.sizes = initial.clone();
            record.toggle_all_sizes(&options);
            record.toggle_all_sizes(&options);
            assert_eq!(record.sizes, initial);
        }
    }

    #[test]
    fn set_sizes_filters_to_known_options_in_order() {
        let options = default_size_options();
        let mut record = sample_record(&[]);
        record.set_sizes(
            &["XL".to_string(), "XXL".to_string(), "S".to_string()],
            &options,
        );
        assert_eq!(record.sizes, vec!["S".to_string(), "XL".to_string()]);
    }

    #[test]
    fn sku_is_deterministic_within_a_run() {
        let mut first = SkuGenerator::new();
        let mut second = SkuGenerator::new();
        for name in ["Supreme Box Logo Hoodie", "Plain Tee", "Plain Tee"] {
            assert_eq!(first.next(name), second.next(name));
        }
    }

    #[test]
    fn sku_is_unique_for_identical_names() {
        let mut skus = SkuGenerator::new();
        let a = skus.next("Plain Tee");
        let b = skus.next("Plain Tee");
        assert_ne!(a, b);
        assert!(a.starts_with("PLAIN-TEE-"));
    }

    #[test]
    fn slug_handles_symbols_and_empty_names() {
        let mut skus = SkuGenerator::new();
        assert_eq!(skus.next("***"), "PROD-001");
        assert!(skus.next("Nike Air / Max 97").starts_with("NIKE-AIR-MAX"));
    }
}
