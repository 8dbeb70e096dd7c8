use crate::resolver::ResolvedImage;
use crate::vision::gemini::{VisionClient, VisionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::warn;

const EXTRACTION_PROMPT: &str = r#"
You are an expert in streetwear and luxury fashion pricing. Analyze the product
photo and respond with a single JSON object, no prose, using this shape:

{
    "product_name": "Exact product name with details",
    "original_price": 0.0,
    "categories": ["Main Category", "Subcategory"],
    "brand": "Brand name if identifiable",
    "short_description": "One-sentence description highlighting value factors",
    "detailed_description": ["bullet", "bullet"]
}

Pricing rules: prefer the brand's official retail price; if the item is sold
out at retail, use the highest recent resale price you can justify (StockX,
GOAT, Grailed, eBay sold listings). Never be conservative. Document the price
source in the detailed description bullets. Output JSON only.
"#;

/// Typed record extracted from one product image. Produced once per image and
/// never mutated afterward.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedAttributes {
    pub name: String,
    pub original_price: f64,
    pub brand: Option<String>,
    pub categories: Vec<String>,
    pub short_description: String,
    pub long_description: Vec<String>,
}

/// One inference call for one image, parsed into a typed record. Malformed
/// payloads surface as `InvalidResponse`; the caller skips the item.
pub async fn extract_attributes(
    client: &VisionClient,
    image: &ResolvedImage,
) -> Result<ExtractedAttributes, VisionError> {
    let text = client
        .describe_image(EXTRACTION_PROMPT, &image.bytes, &image.mime)
        .await?;
    parse_attributes(&text, &image.url)
        .ok_or_else(|| VisionError::InvalidResponse("unparseable attribute payload".into()))
}

/// Parse the model's free text into `ExtractedAttributes`. Tolerates markdown
/// code fences and fills gaps at the boundary rather than propagating an
/// untyped map downstream.
pub fn parse_attributes(raw: &str, source_url: &str) -> Option<ExtractedAttributes> {
    let cleaned = strip_markdown_fence(raw);
    let mut value: Value = serde_json::from_str(&cleaned).ok()?;
    if !value.is_object() {
        return None;
    }
    normalize_attribute_value(&mut value, source_url);
    serde_json::from_value(value).ok()
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

fn normalize_attribute_value(value: &mut Value, source_url: &str) {
    let obj = match value.as_object_mut() {
        Some(obj) => obj,
        None => return,
    };

    // The model emits `product_name`/`detailed_description`; rename to the
    // canonical field names before typed deserialization.
    if let Some(name) = obj.remove("product_name") {
        obj.entry("name").or_insert(name);
    }
    if let Some(bullets) = obj.remove("detailed_description") {
        obj.entry("long_description").or_insert(bullets);
    }

    let name_missing = obj
        .get("name")
        .and_then(Value::as_str)
        .map(|s| s.trim().is_empty())
        .unwrap_or(true);
    if name_missing {
        obj.insert(
            "name".into(),
            Value::String(format!("Product {}", filename_from_url(source_url))),
        );
    }

    let price = coerce_price(obj.get("original_price"));
    if price.is_none() {
        warn!(
            target = "wooex.vision",
            url = source_url,
            "price missing or malformed; coercing to 0"
        );
    }
    obj.insert("original_price".into(), price.unwrap_or(0.0).into());

    let categories_empty = obj
        .get("categories")
        .and_then(Value::as_array)
        .map(|arr| arr.is_empty())
        .unwrap_or(true);
    if categories_empty {
        obj.insert(
            "categories".into(),
            Value::Array(vec![Value::String("Uncategorized".into())]),
        );
    }

    if obj.get("short_description").and_then(Value::as_str).is_none() {
        obj.insert("short_description".into(), Value::String(String::new()));
    }

    match obj.get("long_description") {
        Some(Value::Array(_)) => {}
        Some(Value::String(text)) => {
            let bullets = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect();
            obj.insert("long_description".into(), Value::Array(bullets));
        }
        _ => {
            obj.insert("long_description".into(), Value::Array(Vec::new()));
        }
    }

    if let Some(brand) = obj.get("brand").and_then(Value::as_str)
        && (brand.trim().is_empty() || brand.eq_ignore_ascii_case("unknown"))
    {
        obj.insert("brand".into(), Value::Null);
    }
}

fn coerce_price(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|p| p.is_finite() && *p >= 0.0),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite() && *p >= 0.0),
        _ => None,
    }
}

fn filename_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .split('?')
        .next()
        .unwrap_or("image")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://cdn.example.com/photos/box-logo.jpg?v=3";

    #[test]
    fn parses_plain_json() {
        let raw = r#"{
            "product_name": "Supreme Box Logo Hoodie FW20 Black",
            "original_price": 1299.0,
            "categories": ["Clothing", "Hoodies"],
            "brand": "Supreme",
            "short_description": "Sought-after FW20 hoodie.",
            "detailed_description": ["Resale high: $1,450", "Black colorway premium"]
        }"#;
        let attrs = parse_attributes(raw, URL).expect("parse");
        assert_eq!(attrs.name, "Supreme Box Logo Hoodie FW20 Black");
        assert_eq!(attrs.original_price, 1299.0);
        assert_eq!(attrs.brand.as_deref(), Some("Supreme"));
        assert_eq!(attrs.categories, vec!["Clothing", "Hoodies"]);
        assert_eq!(attrs.long_description.len(), 2);
    }

    #[test]
    fn strips_markdown_fence() {
        let raw = "```json\n{\"product_name\": \"Tee\", \"original_price\": 80}\n```";
        let attrs = parse_attributes(raw, URL).expect("parse");
        assert_eq!(attrs.name, "Tee");
        assert_eq!(attrs.original_price, 80.0);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(parse_attributes("not json at all", URL).is_none());
        assert!(parse_attributes("[1, 2, 3]", URL).is_none());
    }

    #[test]
    fn missing_name_falls_back_to_filename() {
        let attrs = parse_attributes(r#"{"original_price": 50}"#, URL).expect("parse");
        assert_eq!(attrs.name, "Product box-logo.jpg");
    }

    #[test]
    fn malformed_price_coerces_to_zero() {
        let attrs = parse_attributes(r#"{"product_name": "Tee", "original_price": "n/a"}"#, URL)
            .expect("parse");
        assert_eq!(attrs.original_price, 0.0);
    }

    #[test]
    fn string_price_with_currency_symbols_parses() {
        let attrs =
            parse_attributes(r#"{"product_name": "Tee", "original_price": "$1,299.50"}"#, URL)
                .expect("parse");
        assert_eq!(attrs.original_price, 1299.5);
    }

    #[test]
    fn empty_categories_default_to_uncategorized() {
        let attrs = parse_attributes(
            r#"{"product_name": "Tee", "original_price": 10, "categories": []}"#,
            URL,
        )
        .expect("parse");
        assert_eq!(attrs.categories, vec!["Uncategorized"]);
    }

    #[test]
    fn unknown_brand_becomes_none() {
        let attrs = parse_attributes(
            r#"{"product_name": "Tee", "original_price": 10, "brand": "Unknown"}"#,
            URL,
        )
        .expect("parse");
        assert!(attrs.brand.is_none());
    }

    #[test]
    fn string_long_description_splits_into_bullets() {
        let attrs = parse_attributes(
            r#"{"product_name": "Tee", "original_price": 10, "detailed_description": "a\nb\n"}"#,
            URL,
        )
        .expect("parse");
        assert_eq!(attrs.long_description, vec!["a", "b"]);
    }
}
