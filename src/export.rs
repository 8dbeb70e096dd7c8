use crate::catalog::ProductRecord;
use crate::models::ExpansionMode;
use crate::pricing::format_price;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize export: {0}")]
    Serialization(#[from] csv::Error),
    #[error("failed to write export artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// One line of the WooCommerce bulk importer's CSV schema. Field order and
/// header names must match the importer exactly; everything absent renders as
/// an empty string.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "GTIN, UPC, EAN, or ISBN")]
    pub gtin: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Published")]
    pub published: String,
    #[serde(rename = "Is featured?")]
    pub is_featured: String,
    #[serde(rename = "Visibility in catalog")]
    pub visibility: String,
    #[serde(rename = "Short description")]
    pub short_description: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Date sale price starts")]
    pub date_sale_price_starts: String,
    #[serde(rename = "Date sale price ends")]
    pub date_sale_price_ends: String,
    #[serde(rename = "Tax status")]
    pub tax_status: String,
    #[serde(rename = "Tax class")]
    pub tax_class: String,
    #[serde(rename = "In stock?")]
    pub in_stock: String,
    #[serde(rename = "Stock")]
    pub stock: String,
    #[serde(rename = "Low stock amount")]
    pub low_stock_amount: String,
    #[serde(rename = "Backorders allowed?")]
    pub backorders_allowed: String,
    #[serde(rename = "Sold individually?")]
    pub sold_individually: String,
    #[serde(rename = "Weight (lbs)")]
    pub weight_lbs: String,
    #[serde(rename = "Length (in)")]
    pub length_in: String,
    #[serde(rename = "Width (in)")]
    pub width_in: String,
    #[serde(rename = "Height (in)")]
    pub height_in: String,
    #[serde(rename = "Allow customer reviews?")]
    pub allow_customer_reviews: String,
    #[serde(rename = "Purchase note")]
    pub purchase_note: String,
    #[serde(rename = "Sale price")]
    pub sale_price: String,
    #[serde(rename = "Regular price")]
    pub regular_price: String,
    #[serde(rename = "Categories")]
    pub categories: String,
    #[serde(rename = "Tags")]
    pub tags: String,
    #[serde(rename = "Shipping class")]
    pub shipping_class: String,
    #[serde(rename = "Images")]
    pub images: String,
    #[serde(rename = "Download limit")]
    pub download_limit: String,
    #[serde(rename = "Download expiry days")]
    pub download_expiry_days: String,
    #[serde(rename = "Parent")]
    pub parent: String,
    #[serde(rename = "Grouped products")]
    pub grouped_products: String,
    #[serde(rename = "Upsells")]
    pub upsells: String,
    #[serde(rename = "Cross-sells")]
    pub cross_sells: String,
    #[serde(rename = "External URL")]
    pub external_url: String,
    #[serde(rename = "Button text")]
    pub button_text: String,
    #[serde(rename = "Position")]
    pub position: String,
    #[serde(rename = "Brands")]
    pub brands: String,
    #[serde(rename = "Attribute 1 name")]
    pub attribute_1_name: String,
    #[serde(rename = "Attribute 1 value(s)")]
    pub attribute_1_values: String,
    #[serde(rename = "Attribute 1 visible")]
    pub attribute_1_visible: String,
    #[serde(rename = "Attribute 1 global")]
    pub attribute_1_global: String,
}

impl Default for ExportRow {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: "simple".into(),
            sku: String::new(),
            gtin: String::new(),
            name: String::new(),
            published: "1".into(),
            is_featured: "0".into(),
            visibility: "visible".into(),
            short_description: String::new(),
            description: String::new(),
            date_sale_price_starts: String::new(),
            date_sale_price_ends: String::new(),
            tax_status: "taxable".into(),
            tax_class: String::new(),
            in_stock: "1".into(),
            stock: "100".into(),
            low_stock_amount: "2".into(),
            backorders_allowed: "0".into(),
            sold_individually: "0".into(),
            weight_lbs: "1".into(),
            length_in: "10".into(),
            width_in: "10".into(),
            height_in: "5".into(),
            allow_customer_reviews: "1".into(),
            purchase_note: String::new(),
            sale_price: String::new(),
            regular_price: String::new(),
            categories: String::new(),
            tags: String::new(),
            shipping_class: String::new(),
            images: String::new(),
            download_limit: String::new(),
            download_expiry_days: String::new(),
            parent: String::new(),
            grouped_products: String::new(),
            upsells: String::new(),
            cross_sells: String::new(),
            external_url: String::new(),
            button_text: String::new(),
            position: "0".into(),
            brands: String::new(),
            attribute_1_name: "Brand".into(),
            attribute_1_values: String::new(),
            attribute_1_visible: "1".into(),
            attribute_1_global: "0".into(),
        }
    }
}

pub struct ExportArtifact {
    pub filename: String,
    pub path: PathBuf,
    pub row_count: usize,
}

/// Flatten one record into importer rows according to the expansion mode.
pub fn rows_for(record: &ProductRecord, mode: ExpansionMode) -> Vec<ExportRow> {
    let mut base = ExportRow {
        sku: record.sku.clone(),
        name: record.name.clone(),
        regular_price: format_price(record.regular_price),
        sale_price: format_price(record.sale_price),
        short_description: record.short_description.clone(),
        description: record.long_description.join("\n"),
        categories: record.categories.join(", "),
        images: record.image.clone(),
        brands: record.brand.clone().unwrap_or_default(),
        attribute_1_values: record.brand.clone().unwrap_or_default(),
        ..ExportRow::default()
    };

    if record.sizes.is_empty() {
        return vec![base];
    }

    match mode {
        ExpansionMode::Combined => {
            base.attribute_1_name = "Size".into();
            base.attribute_1_values = record.sizes.join(",");
            vec![base]
        }
        ExpansionMode::Variations => {
            base.kind = "variable".into();
            base.attribute_1_name = "Size".into();
            base.attribute_1_values = record.sizes.join(",");
            base.attribute_1_global = "1".into();

            let mut rows = vec![base];
            for size in &record.sizes {
                rows.push(ExportRow {
                    kind: "variation".into(),
                    parent: record.sku.clone(),
                    sku: format!("{}-{}", record.sku, size),
                    name: format!("{} - {}", record.name, size),
                    regular_price: format_price(record.regular_price),
                    sale_price: format_price(record.sale_price),
                    images: record.image.clone(),
                    stock: "10".into(),
                    attribute_1_name: "Size".into(),
                    attribute_1_values: size.clone(),
                    ..ExportRow::default()
                });
            }
            rows
        }
    }
}

/// Render the whole batch to a CSV string, insertion order preserved.
pub fn render_string(
    records: &[ProductRecord],
    mode: ExpansionMode,
) -> Result<(String, usize), ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut row_count = 0;
    for record in records {
        for row in rows_for(record, mode) {
            writer.serialize(row)?;
            row_count += 1;
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Io(std::io::Error::other(err.to_string())))?;
    // The writer only ever receives UTF-8 field values.
    let body = String::from_utf8(bytes).expect("csv output is utf-8");
    Ok((body, row_count))
}

/// Write the export artifact under `dir`. Nothing is advertised on failure;
/// the temp-free single write either lands the whole file or errors.
pub fn write_csv(
    records: &[ProductRecord],
    mode: ExpansionMode,
    dir: &Path,
) -> Result<ExportArtifact, ExportError> {
    let (body, row_count) = render_string(records, mode)?;
    std::fs::create_dir_all(dir)?;

    let filename = format!(
        "woocommerce_export_{}_{}.csv",
        Utc::now().format("%Y%m%d_%H%M%S"),
        &Uuid::new_v4().simple().to_string()[..8],
    );
    let path = dir.join(&filename);
    std::fs::write(&path, body.as_bytes())?;

    info!(
        target = "wooex.export",
        file = %path.display(),
        rows = row_count,
        products = records.len(),
        "export artifact written"
    );

    Ok(ExportArtifact {
        filename,
        path,
        row_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sku: &str, name: &str, sizes: &[&str]) -> ProductRecord {
        ProductRecord {
            sku: sku.into(),
            name: name.into(),
            regular_price: 1000.0,
            sale_price: 200.0,
            brand: Some("Supreme".into()),
            categories: vec!["Clothing".into(), "Hoodies".into()],
            short_description: "Hoodie, with commas".into(),
            long_description: vec!["Line one".into(), "Line two".into()],
            image: "https://cdn.example.com/a.jpg".into(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn simple_record_renders_one_row() {
        let rows = rows_for(&record("SKU-001", "Tee", &[]), ExpansionMode::Variations);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "simple");
        assert_eq!(rows[0].attribute_1_name, "Brand");
        assert_eq!(rows[0].attribute_1_values, "Supreme");
    }

    #[test]
    fn variations_mode_emits_parent_plus_one_row_per_size() {
        let rows = rows_for(
            &record("SKU-001", "Hoodie", &["S", "M", "L"]),
            ExpansionMode::Variations,
        );
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].kind, "variable");
        assert_eq!(rows[0].attribute_1_values, "S,M,L");
        assert_eq!(rows[0].attribute_1_global, "1");
        assert_eq!(rows[1].kind, "variation");
        assert_eq!(rows[1].sku, "SKU-001-S");
        assert_eq!(rows[1].parent, "SKU-001");
        assert_eq!(rows[3].name, "Hoodie - L");
    }

    #[test]
    fn combined_mode_folds_sizes_into_one_row() {
        let rows = rows_for(
            &record("SKU-001", "Hoodie", &["S", "XL"]),
            ExpansionMode::Combined,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "simple");
        assert_eq!(rows[0].attribute_1_name, "Size");
        assert_eq!(rows[0].attribute_1_values, "S,XL");
    }

    #[test]
    fn csv_round_trip_preserves_fields_and_order() {
        let records = vec![
            record("SKU-001", "Hoodie \"Box Logo\", FW20", &[]),
            record("SKU-002", "Tee\nwith newline", &[]),
        ];
        let (body, row_count) = render_string(&records, ExpansionMode::Variations).expect("render");
        assert_eq!(row_count, 2);

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let headers = reader.headers().expect("headers").clone();
        assert_eq!(headers.get(0), Some("ID"));
        assert_eq!(headers.get(4), Some("Name"));
        assert_eq!(headers.len(), 45);

        let rows: Vec<csv::StringRecord> =
            reader.records().collect::<Result<_, _>>().expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][4], "Hoodie \"Box Logo\", FW20");
        assert_eq!(&rows[1][4], "Tee\nwith newline");
        assert_eq!(&rows[0][2], "SKU-001");
        assert_eq!(&rows[1][2], "SKU-002");
        assert_eq!(&rows[0][25], "200.00");
        assert_eq!(&rows[0][26], "1000.00");
    }

    #[test]
    fn write_csv_produces_readable_artifact() {
        let dir = std::env::temp_dir().join(format!("wooex-test-{}", Uuid::new_v4().simple()));
        let artifact = write_csv(
            &[record("SKU-001", "Hoodie", &["S"])],
            ExpansionMode::Variations,
            &dir,
        )
        .expect("write");
        assert_eq!(artifact.row_count, 2);
        let body = std::fs::read_to_string(&artifact.path).expect("read back");
        assert!(body.starts_with("ID,Type,SKU"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
