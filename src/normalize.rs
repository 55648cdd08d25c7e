use std::fs::OpenOptions;
use std::io::{BufRead as _, BufReader};
use std::path::PathBuf;

use anyhow::Context as _;
use serde_json::Value;
use url::Url;

use crate::cli::NormalizeArgs;
use crate::extract::{self, Extracted};
use crate::formats::{NormalizedRecord, RunReport, Stage};
use crate::sink::{AppendOutcome, JsonlSink, RecordSink};

/// Inputs to [`normalize`] that do not come from the document itself.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    /// Category slug the product was listed under.
    pub category: String,
    /// Unix seconds.
    pub captured_at: i64,
    /// Base for resolving relative product and image links.
    pub site: Option<Url>,
}

/// Names of the fields that fell back to their default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDiagnostics {
    pub defaulted: Vec<&'static str>,
}

impl FieldDiagnostics {
    fn take<T>(&mut self, field: &'static str, value: Extracted<T>) -> T {
        if value.is_defaulted() {
            self.defaulted.push(field);
        }
        value.into_inner()
    }
}

pub fn normalize(raw: &Value, context: &NormalizeContext) -> NormalizedRecord {
    normalize_with_diagnostics(raw, context).0
}

pub fn normalize_with_diagnostics(
    raw: &Value,
    context: &NormalizeContext,
) -> (NormalizedRecord, FieldDiagnostics) {
    let mut diag = FieldDiagnostics::default();
    let site = context.site.as_ref();

    let record = NormalizedRecord {
        timestamp: context.captured_at,
        rpc: diag.take("RPC", extract::rpc(raw)),
        url: diag.take("url", extract::product_url(raw, site, &context.category)),
        title: diag.take("title", extract::title(raw)),
        marketing_tags: diag.take("marketing_tags", extract::marketing_tags(raw)),
        brand: diag.take("brand", extract::brand(raw)),
        section: diag.take("section", extract::section(raw)),
        price_data: diag.take("price_data", extract::price(raw)),
        stock: diag.take("stock", extract::stock(raw)),
        assets: diag.take("assets", extract::assets(raw, site)),
        metadata: diag.take("metadata", extract::metadata(raw)),
        variants: diag.take("variants", extract::variants(raw)),
    };
    (record, diag)
}

/// Pulls the product object out of an API payload. Accepts the
/// `{"success": .., "results": {..}}` envelope or a bare product object.
pub fn product_from_payload(payload: Value) -> Result<Value, String> {
    let Value::Object(mut map) = payload else {
        return Err("expected a JSON object".to_owned());
    };
    if map.get("success") == Some(&Value::Bool(false)) {
        return Err("upstream reported success=false".to_owned());
    }
    match map.remove("results") {
        Some(results @ Value::Object(_)) => Ok(results),
        Some(_) => Err("`results` is not an object".to_owned()),
        None => Ok(Value::Object(map)),
    }
}

/// Offline normalization: one raw document per input line into the record log.
pub fn run(args: NormalizeArgs) -> anyhow::Result<RunReport> {
    let input_path = PathBuf::from(&args.input);
    let site = Url::parse(&args.site_base).context("parse --site-base")?;
    let captured_at = args
        .captured_at
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let context = NormalizeContext {
        category: args.category.clone(),
        captured_at,
        site: Some(site),
    };

    let input = OpenOptions::new()
        .read(true)
        .open(&input_path)
        .with_context(|| format!("open raw documents: {}", input_path.display()))?;
    let sink = JsonlSink::open(&args.out, args.dedupe).context("open record log")?;

    let mut report = RunReport::default();
    for (idx, line) in BufReader::new(input).lines().enumerate() {
        let line = line.context("read raw document line")?;
        if line.trim().is_empty() {
            continue;
        }
        let id = format!("{}:{}", input_path.display(), idx + 1);
        report.fetched += 1;

        let document = match serde_json::from_str::<Value>(&line)
            .map_err(|err| err.to_string())
            .and_then(product_from_payload)
        {
            Ok(document) => document,
            Err(reason) => {
                tracing::warn!(id = %id, reason = %reason, "skipping malformed document");
                report.record_failure(id, Stage::Parse, reason);
                continue;
            }
        };

        let (record, diag) = normalize_with_diagnostics(&document, &context);
        report.normalized += 1;
        report.defaulted_fields += diag.defaulted.len();
        tracing::debug!(id = %id, rpc = %record.rpc, defaulted = ?diag.defaulted, "normalized");

        match sink
            .append(&record)
            .with_context(|| format!("write record {id}"))?
        {
            AppendOutcome::Written => report.written += 1,
            AppendOutcome::Duplicate => report.duplicates += 1,
        }
    }

    tracing::info!(
        normalized = report.normalized,
        written = report.written,
        failed = report.failed,
        out = %sink.path().display(),
        "normalize complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::formats::{Assets, Metadata, PriceData, Stock, UNKNOWN_BRAND};

    fn context() -> NormalizeContext {
        NormalizeContext {
            category: "vino".to_owned(),
            captured_at: 1_700_000_000,
            site: Some(Url::parse("https://alkoteka.com").unwrap()),
        }
    }

    fn full_document() -> Value {
        json!({
            "uuid": "7f1c",
            "slug": "kyanti-ruffino",
            "name": "Вино Кьянти",
            "vendor_code": 31337,
            "price": 800,
            "prev_price": 1000,
            "available": true,
            "quantity_total": 5,
            "new": true,
            "image_url": "https://alkoteka.com/storage/1.png",
            "category": { "slug": "krasnoe", "name": "Красное", "parent": { "name": "Вино" } },
            "filter_labels": [
                { "filter": "volume", "title": "0.75 л" },
                { "filter": "discounted", "title": "Скидка" },
            ],
            "price_details": [{ "title": "Хит" }],
            "text_blocks": [{ "content": "Сухое." }],
            "description_blocks": [
                { "code": "brand", "title": "Бренд", "type": "select",
                  "values": [{ "name": "Ruffino", "enabled": true }] },
                { "code": "volume", "title": "Объём", "type": "select",
                  "values": [{ "name": "0.75", "enabled": true }, { "name": "1.5", "enabled": true }] },
                { "code": "color", "title": "Цвет", "type": "select",
                  "values": [{ "name": "Красное", "enabled": true }] },
            ],
        })
    }

    #[test]
    fn empty_document_yields_fully_defaulted_record() {
        for raw in [json!({}), json!(null), json!([]), json!({ "price": null, "category": null })] {
            let (record, diag) = normalize_with_diagnostics(&raw, &context());
            assert_eq!(
                record,
                NormalizedRecord {
                    timestamp: 1_700_000_000,
                    rpc: String::new(),
                    url: String::new(),
                    title: String::new(),
                    marketing_tags: Vec::new(),
                    brand: UNKNOWN_BRAND.to_owned(),
                    section: Vec::new(),
                    price_data: PriceData {
                        current: 0.0,
                        original: 0.0,
                        sale_tag: String::new(),
                    },
                    stock: Stock {
                        in_stock: false,
                        count: 0,
                    },
                    assets: Assets::default(),
                    metadata: Metadata::default(),
                    variants: 1,
                },
                "{raw}"
            );
            assert_eq!(diag.defaulted.len(), 11);
        }
    }

    #[test]
    fn full_document_end_to_end() {
        let (record, diag) = normalize_with_diagnostics(&full_document(), &context());
        assert!(diag.defaulted.is_empty(), "{:?}", diag.defaulted);

        assert_eq!(record.rpc, "7f1c");
        assert_eq!(record.url, "https://alkoteka.com/product/krasnoe/kyanti-ruffino");
        assert_eq!(record.title, "Вино Кьянти, 0.75 л");
        assert_eq!(record.marketing_tags, vec!["New", "Хит", "Скидка"]);
        assert_eq!(record.brand, "Ruffino");
        assert_eq!(record.section, vec!["Вино", "Красное"]);
        assert_eq!(
            record.price_data,
            PriceData {
                current: 800.0,
                original: 1000.0,
                sale_tag: "Discount 20%".to_owned(),
            }
        );
        assert_eq!(
            record.stock,
            Stock {
                in_stock: true,
                count: 5,
            }
        );
        assert_eq!(record.assets.set_images, vec!["https://alkoteka.com/storage/1.png"]);
        assert_eq!(record.metadata.description, "Сухое.");
        assert_eq!(
            record.metadata.attributes.get("Part number").map(String::as_str),
            Some("31337")
        );
        assert_eq!(record.variants, 2);
    }

    #[test]
    fn normalize_is_deterministic_and_leaves_input_untouched() {
        let raw = full_document();
        let before = raw.clone();
        let a = serde_json::to_vec(&normalize(&raw, &context())).unwrap();
        let b = serde_json::to_vec(&normalize(&raw, &context())).unwrap();
        assert_eq!(a, b);
        assert_eq!(raw, before);
    }

    #[test]
    fn unavailable_products_never_report_stock() {
        let mut raw = full_document();
        raw["available"] = json!(false);
        raw["quantity_total"] = json!(12);
        let record = normalize(&raw, &context());
        assert_eq!(record.stock, Stock::default());
    }

    #[test]
    fn one_broken_field_does_not_affect_others() {
        let mut raw = full_document();
        raw["price"] = json!({ "unexpected": "shape" });
        raw["prev_price"] = json!("n/a");
        raw["description_blocks"] = json!("not a list");
        let (record, diag) = normalize_with_diagnostics(&raw, &context());
        assert_eq!(record.price_data, PriceData::default());
        assert_eq!(record.brand, UNKNOWN_BRAND);
        assert_eq!(record.variants, 1);
        assert_eq!(record.title, "Вино Кьянти, 0.75 л");
        assert_eq!(record.stock.count, 5);
        assert!(diag.defaulted.contains(&"price_data"));
        assert!(diag.defaulted.contains(&"brand"));
        assert!(!diag.defaulted.contains(&"title"));
    }

    #[test]
    fn payload_envelope_is_unwrapped() {
        let doc = product_from_payload(json!({ "success": true, "results": { "uuid": "x" } }))
            .unwrap();
        assert_eq!(doc, json!({ "uuid": "x" }));

        let bare = product_from_payload(json!({ "uuid": "y" })).unwrap();
        assert_eq!(bare, json!({ "uuid": "y" }));

        assert!(product_from_payload(json!([1, 2])).is_err());
        assert!(product_from_payload(json!({ "results": [] })).is_err());
        assert!(product_from_payload(json!({ "success": false, "results": {} })).is_err());
    }
}
