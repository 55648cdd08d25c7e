//! Field extractors. Each rule reads one semantic value out of a raw product
//! document and never fails: absent or unparseable source data resolves to
//! the field's documented default, tagged as [`Extracted::Defaulted`].

use std::collections::BTreeMap;

use serde_json::Value;
use url::Url;

use crate::document::{flag, integer, items, lookup, number, scalar_text, text};
use crate::formats::{Assets, Metadata, PriceData, Stock, UNKNOWN_BRAND};

pub const PART_NUMBER_KEY: &str = "Part number";

#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    Found(T),
    Defaulted(T),
}

impl<T> Extracted<T> {
    fn found_if(found: bool, value: T) -> Self {
        if found {
            Self::Found(value)
        } else {
            Self::Defaulted(value)
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Self::Defaulted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Found(value) | Self::Defaulted(value) => value,
        }
    }
}

pub fn rpc(doc: &Value) -> Extracted<String> {
    match scalar_text(doc, &["uuid"]).or_else(|| scalar_text(doc, &["vendor_code"])) {
        Some(id) => Extracted::Found(id),
        None => Extracted::Defaulted(String::new()),
    }
}

/// `product_url` when present, else `{site}/product/{category}/{slug}`.
pub fn product_url(doc: &Value, site: Option<&Url>, category: &str) -> Extracted<String> {
    if let Some(raw) = text(doc, &["product_url"]) {
        let resolved = match site {
            Some(site) => site.join(raw).map(String::from).unwrap_or_else(|_| raw.to_owned()),
            None => raw.to_owned(),
        };
        return Extracted::Found(resolved);
    }

    let (Some(site), Some(slug)) = (site, text(doc, &["slug"])) else {
        return Extracted::Defaulted(String::new());
    };
    let category = text(doc, &["category", "slug"]).unwrap_or(category).trim();
    let path = if category.is_empty() {
        format!("product/{slug}")
    } else {
        format!("product/{category}/{slug}")
    };
    match site.join(&path) {
        Ok(url) => Extracted::Found(url.into()),
        Err(err) => {
            tracing::debug!(%site, path = %path, ?err, "cannot build product url");
            Extracted::Defaulted(String::new())
        }
    }
}

pub fn title(doc: &Value) -> Extracted<String> {
    let base = text(doc, &["name"])
        .or_else(|| text(doc, &["subname"]))
        .unwrap_or_default();

    let mut color = None;
    let mut volume = None;
    for label in items(doc, &["filter_labels"]) {
        let Some(label_title) = text(label, &["title"]) else {
            continue;
        };
        match text(label, &["filter"]) {
            Some("color") => color = Some(label_title),
            Some("volume") => volume = Some(label_title),
            _ => {}
        }
    }

    let mut parts = Vec::new();
    if !base.is_empty() {
        parts.push(base);
    }
    for extra in [color, volume].into_iter().flatten() {
        if !base.contains(extra) {
            parts.push(extra);
        }
    }

    let title = parts.join(", ");
    Extracted::found_if(!title.is_empty(), title)
}

pub fn marketing_tags(doc: &Value) -> Extracted<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: &str| {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_owned());
        }
    };

    if flag(doc, &["new"]) {
        push("New");
    }
    if flag(doc, &["gift_package"]) {
        push("Gift");
    }
    for detail in items(doc, &["price_details"]) {
        if let Some(t) = text(detail, &["title"]) {
            push(t);
        }
    }
    for label in items(doc, &["filter_labels"]) {
        if text(label, &["filter"]) == Some("discounted")
            && let Some(t) = text(label, &["title"])
        {
            push(t);
        }
    }

    Extracted::found_if(!tags.is_empty(), tags)
}

pub fn brand(doc: &Value) -> Extracted<String> {
    let name = items(doc, &["description_blocks"])
        .find(|block| text(block, &["code"]) == Some("brand"))
        .and_then(|block| lookup(block, &["values"])?.as_array()?.first())
        .and_then(|value| text(value, &["name"]));
    match name {
        Some(name) => Extracted::Found(name.to_owned()),
        None => Extracted::Defaulted(UNKNOWN_BRAND.to_owned()),
    }
}

/// Category path from root to leaf. Absent levels are omitted.
pub fn section(doc: &Value) -> Extracted<Vec<String>> {
    let path: Vec<String> = [
        text(doc, &["category", "parent", "name"]),
        text(doc, &["category", "name"]),
    ]
    .into_iter()
    .flatten()
    .map(str::to_owned)
    .collect();
    Extracted::found_if(!path.is_empty(), path)
}

/// `price` and `prev_price` resolve independently; a missing `prev_price`
/// falls back to the current price.
pub fn price(doc: &Value) -> Extracted<PriceData> {
    let current = number(doc, &["price"]).filter(|p| *p >= 0.0);
    let previous = number(doc, &["prev_price"]).filter(|p| *p >= 0.0);
    let found = current.is_some() || previous.is_some();

    let current = current.unwrap_or(0.0);
    let original = previous.unwrap_or(current);
    Extracted::found_if(
        found,
        PriceData {
            current,
            original,
            sale_tag: sale_tag(current, original),
        },
    )
}

/// `"Discount {pct}%"` when `original > current`, else empty. Halves round
/// to even.
pub fn sale_tag(current: f64, original: f64) -> String {
    if original <= current || original <= 0.0 {
        return String::new();
    }
    let pct = ((1.0 - current / original) * 100.0).round_ties_even() as i64;
    format!("Discount {pct}%")
}

pub fn stock(doc: &Value) -> Extracted<Stock> {
    if lookup(doc, &["available"]).is_none() {
        return Extracted::Defaulted(Stock::default());
    }
    let in_stock = flag(doc, &["available"]);
    let count = if in_stock {
        integer(doc, &["quantity_total"])
            .map(|q| q.max(0) as u64)
            .unwrap_or(0)
    } else {
        0
    };
    Extracted::Found(Stock { in_stock, count })
}

pub fn assets(doc: &Value, site: Option<&Url>) -> Extracted<Assets> {
    let Some(raw) = text(doc, &["image_url"]) else {
        return Extracted::Defaulted(Assets::default());
    };
    let main_image = match site {
        Some(site) => site.join(raw).map(String::from).unwrap_or_else(|_| raw.to_owned()),
        None => raw.to_owned(),
    };
    Extracted::Found(Assets {
        set_images: vec![main_image.clone()],
        main_image,
        view360: Vec::new(),
        video: Vec::new(),
    })
}

pub fn metadata(doc: &Value) -> Extracted<Metadata> {
    let description = items(doc, &["text_blocks"])
        .filter_map(|block| text(block, &["content"]))
        .collect::<Vec<_>>()
        .join(" ");

    let mut attributes = BTreeMap::new();
    for block in items(doc, &["description_blocks"]) {
        let Some(key) = text(block, &["title"]) else {
            continue;
        };
        let value = match text(block, &["type"]) {
            Some("select") => select_value(block),
            Some("range") => range_value(block),
            _ => None,
        };
        if let Some(value) = value {
            attributes.insert(key.to_owned(), value);
        }
    }
    if let Some(part_number) = scalar_text(doc, &["vendor_code"]) {
        attributes.insert(PART_NUMBER_KEY.to_owned(), part_number);
    }

    let found = !description.is_empty() || !attributes.is_empty();
    Extracted::found_if(
        found,
        Metadata {
            description,
            attributes,
        },
    )
}

fn select_value(block: &Value) -> Option<String> {
    let names: Vec<&str> = items(block, &["values"])
        .filter(|value| flag(value, &["enabled"]))
        .filter_map(|value| text(value, &["name"]))
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

fn range_value(block: &Value) -> Option<String> {
    let min = bound_text(block, "min")?;
    let max = bound_text(block, "max")?;
    let unit = text(block, &["unit"]).unwrap_or_default();
    if min == max {
        Some(format!("{min}{unit}"))
    } else {
        Some(format!("{min}-{max}{unit}"))
    }
}

fn bound_text(block: &Value, key: &str) -> Option<String> {
    match lookup(block, &[key])? {
        Value::Number(_) => number(block, &[key]).map(|n| n.to_string()),
        Value::String(_) => text(block, &[key]).map(str::to_owned),
        _ => None,
    }
}

/// Product of enabled color and volume options, each factor at least 1.
pub fn variants(doc: &Value) -> Extracted<u32> {
    let color = enabled_options(doc, "color");
    let volume = enabled_options(doc, "volume");
    let found = color.is_some() || volume.is_some();
    let count = color.unwrap_or(1).max(1).saturating_mul(volume.unwrap_or(1).max(1));
    Extracted::found_if(found, count)
}

fn enabled_options(doc: &Value, code: &str) -> Option<u32> {
    let block = items(doc, &["description_blocks"]).find(|block| {
        text(block, &["code"]) == Some(code) && text(block, &["type"]) == Some("select")
    })?;
    let enabled = items(block, &["values"])
        .filter(|value| flag(value, &["enabled"]))
        .count();
    u32::try_from(enabled).ok().filter(|n| *n > 0)
}
