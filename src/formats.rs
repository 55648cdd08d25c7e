use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_BRAND: &str = "unknown";

/// One product, as written to the output log. Field order is the on-disk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub timestamp: i64,
    #[serde(rename = "RPC")]
    pub rpc: String,
    pub url: String,
    pub title: String,
    pub marketing_tags: Vec<String>,
    pub brand: String,
    pub section: Vec<String>,
    pub price_data: PriceData,
    pub stock: Stock,
    pub assets: Assets,
    pub metadata: Metadata,
    pub variants: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub current: f64,
    pub original: f64,
    pub sale_tag: String,
}

impl Default for PriceData {
    fn default() -> Self {
        Self {
            current: 0.0,
            original: 0.0,
            sale_tag: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub in_stock: bool,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assets {
    pub main_image: String,
    pub set_images: Vec<String>,
    pub view360: Vec<String>,
    pub video: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub description: String,
    pub attributes: BTreeMap<String, String>,
}

/// Outcome of one `crawl` or `normalize` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub fetched: usize,
    pub normalized: usize,
    pub written: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub defaulted_fields: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Category,
    Listing,
    Detail,
    Parse,
}

impl RunReport {
    pub fn record_failure(&mut self, id: impl Into<String>, stage: Stage, reason: String) {
        self.failed += 1;
        self.failures.push(FailureRecord {
            id: id.into(),
            stage,
            reason,
        });
    }
}
