//! Three-stage fetch pipeline: category resolution, listing, product detail.
//!
//! Each stage has a typed output that feeds the next. Detail fetches for one
//! listing run on a bounded worker pool; each completed document is
//! normalized inline and appended to the sink. A failed product is reported
//! and skipped, a failed sink write stops the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cli::CrawlArgs;
use crate::config::CrawlConfig;
use crate::document::{items, text};
use crate::error::{ItemError, TransportError};
use crate::formats::{RunReport, Stage};
use crate::normalize::{NormalizeContext, normalize_with_diagnostics, product_from_payload};
use crate::sink::{AppendOutcome, JsonlSink, RecordSink};
use crate::transport::{
    FetchRequest, FetchResponse, HttpTransport, ProxyPool, RetryPolicy, Transport, TransportHint,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRef {
    pub slug: String,
    /// The configured start point this category came from.
    pub start: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRef {
    pub slug: String,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub category: CategoryRef,
    pub products: Vec<ProductRef>,
}

#[derive(Debug, Clone)]
pub struct RawProduct {
    pub product: ProductRef,
    pub document: Value,
}

/// Stage (a). Accepts a catalog URL (`https://alkoteka.com/catalog/vino`)
/// or a bare slug (`vino`).
pub fn resolve_category(start: &str) -> anyhow::Result<CategoryRef> {
    let trimmed = start.trim();
    if trimmed.is_empty() {
        anyhow::bail!("start point is empty");
    }

    let slug = if trimmed.contains("://") {
        let url = Url::parse(trimmed).with_context(|| format!("parse start url: {trimmed}"))?;
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("start url has no category segment: {trimmed}"))?
    } else {
        trimmed.trim_matches('/').to_owned()
    };

    if slug.is_empty() || slug.contains('/') {
        anyhow::bail!("not a category slug: {trimmed}");
    }
    Ok(CategoryRef {
        slug,
        start: trimmed.to_owned(),
    })
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: Url,
    pub city_uuid: String,
    pub per_page: usize,
}

impl Endpoints {
    pub fn listing_url(&self, category: &str) -> anyhow::Result<Url> {
        let mut url = self.product_url(&[])?;
        url.query_pairs_mut()
            .append_pair("city_uuid", &self.city_uuid)
            .append_pair("page", "1")
            .append_pair("per_page", &self.per_page.to_string())
            .append_pair("root_category_slug", category);
        Ok(url)
    }

    pub fn detail_url(&self, slug: &str) -> anyhow::Result<Url> {
        let mut url = self.product_url(&[slug])?;
        url.query_pairs_mut().append_pair("city_uuid", &self.city_uuid);
        Ok(url)
    }

    fn product_url(&self, extra: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.api_base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("api base cannot be a base url: {}", self.api_base))?
            .pop_if_empty()
            .push("product")
            .extend(extra);
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub policy: RetryPolicy,
    pub timeout: Duration,
    pub delay: Duration,
    pub concurrency: usize,
    pub site: Option<Url>,
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    transport: Arc<dyn Transport>,
    proxies: Option<Arc<ProxyPool>>,
    endpoints: Endpoints,
    options: OrchestratorOptions,
}

impl FetchOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        proxies: Option<Arc<ProxyPool>>,
        endpoints: Endpoints,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            transport,
            proxies,
            endpoints,
            options,
        }
    }

    /// Stage (b).
    pub async fn fetch_listing(&self, category: &CategoryRef) -> Result<Listing, ItemError> {
        let url = self
            .endpoints
            .listing_url(&category.slug)
            .map_err(|err| ItemError::Malformed {
                url: category.start.clone(),
                reason: format!("{err:#}"),
            })?;
        let payload = self.fetch_json(&url).await?;

        if payload.get("success") == Some(&Value::Bool(false)) {
            return Err(malformed(&url, "upstream reported success=false"));
        }
        let Some(results) = payload.get("results").and_then(Value::as_array) else {
            return Err(malformed(&url, "listing has no `results` array"));
        };

        let mut products = Vec::with_capacity(results.len());
        for entry in items(&payload, &["results"]) {
            match text(entry, &["slug"]) {
                Some(slug) => products.push(ProductRef {
                    slug: slug.to_owned(),
                    category: category.slug.clone(),
                }),
                None => tracing::debug!(category = %category.slug, "listing entry without slug"),
            }
        }
        tracing::debug!(
            category = %category.slug,
            entries = results.len(),
            products = products.len(),
            "parsed listing"
        );

        Ok(Listing {
            category: category.clone(),
            products,
        })
    }

    /// Stage (c).
    pub async fn fetch_detail(&self, product: &ProductRef) -> Result<RawProduct, ItemError> {
        let url = self
            .endpoints
            .detail_url(&product.slug)
            .map_err(|err| ItemError::Malformed {
                url: product.slug.clone(),
                reason: format!("{err:#}"),
            })?;
        let payload = self.fetch_json(&url).await?;
        let document = product_from_payload(payload).map_err(|reason| malformed(&url, &reason))?;
        Ok(RawProduct {
            product: product.clone(),
            document,
        })
    }

    async fn fetch_json(&self, url: &Url) -> Result<Value, ItemError> {
        let response = self.fetch_with_retry(url).await?;
        serde_json::from_slice(&response.body)
            .map_err(|err| malformed(url, &format!("invalid JSON: {err}")))
    }

    /// Resubmits on timeouts, connection errors, and retryable statuses up to
    /// the policy bound. Blocked responses drop the current hint from the pool.
    async fn fetch_with_retry(&self, url: &Url) -> Result<FetchResponse, ItemError> {
        let attempts = self.options.policy.attempts();
        let mut hint = self.proxies.as_ref().and_then(|pool| pool.pick());
        let mut attempt = 0;

        loop {
            attempt += 1;
            if !self.options.delay.is_zero() {
                tokio::time::sleep(self.options.delay).await;
            }

            let request = FetchRequest {
                url: url.clone(),
                hint: hint.clone(),
            };
            let outcome =
                match tokio::time::timeout(self.options.timeout, self.transport.fetch(&request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransportError::Timeout(self.options.timeout)),
                };

            let (failure, blocked) = match outcome {
                Ok(response) if (200..300).contains(&response.status) => return Ok(response),
                Ok(response) if self.options.policy.is_blocked(response.status) => (
                    ItemError::Blocked {
                        url: url.to_string(),
                        status: response.status,
                        attempts: attempt,
                    },
                    true,
                ),
                Ok(response) => {
                    let failure = ItemError::Status {
                        url: url.to_string(),
                        status: response.status,
                        attempts: attempt,
                    };
                    if !self.options.policy.is_retryable(response.status) {
                        return Err(failure);
                    }
                    (failure, false)
                }
                Err(source) => (
                    ItemError::Transport {
                        url: url.to_string(),
                        attempts: attempt,
                        source,
                    },
                    false,
                ),
            };

            if attempt >= attempts {
                return Err(failure);
            }
            tracing::warn!(
                url = %url,
                attempt,
                attempts,
                proxy = hint.as_ref().map(TransportHint::as_str).unwrap_or("direct"),
                error = %failure,
                "request failed; retrying"
            );
            hint = self.next_hint(hint, blocked);
        }
    }

    fn next_hint(&self, current: Option<TransportHint>, blocked: bool) -> Option<TransportHint> {
        let pool = self.proxies.as_ref()?;
        if blocked && let Some(bad) = current.as_ref() {
            let remaining = pool.mark_bad(bad);
            tracing::warn!(proxy = %bad, remaining, "dropping blocked proxy");
        }
        let next = pool.pick();
        if next.is_none() {
            tracing::warn!("proxy pool exhausted; falling back to direct connection");
        }
        next
    }

    /// Runs all three stages for every start point. Stops issuing new
    /// fetches once `cancel` fires; in-flight fetches are allowed to finish.
    pub async fn crawl(
        &self,
        starts: &[String],
        sink: Arc<dyn RecordSink>,
        cancel: CancellationToken,
    ) -> anyhow::Result<RunReport> {
        let mut report = RunReport::default();

        for start in starts {
            if cancel.is_cancelled() {
                tracing::info!("stop requested; skipping remaining start points");
                break;
            }

            let category = match resolve_category(start) {
                Ok(category) => category,
                Err(err) => {
                    tracing::warn!(start = %start, ?err, "cannot resolve category");
                    report.record_failure(start.clone(), Stage::Category, format!("{err:#}"));
                    continue;
                }
            };

            let listing = match self.fetch_listing(&category).await {
                Ok(listing) => listing,
                Err(err) => {
                    tracing::warn!(category = %category.slug, error = %err, "listing failed");
                    report.record_failure(category.slug.clone(), Stage::Listing, err.to_string());
                    continue;
                }
            };
            tracing::info!(
                category = %category.slug,
                products = listing.products.len(),
                "fetched listing"
            );

            self.process_listing(listing, sink.as_ref(), &cancel, &mut report)
                .await
                .with_context(|| format!("process category {}", category.slug))?;
        }

        Ok(report)
    }

    async fn process_listing(
        &self,
        listing: Listing,
        sink: &dyn RecordSink,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> anyhow::Result<()> {
        let concurrency = self.options.concurrency.max(1);
        let total = listing.products.len();
        let mut pending = listing.products.into_iter();
        let mut join_set = JoinSet::new();
        let mut done = 0_usize;

        loop {
            while join_set.len() < concurrency && !cancel.is_cancelled() {
                let Some(product) = pending.next() else {
                    break;
                };
                let this = self.clone();
                join_set.spawn(async move {
                    let result = this.fetch_detail(&product).await;
                    (product, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (product, result) = joined.context("join detail fetch task")?;
            done += 1;

            let raw = match result {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(product = %product.slug, error = %err, "product failed");
                    report.record_failure(product.slug, Stage::Detail, err.to_string());
                    continue;
                }
            };
            report.fetched += 1;

            let context = NormalizeContext {
                category: raw.product.category.clone(),
                captured_at: chrono::Utc::now().timestamp(),
                site: self.options.site.clone(),
            };
            let (record, diag) = normalize_with_diagnostics(&raw.document, &context);
            report.normalized += 1;
            report.defaulted_fields += diag.defaulted.len();
            if !diag.defaulted.is_empty() {
                tracing::debug!(product = %raw.product.slug, defaulted = ?diag.defaulted, "fields defaulted");
            }

            match sink
                .append(&record)
                .with_context(|| format!("write record for {}", raw.product.slug))?
            {
                AppendOutcome::Written => report.written += 1,
                AppendOutcome::Duplicate => {
                    tracing::debug!(product = %raw.product.slug, rpc = %record.rpc, "duplicate skipped");
                    report.duplicates += 1;
                }
            }

            if done % 50 == 0 {
                tracing::info!(category = %listing.category.slug, done, total, "progress");
            }
        }

        let skipped = pending.len();
        if skipped > 0 {
            tracing::info!(
                category = %listing.category.slug,
                skipped,
                "stop requested; remaining products not fetched"
            );
        }
        Ok(())
    }
}

fn malformed(url: &Url, reason: &str) -> ItemError {
    ItemError::Malformed {
        url: url.to_string(),
        reason: reason.to_owned(),
    }
}

/// `crawl` subcommand.
pub async fn run(args: CrawlArgs) -> anyhow::Result<RunReport> {
    let config = CrawlConfig::load(&args).context("load crawl config")?;
    tracing::info!(
        starts = config.starts.len(),
        out = %config.out.display(),
        concurrency = config.concurrency,
        retries = config.retries,
        use_proxy = config.use_proxy,
        "crawl"
    );

    let sink: Arc<dyn RecordSink> =
        Arc::new(JsonlSink::open(&config.out, config.dedupe).context("open record log")?);
    let proxies = config
        .use_proxy
        .then(|| Arc::new(ProxyPool::new(config.proxies.iter().cloned())));
    let orchestrator = FetchOrchestrator::new(
        Arc::new(HttpTransport::new(config.timeout)),
        proxies,
        Endpoints {
            api_base: config.api_base.clone(),
            city_uuid: config.city_uuid.clone(),
            per_page: config.per_page,
        },
        OrchestratorOptions {
            policy: RetryPolicy {
                retries: config.retries,
                statuses: config.retry_statuses.clone(),
            },
            timeout: config.timeout,
            delay: config.delay,
            concurrency: config.concurrency,
            site: Some(config.site_base.clone()),
        },
    );

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("stop requested; finishing in-flight requests");
            stop.cancel();
        }
    });

    let report = orchestrator.crawl(&config.starts, sink, cancel).await?;
    tracing::info!(
        fetched = report.fetched,
        normalized = report.normalized,
        written = report.written,
        duplicates = report.duplicates,
        failed = report.failed,
        "crawl complete"
    );
    Ok(report)
}
