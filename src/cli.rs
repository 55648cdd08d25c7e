use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Crawl(CrawlArgs),
    Normalize(NormalizeArgs),
}

/// Unset options fall back to `--config`, then the environment, then defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct CrawlArgs {
    /// YAML config file.
    #[arg(long)]
    pub config: Option<String>,

    /// Catalog URL or category slug to crawl (repeatable).
    #[arg(long = "start")]
    pub starts: Vec<String>,

    /// Region identifier sent as `city_uuid`.
    #[arg(long)]
    pub city_uuid: Option<String>,

    /// Output file path for the JSON Lines record log.
    #[arg(long)]
    pub out: Option<String>,

    /// Proxy URL (repeatable).
    #[arg(long = "proxy")]
    pub proxies: Vec<String>,

    /// File with one proxy URL per line.
    #[arg(long)]
    pub proxy_file: Option<String>,

    /// Route requests through the proxy pool.
    #[arg(long)]
    pub use_proxy: bool,

    /// Resubmissions allowed per request after the first attempt.
    #[arg(long)]
    pub retries: Option<usize>,

    /// Maximum concurrent detail fetches.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Listing page size.
    #[arg(long)]
    pub per_page: Option<usize>,

    /// Per-request timeout.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Delay before each request (politeness).
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Product API base URL.
    #[arg(long)]
    pub api_base: Option<String>,

    /// Site base URL used for product and image links.
    #[arg(long)]
    pub site_base: Option<String>,

    /// Skip products whose RPC is already in the output file.
    #[arg(long)]
    pub dedupe: bool,
}

#[derive(Debug, Clone, Args)]
pub struct NormalizeArgs {
    /// Raw product documents, one JSON document per line.
    #[arg(long)]
    pub input: String,

    /// Output file path for the JSON Lines record log.
    #[arg(long)]
    pub out: String,

    /// Category slug used when a document carries none.
    #[arg(long, default_value = "")]
    pub category: String,

    /// Capture time in unix seconds (default: now).
    #[arg(long)]
    pub captured_at: Option<i64>,

    #[arg(long, default_value = crate::config::DEFAULT_SITE_BASE)]
    pub site_base: String,

    /// Skip products whose RPC is already in the output file.
    #[arg(long)]
    pub dedupe: bool,
}
