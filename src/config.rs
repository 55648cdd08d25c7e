use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use url::Url;

use crate::cli::CrawlArgs;
use crate::transport::DEFAULT_RETRY_STATUSES;

pub const DEFAULT_API_BASE: &str = "https://alkoteka.com/web-api/v1";
pub const DEFAULT_SITE_BASE: &str = "https://alkoteka.com";
/// Krasnodar.
pub const DEFAULT_CITY_UUID: &str = "4a70f9e0-46ae-11e7-83ff-00155d026416";
pub const DEFAULT_STARTS: &[&str] = &[
    "https://alkoteka.com/catalog/slaboalkogolnye-napitki-2",
    "https://alkoteka.com/catalog/vino",
    "https://alkoteka.com/catalog/pivo",
];
pub const DEFAULT_OUT: &str = "result.jsonl";

const ENV_CITY_UUID: &str = "ALKOTEKA_CITY_UUID";
const ENV_PROXIES: &str = "ALKOTEKA_PROXIES";

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlConfig {
    pub starts: Vec<String>,
    pub city_uuid: String,
    pub api_base: Url,
    pub site_base: Url,
    pub use_proxy: bool,
    pub proxies: Vec<String>,
    pub retries: usize,
    pub retry_statuses: Vec<u16>,
    pub concurrency: usize,
    pub per_page: usize,
    pub timeout: Duration,
    pub delay: Duration,
    pub out: PathBuf,
    pub dedupe: bool,
}

/// Shape of the `--config` YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub starts: Option<Vec<String>>,
    pub city_uuid: Option<String>,
    pub api_base: Option<String>,
    pub site_base: Option<String>,
    pub use_proxy: Option<bool>,
    pub proxies: Option<Vec<String>>,
    pub retries: Option<usize>,
    pub retry_statuses: Option<Vec<u16>>,
    pub concurrency: Option<usize>,
    pub per_page: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub delay_ms: Option<u64>,
    pub out: Option<String>,
    pub dedupe: Option<bool>,
}

#[derive(Debug, Default)]
pub struct EnvConfig {
    pub city_uuid: Option<String>,
    pub proxies: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let city_uuid = std::env::var(ENV_CITY_UUID)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());
        let proxies = std::env::var(ENV_PROXIES)
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty());
        Self { city_uuid, proxies }
    }
}

impl CrawlConfig {
    pub fn load(args: &CrawlArgs) -> anyhow::Result<Self> {
        let file = match args.config.as_deref() {
            Some(path) => read_file_config(Path::new(path))?,
            None => FileConfig::default(),
        };
        let mut extra_proxies = Vec::new();
        if let Some(path) = args.proxy_file.as_deref() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("read proxy file: {path}"))?;
            extra_proxies = parse_proxy_list(&contents);
        }
        Self::merge(args, file, EnvConfig::from_env(), extra_proxies)
    }

    /// Precedence: CLI > file > environment > defaults.
    pub fn merge(
        args: &CrawlArgs,
        file: FileConfig,
        env: EnvConfig,
        extra_proxies: Vec<String>,
    ) -> anyhow::Result<Self> {
        let starts = non_empty(args.starts.clone())
            .or(file.starts)
            .unwrap_or_else(|| DEFAULT_STARTS.iter().map(|s| (*s).to_owned()).collect());
        if starts.iter().all(|s| s.trim().is_empty()) {
            anyhow::bail!("at least one start URL or slug is required");
        }

        let city_uuid = args
            .city_uuid
            .clone()
            .or(file.city_uuid)
            .or(env.city_uuid)
            .unwrap_or_else(|| DEFAULT_CITY_UUID.to_owned());
        uuid::Uuid::parse_str(city_uuid.trim())
            .with_context(|| format!("city uuid is not a valid UUID: {city_uuid:?}"))?;

        let api_base = args
            .api_base
            .clone()
            .or(file.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_owned());
        let api_base = Url::parse(&api_base).with_context(|| format!("parse api base: {api_base}"))?;
        let site_base = args
            .site_base
            .clone()
            .or(file.site_base)
            .unwrap_or_else(|| DEFAULT_SITE_BASE.to_owned());
        let site_base =
            Url::parse(&site_base).with_context(|| format!("parse site base: {site_base}"))?;
        for (name, url) in [("api base", &api_base), ("site base", &site_base)] {
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!("{name} must be http/https: {url}");
            }
        }

        let mut proxies = non_empty(args.proxies.clone())
            .or(file.proxies)
            .or(env.proxies)
            .unwrap_or_default();
        for proxy in extra_proxies {
            if !proxies.contains(&proxy) {
                proxies.push(proxy);
            }
        }
        let use_proxy = args.use_proxy || file.use_proxy.unwrap_or(false);
        if use_proxy && proxies.is_empty() {
            anyhow::bail!("proxy mode is enabled but no proxies were configured");
        }
        if !use_proxy && !proxies.is_empty() {
            tracing::warn!(
                proxies = proxies.len(),
                "proxies configured without --use-proxy; requests go direct"
            );
        }

        let concurrency = args.concurrency.or(file.concurrency).unwrap_or(4).max(1);
        let per_page = args.per_page.or(file.per_page).unwrap_or(100).max(1);
        let timeout_secs = args.timeout_secs.or(file.timeout_secs).unwrap_or(30).max(1);
        let delay_ms = args.delay_ms.or(file.delay_ms).unwrap_or(1000);

        Ok(Self {
            starts,
            city_uuid: city_uuid.trim().to_owned(),
            api_base,
            site_base,
            use_proxy,
            proxies,
            retries: args.retries.or(file.retries).unwrap_or(3),
            retry_statuses: file
                .retry_statuses
                .unwrap_or_else(|| DEFAULT_RETRY_STATUSES.to_vec()),
            concurrency,
            per_page,
            timeout: Duration::from_secs(timeout_secs),
            delay: Duration::from_millis(delay_ms),
            out: PathBuf::from(
                args.out
                    .clone()
                    .or(file.out)
                    .unwrap_or_else(|| DEFAULT_OUT.to_owned()),
            ),
            dedupe: args.dedupe || file.dedupe.unwrap_or(false),
        })
    }
}

fn read_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let config: FileConfig =
        serde_yaml::from_str(&yaml).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(config)
}

/// One proxy per line; blank lines and `#` comments are ignored.
pub fn parse_proxy_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

fn non_empty(list: Vec<String>) -> Option<Vec<String>> {
    if list.is_empty() { None } else { Some(list) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(args: &CrawlArgs, file: FileConfig) -> anyhow::Result<CrawlConfig> {
        CrawlConfig::merge(args, file, EnvConfig::default(), Vec::new())
    }

    #[test]
    fn defaults_cover_three_catalog_categories() {
        let config = merge(&CrawlArgs::default(), FileConfig::default()).unwrap();
        assert_eq!(config.starts.len(), 3);
        assert_eq!(config.city_uuid, DEFAULT_CITY_UUID);
        assert_eq!(config.api_base.as_str(), "https://alkoteka.com/web-api/v1");
        assert_eq!(config.retries, 3);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.delay, Duration::from_millis(1000));
        assert_eq!(config.out, PathBuf::from(DEFAULT_OUT));
        assert!(config.retry_statuses.contains(&429));
        assert!(!config.use_proxy);
        assert!(!config.dedupe);
    }

    #[test]
    fn cli_overrides_file_overrides_env() {
        let file: FileConfig = serde_yaml::from_str(
            r#"
starts: [vino]
retries: 5
concurrency: 2
city_uuid: 00000000-0000-0000-0000-000000000001
proxies: ["http://file-proxy:8080"]
"#,
        )
        .unwrap();
        let env = EnvConfig {
            city_uuid: Some("00000000-0000-0000-0000-000000000002".to_owned()),
            proxies: Some(vec!["http://env-proxy:8080".to_owned()]),
        };
        let args = CrawlArgs {
            retries: Some(1),
            use_proxy: true,
            ..CrawlArgs::default()
        };

        let config = CrawlConfig::merge(&args, file, env, Vec::new()).unwrap();
        assert_eq!(config.starts, vec!["vino"]);
        assert_eq!(config.retries, 1);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.city_uuid, "00000000-0000-0000-0000-000000000001");
        assert_eq!(config.proxies, vec!["http://file-proxy:8080"]);
    }

    #[test]
    fn env_fills_gaps() {
        let env = EnvConfig {
            city_uuid: Some("00000000-0000-0000-0000-000000000002".to_owned()),
            proxies: Some(vec!["http://env-proxy:8080".to_owned()]),
        };
        let config = CrawlConfig::merge(
            &CrawlArgs::default(),
            FileConfig::default(),
            env,
            vec!["http://file:1".to_owned()],
        )
        .unwrap();
        assert_eq!(config.city_uuid, "00000000-0000-0000-0000-000000000002");
        assert_eq!(config.proxies, vec!["http://env-proxy:8080", "http://file:1"]);
    }

    #[test]
    fn proxy_mode_requires_proxies() {
        let args = CrawlArgs {
            use_proxy: true,
            ..CrawlArgs::default()
        };
        let err = merge(&args, FileConfig::default()).unwrap_err().to_string();
        assert!(err.contains("no proxies"), "{err}");
    }

    #[test]
    fn rejects_invalid_city_uuid() {
        let args = CrawlArgs {
            city_uuid: Some("krasnodar".to_owned()),
            ..CrawlArgs::default()
        };
        assert!(merge(&args, FileConfig::default()).is_err());
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(serde_yaml::from_str::<FileConfig>("concurency: 3").is_err());
    }

    #[test]
    fn proxy_list_skips_comments() {
        let list = parse_proxy_list("# pool\nhttp://a:1\n\n  http://b:2  # backup\n");
        assert_eq!(list, vec!["http://a:1", "http://b:2"]);
    }
}
