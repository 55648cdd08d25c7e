use std::io::IsTerminal as _;

use anyhow::Context as _;

/// Crate logs at info, dependencies (reqwest, hyper) only at warn.
pub const DEFAULT_DIRECTIVE: &str = "warn,alkoteka=info";

/// Installs the stderr subscriber. `RUST_LOG` wins over `default_directive`.
/// Colors are only used when stderr is a terminal so redirected logs stay clean.
pub fn init(default_directive: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_directive))
        .with_context(|| format!("build log filter from {default_directive:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
