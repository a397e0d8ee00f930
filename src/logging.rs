use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_DIRECTIVES: &str = "info,tower_http=info";

/// `--verbose` wins over `RUST_LOG`, which wins over the default.
pub fn build_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    rust_log
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Installs the global subscriber. Fails if one is already set.
pub fn init_logging(verbose: bool) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::registry()
        .with(build_filter(verbose, rust_log.as_deref()))
        .with(fmt::layer().with_target(verbose))
        .try_init()
        .map_err(|err| anyhow!("initializing logging: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_forces_debug() {
        assert_eq!(build_filter(true, Some("warn")).to_string(), "debug");
    }

    #[test]
    fn rust_log_overrides_default() {
        assert_eq!(
            build_filter(false, Some("videomax=trace")).to_string(),
            "videomax=trace"
        );
        assert_eq!(
            build_filter(false, Some("  ")).to_string(),
            build_filter(false, None).to_string()
        );
    }
}
