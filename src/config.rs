use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::downloads::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_QUEUED};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_WWW_ROOT: &str = "www";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_PIPED_API: &str = "https://pipedapi.kavin.rocks";
pub const DEFAULT_COBALT_MIRRORS: [&str; 3] = [
    "https://api.cobalt.tools",
    "https://cobalt-api.kwiatekmiki.com",
    "https://cobalt.canine.tools",
];
/// Value that switches off an optional provider.
const DISABLED: &str = "off";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub port: u16,
    pub host: String,
    pub download_dir: PathBuf,
    pub www_root: PathBuf,
    pub cookies_file: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    pub ytdlp_bin: PathBuf,
    pub max_concurrent_downloads: usize,
    pub max_queued_downloads: usize,
    pub piped_api: Option<String>,
    pub cobalt_mirrors: Vec<String>,
}

/// Values taken from the command line; each one beats the environment.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub ffmpeg_location: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub max_concurrent_downloads: Option<usize>,
    pub max_queued_downloads: Option<usize>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_runtime_config_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeConfig {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let path_or = |value: Option<PathBuf>, key: &str, default: &str| {
        value
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| lookup(key).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };

    let port = overrides
        .port
        .or_else(|| parse_value(lookup("PORT")))
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("VIDEOMAX_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let download_dir = path_or(
        overrides.download_dir,
        "VIDEOMAX_DOWNLOAD_DIR",
        DEFAULT_DOWNLOAD_DIR,
    );
    let www_root = path_or(overrides.www_root, "VIDEOMAX_WWW_ROOT", DEFAULT_WWW_ROOT);
    let cookies_file = path_or(
        overrides.cookies_file,
        "VIDEOMAX_COOKIES_FILE",
        DEFAULT_COOKIES_FILE,
    );
    let ytdlp_bin = path_or(overrides.ytdlp_bin, "YTDLP_BIN", DEFAULT_YTDLP_BIN);
    let ffmpeg_location = overrides
        .ffmpeg_location
        .or_else(|| lookup("FFMPEG_LOCATION").map(PathBuf::from));
    let max_concurrent_downloads = overrides
        .max_concurrent_downloads
        .or_else(|| parse_value(lookup("VIDEOMAX_MAX_DOWNLOADS")))
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_CONCURRENT);
    let max_queued_downloads = overrides
        .max_queued_downloads
        .or_else(|| parse_value(lookup("VIDEOMAX_MAX_QUEUED")))
        .unwrap_or(DEFAULT_MAX_QUEUED);

    let piped_api = match lookup("VIDEOMAX_PIPED_API") {
        Some(value) if value.eq_ignore_ascii_case(DISABLED) => None,
        Some(value) => Some(value),
        None => Some(DEFAULT_PIPED_API.to_string()),
    };
    let cobalt_mirrors = match lookup("VIDEOMAX_COBALT_MIRRORS") {
        Some(value) if value.eq_ignore_ascii_case(DISABLED) => Vec::new(),
        Some(value) => split_list(&value),
        None => DEFAULT_COBALT_MIRRORS.iter().map(|m| m.to_string()).collect(),
    };

    RuntimeConfig {
        port,
        host,
        download_dir,
        www_root,
        cookies_file,
        ffmpeg_location,
        ytdlp_bin,
        max_concurrent_downloads,
        max_queued_downloads,
        piped_api,
        cobalt_mirrors,
    }
}

fn parse_value<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|value| value.parse::<T>().ok())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None)
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let config = build_runtime_config(&HashMap::new(), |_| None);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.download_dir, PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        assert_eq!(config.www_root, PathBuf::from("www"));
        assert_eq!(config.cookies_file, PathBuf::from(DEFAULT_COOKIES_FILE));
        assert_eq!(config.ytdlp_bin, PathBuf::from(DEFAULT_YTDLP_BIN));
        assert_eq!(config.ffmpeg_location, None);
        assert_eq!(config.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.max_queued_downloads, DEFAULT_MAX_QUEUED);
        assert_eq!(config.piped_api.as_deref(), Some(DEFAULT_PIPED_API));
        assert_eq!(config.cobalt_mirrors.len(), DEFAULT_COBALT_MIRRORS.len());
    }

    #[test]
    fn env_file_values_are_read() {
        let config = config_from(
            "PORT=\"4242\"\nVIDEOMAX_DOWNLOAD_DIR=/srv/dl\nFFMPEG_LOCATION='/opt/ffmpeg/bin'\nVIDEOMAX_MAX_DOWNLOADS=2\n",
        );
        assert_eq!(config.port, 4242);
        assert_eq!(config.download_dir, PathBuf::from("/srv/dl"));
        assert_eq!(
            config.ffmpeg_location,
            Some(PathBuf::from("/opt/ffmpeg/bin"))
        );
        assert_eq!(config.max_concurrent_downloads, 2);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from("PORT=\"nope\"\nVIDEOMAX_MAX_DOWNLOADS=0\nVIDEOMAX_MAX_QUEUED=-3\n");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.max_queued_downloads, DEFAULT_MAX_QUEUED);
    }

    #[test]
    fn provider_lists_can_be_replaced_or_disabled() {
        let config = config_from(
            "VIDEOMAX_COBALT_MIRRORS=\" https://a.example , ,https://b.example\"\nVIDEOMAX_PIPED_API=off\n",
        );
        assert_eq!(
            config.cobalt_mirrors,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.piped_api, None);

        let config = config_from("VIDEOMAX_COBALT_MIRRORS=OFF\n");
        assert!(config.cobalt_mirrors.is_empty());
    }

    #[test]
    fn env_beats_file_and_blank_values_are_ignored() {
        let vars = read_env_file(
            make_config("VIDEOMAX_HOST=\"file-host\"\nYTDLP_BIN=\"/file/yt-dlp\"\nPORT=\"   \"\n")
                .path(),
        )
        .unwrap();
        let config = build_runtime_config(&vars, |key| {
            if key == "VIDEOMAX_HOST" {
                Some("env-host".to_string())
            } else {
                None
            }
        });
        assert_eq!(config.host, "env-host");
        assert_eq!(config.ytdlp_bin, PathBuf::from("/file/yt-dlp"));
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn overrides_beat_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("PORT".to_string(), "7000".to_string());
        vars.insert("VIDEOMAX_WWW_ROOT".to_string(), "/file-www".to_string());
        vars.insert("VIDEOMAX_HOST".to_string(), "file-host".to_string());
        vars.insert("VIDEOMAX_DOWNLOAD_DIR".to_string(), "/file-dl".to_string());

        let overrides = RuntimeOverrides {
            port: Some(9000),
            host: Some("  ".into()),
            download_dir: Some(PathBuf::from("/cli-dl")),
            max_queued_downloads: Some(0),
            ..RuntimeOverrides::default()
        };

        let config = build_runtime_config_with_overrides(
            &vars,
            |key| match key {
                "PORT" => Some("8000".to_string()),
                "VIDEOMAX_WWW_ROOT" => Some("/env-www".to_string()),
                _ => None,
            },
            overrides,
        );

        assert_eq!(config.port, 9000);
        assert_eq!(config.www_root, PathBuf::from("/env-www"));
        assert_eq!(config.host, "file-host");
        assert_eq!(config.download_dir, PathBuf::from("/cli-dl"));
        assert_eq!(config.max_queued_downloads, 0);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export VIDEOMAX_DOWNLOAD_DIR="/media"
            VIDEOMAX_WWW_ROOT='/www'
            VIDEOMAX_HOST =  "0.0.0.0"
            PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("VIDEOMAX_DOWNLOAD_DIR").unwrap(), "/media");
        assert_eq!(vars.get("VIDEOMAX_WWW_ROOT").unwrap(), "/www");
        assert_eq!(vars.get("VIDEOMAX_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_reads_explicit_env_path() {
        let cfg = make_config("VIDEOMAX_MAX_QUEUED=\"5\"\n");
        let config = resolve_runtime_config(RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        assert_eq!(config.max_queued_downloads, 5);
    }
}
