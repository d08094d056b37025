//! Configuration file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// TOML-style file configuration for `courier` defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Base URL joined with relative request paths.
    pub base_url: Option<String>,
    /// Bearer token sent as `Authorization`.
    pub bearer_token: Option<String>,
    /// Secondary identity token.
    pub id_token: Option<String>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Receive timeout in seconds for ordinary calls.
    pub receive_timeout_secs: Option<u64>,
    /// Receive timeout in seconds for downloads.
    pub download_timeout_secs: Option<u64>,
    /// Retries for transient failures (same range as CLI).
    pub retry_count: Option<u32>,
    /// Delays between retries in milliseconds.
    pub retry_delays_ms: Option<Vec<u64>>,
    /// Directory downloads are saved to.
    pub download_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Validates config values against CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("receive_timeout_secs", self.receive_timeout_secs)?;
        validate_timeout_secs("download_timeout_secs", self.download_timeout_secs)?;

        if let Some(retry_count) = self.retry_count
            && retry_count > 10
        {
            bail!("Invalid config value for `retry_count`: {retry_count}. Expected range: 0..=10");
        }

        if let Some(delays) = &self.retry_delays_ms
            && let Some(delay) = delays.iter().find(|delay| **delay > 60_000)
        {
            bail!("Invalid config value for `retry_delays_ms`: {delay}. Expected range: 0..=60000");
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/courier/config.toml`
/// 2. `$HOME/.config/courier/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("courier")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("courier")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` (which must exist) or the default path if present.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        return read_file_config(path);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "base_url" => cfg.base_url = Some(parse_string_literal(value).with_context(context)?),
            "bearer_token" => {
                cfg.bearer_token = Some(parse_string_literal(value).with_context(context)?);
            }
            "id_token" => cfg.id_token = Some(parse_string_literal(value).with_context(context)?),
            "download_dir" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.download_dir = Some(PathBuf::from(parsed));
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "receive_timeout_secs" => {
                cfg.receive_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "download_timeout_secs" => {
                cfg.download_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "retry_count" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("retry_count out of range for u32"))?;
                cfg.retry_count = Some(n);
            }
            "retry_delays_ms" => {
                cfg.retry_delays_ms = Some(parse_integer_array(value).with_context(context)?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_integer_array(raw_value: &str) -> Result<Vec<u64>> {
    let Some(inner) = raw_value
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        bail!("Expected array of integers like [1000, 2000]");
    };
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(parse_integer_u64)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
base_url = "https://api.example.com"
retry_count = 2
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(cfg.retry_count, Some(2));
        assert!(cfg.download_dir.is_none());
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
base_url = "https://api.example.com"
bearer_token = "abc"
id_token = "id"
connect_timeout_secs = 5
receive_timeout_secs = 20
download_timeout_secs = 600
retry_count = 3
retry_delays_ms = [100, 200, 400]
download_dir = "/tmp/inbox"
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.bearer_token.as_deref(), Some("abc"));
        assert_eq!(cfg.id_token.as_deref(), Some("id"));
        assert_eq!(cfg.connect_timeout_secs, Some(5));
        assert_eq!(cfg.receive_timeout_secs, Some(20));
        assert_eq!(cfg.download_timeout_secs, Some(600));
        assert_eq!(cfg.retry_delays_ms, Some(vec![100, 200, 400]));
        assert_eq!(cfg.download_dir, Some(PathBuf::from("/tmp/inbox")));
    }

    #[test]
    fn test_parse_config_empty_delay_array() {
        let cfg = parse_config_str("retry_delays_ms = []").expect("empty array should parse");
        assert_eq!(cfg.retry_delays_ms, Some(vec![]));
    }

    #[test]
    fn test_parse_config_rejects_malformed_array() {
        let err = parse_config_str("retry_delays_ms = 100, 200").expect_err("array expected");
        assert!(err.to_string().contains("retry_delays_ms"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_retry_count() {
        let err = parse_config_str("retry_count = 11").expect_err("invalid retry_count expected");
        assert!(err.to_string().contains("retry_count"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err = parse_config_str("connect_timeout_secs = 0")
            .expect_err("invalid timeout expected");
        assert!(err.to_string().contains("connect_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("base_url = https://x").expect_err("quoted string expected");
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
retry_count = 4 # flaky network
base_url = "https://x.example/#frag" # hash inside string kept
"#,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.retry_count, Some(4));
        assert_eq!(cfg.base_url.as_deref(), Some("https://x.example/#frag"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        assert!(load_file_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "retry_count = 1\n").unwrap();
        let cfg = load_file_config(Some(&path)).unwrap();
        assert_eq!(cfg.retry_count, Some(1));
    }
}
