//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use courier_core::HttpMethod;

/// Resilient HTTP and server-sent event client.
///
/// Courier issues one call against an API, retrying transient failures,
/// streaming events or saving files, and reports failures by category.
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/courier/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL joined with relative paths
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Bearer token for the Authorization header
    #[arg(long, global = true)]
    pub bearer: Option<String>,

    /// Secondary identity token
    #[arg(long, global = true)]
    pub id_token: Option<String>,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub retries: Option<u32>,

    /// Skip TLS certificate validation for this call
    #[arg(long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a resource and print the body
    Get {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// Query parameters as key=value
        #[arg(long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,

        /// Extra headers as name=value
        #[arg(short = 'H', long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
    },

    /// Send a request with an optional JSON body
    Send {
        /// HTTP method
        #[arg(value_enum)]
        method: SendMethod,

        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(long)]
        json: Option<String>,

        /// Extra headers as name=value
        #[arg(short = 'H', long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
    },

    /// Follow a server-sent event stream and print each event
    Stream {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// Stop after this many events
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Save a response body to a file
    Download {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// File name instead of the server-provided one
        #[arg(long)]
        name: Option<String>,

        /// Target directory (defaults to the platform download directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Response is JSON with base64 file content in `data`
        #[arg(long)]
        decode: bool,
    },
}

/// Methods accepted by `send`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<SendMethod> for HttpMethod {
    fn from(method: SendMethod) -> Self {
        match method {
            SendMethod::Get => Self::Get,
            SendMethod::Post => Self::Post,
            SendMethod::Put => Self::Put,
            SendMethod::Patch => Self::Patch,
            SendMethod::Delete => Self::Delete,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_get_parses_path() {
        let args = Args::try_parse_from(["courier", "get", "/users/1"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(matches!(args.command, Command::Get { ref path, .. } if path == "/users/1"));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["courier", "-v", "get", "/a"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["courier", "get", "/a", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["courier", "--quiet", "get", "/a"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["courier", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["courier", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_missing_subcommand_rejected() {
        assert!(Args::try_parse_from(["courier"]).is_err());
    }

    #[test]
    fn test_cli_get_query_and_headers() {
        let args = Args::try_parse_from([
            "courier", "get", "/items", "--query", "page=2", "-H", "x-trace=on",
        ])
        .unwrap();
        let Command::Get { query, headers, .. } = args.command else {
            panic!("expected get");
        };
        assert_eq!(query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(headers, vec![("x-trace".to_string(), "on".to_string())]);
    }

    #[test]
    fn test_cli_malformed_key_value_rejected() {
        let result = Args::try_parse_from(["courier", "get", "/a", "--query", "novalue"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_send_method_and_body() {
        let args = Args::try_parse_from(["courier", "send", "post", "/notes", "--json", "{}"])
            .unwrap();
        let Command::Send { method, json, .. } = args.command else {
            panic!("expected send");
        };
        assert_eq!(HttpMethod::from(method), HttpMethod::Post);
        assert_eq!(json.as_deref(), Some("{}"));
    }

    #[test]
    fn test_cli_download_flags() {
        let args = Args::try_parse_from([
            "courier", "download", "/f/1", "--name", "a.pdf", "--dir", "/tmp", "--decode",
        ])
        .unwrap();
        let Command::Download {
            name, dir, decode, ..
        } = args.command
        else {
            panic!("expected download");
        };
        assert_eq!(name.as_deref(), Some("a.pdf"));
        assert_eq!(dir, Some(PathBuf::from("/tmp")));
        assert!(decode);
    }

    // ==================== Retries Tests ====================

    #[test]
    fn test_cli_retries_max_value() {
        let args = Args::try_parse_from(["courier", "-r", "10", "get", "/a"]).unwrap();
        assert_eq!(args.retries, Some(10));
    }

    #[test]
    fn test_cli_retries_over_max_rejected() {
        let err = Args::try_parse_from(["courier", "-r", "11", "get", "/a"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
