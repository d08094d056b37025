//! CLI entry point for the courier tool.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use courier_core::{
    ApiClient, CallResult, CancelToken, DescriptorBuilder, HttpMethod, RequestDescriptor,
    ResponseShape, RetryConfig, SessionConfig, Timeouts,
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::FileConfig;
use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = app_config::load_file_config(args.config.as_deref())?;
    let client = ApiClient::new();
    client
        .setup(session_config(&args, &file_config))
        .context("Invalid session configuration")?;
    client.set_bearer_auth_token(args.bearer.as_deref().or(file_config.bearer_token.as_deref()));
    client.set_id_token(args.id_token.as_deref().or(file_config.id_token.as_deref()));

    spawn_error_logger(&client);
    let cancel = CancelToken::new();
    spawn_interrupt_handler(cancel.clone());

    let succeeded = run_command(&client, &args, &cancel).await?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn session_config(args: &Args, file: &FileConfig) -> SessionConfig {
    let defaults = Timeouts::default();
    let timeouts = Timeouts {
        connect: file
            .connect_timeout_secs
            .map_or(defaults.connect, Duration::from_secs),
        receive: file
            .receive_timeout_secs
            .map_or(defaults.receive, Duration::from_secs),
        download_receive: file
            .download_timeout_secs
            .map_or(defaults.download_receive, Duration::from_secs),
        ..defaults
    };

    let delays = file
        .retry_delays_ms
        .as_ref()
        .map(|delays| delays.iter().copied().map(Duration::from_millis).collect())
        .unwrap_or_default();
    let retry = args
        .retries
        .or(file.retry_count)
        .map_or_else(RetryConfig::default, |count| RetryConfig::new(count, delays));

    let base_url = args
        .base_url
        .clone()
        .or_else(|| file.base_url.clone())
        .unwrap_or_default();
    let mut config = SessionConfig::new(base_url)
        .with_timeouts(timeouts)
        .with_retry(retry);

    let download_dir = match &args.command {
        Command::Download { dir: Some(dir), .. } => Some(dir.clone()),
        _ => file.download_dir.clone(),
    };
    if let Some(dir) = download_dir {
        config = config.with_download_dir(dir);
    }
    config
}

/// Logs every error published on the client's error feed.
fn spawn_error_logger(client: &ApiClient) {
    let errors = client.on_api_error();
    tokio::spawn(async move {
        let mut errors = std::pin::pin!(errors);
        while let Some(error) = errors.next().await {
            warn!(
                kind = %error.kind(),
                status = ?error.status(),
                correlation_id = error.correlation_id().unwrap_or("-"),
                "API error reported"
            );
        }
    });
}

/// Cancels in-flight work on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

async fn run_command(client: &ApiClient, args: &Args, cancel: &CancelToken) -> Result<bool> {
    match &args.command {
        Command::Get {
            path,
            query,
            headers,
        } => {
            let mut builder = RequestDescriptor::get(path.as_str());
            for (key, value) in query {
                builder = builder.query(key.as_str(), value.as_str());
            }
            let builder = with_headers(builder, headers);
            let descriptor = text_output(builder, args.insecure);
            Ok(print_text(client.call(&descriptor, Some(cancel)).await))
        }
        Command::Send {
            method,
            path,
            json,
            headers,
        } => {
            let mut builder = RequestDescriptor::builder(HttpMethod::from(*method), path.as_str());
            if let Some(raw) = json {
                let body: serde_json::Value =
                    serde_json::from_str(raw).context("--json is not valid JSON")?;
                builder = builder.json_body(body);
            }
            let builder = with_headers(builder, headers);
            let descriptor = text_output(builder, args.insecure);
            Ok(print_text(client.call(&descriptor, Some(cancel)).await))
        }
        Command::Stream { path, limit } => {
            let mut builder = RequestDescriptor::get(path.as_str());
            if args.insecure {
                builder = builder.ignore_cert_validation();
            }
            let descriptor = builder.output::<String>().build();
            let events = client.call_stream(&descriptor, Some(cancel));
            let mut events = std::pin::pin!(events.take(limit.unwrap_or(usize::MAX)));
            let mut succeeded = true;
            while let Some(item) = events.next().await {
                succeeded &= print_text(item);
            }
            Ok(succeeded)
        }
        Command::Download {
            path, name, decode, ..
        } => {
            let mut builder = if *decode {
                RequestDescriptor::get(path.as_str()).file_decode()
            } else {
                RequestDescriptor::download(path.as_str())
            };
            if let Some(name) = name {
                builder = builder.download_file_name(name.as_str());
            }
            if args.insecure {
                builder = builder.ignore_cert_validation();
            }
            let descriptor = builder.output::<PathBuf>().build();
            match client.call(&descriptor, Some(cancel)).await {
                CallResult::Success(path) => {
                    if let Some(path) = path {
                        println!("{}", path.display());
                    }
                    Ok(true)
                }
                CallResult::Failure(error) => {
                    eprintln!("{error}");
                    Ok(false)
                }
            }
        }
    }
}

fn with_headers(mut builder: DescriptorBuilder, headers: &[(String, String)]) -> DescriptorBuilder {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn text_output(builder: DescriptorBuilder, insecure: bool) -> RequestDescriptor<String> {
    let builder = if insecure {
        builder.ignore_cert_validation()
    } else {
        builder
    };
    builder.shape(ResponseShape::Text).output::<String>().build()
}

fn print_text(result: CallResult<String>) -> bool {
    match result {
        CallResult::Success(body) => {
            if let Some(body) = body {
                println!("{body}");
            }
            true
        }
        CallResult::Failure(error) => {
            eprintln!("{error}");
            false
        }
    }
}
