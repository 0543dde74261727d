use std::collections::HashMap;

use http_flusher::config::{self, Config};
use http_flusher::convert::Shape;
use http_flusher::flusher::{FlushError, InitError};
use http_flusher::models::{Group, KeyValues, PipelineEvent, PipelineGroupEvents};
use http_flusher::HttpFlusher;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const DEFAULT_BATCH_SIZE: usize = 100;

/// Exceptional init failure: log and exit.
fn fatal(msg: &str, error: &dyn std::fmt::Display) -> ! {
    error!(%error, "{msg}");
    std::process::exit(1);
}

fn setup_logging() {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    let level = std::env::var("HTTP_FLUSHER_LOG_LEVEL")
        .ok()
        .and_then(|val| {
            val.parse::<LevelFilter>().ok().or_else(|| {
                eprintln!("invalid HTTP_FLUSHER_LOG_LEVEL: {val:?}, defaulting to WARN");
                None
            })
        })
        .unwrap_or(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(level)
        .with(tracing_microjson::JsonLayer::new(std::io::stderr).with_target(true))
        .init();
}

fn setup_rustls() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }
}

/// Settings that only matter to this binary acting as a host pipeline.
struct HostSettings {
    batch_size: usize,
    group: Group,
}

impl HostSettings {
    fn from_env() -> Result<Self, String> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("HTTP_FLUSHER_"))
            .collect();

        let batch_size = match vars.get("HTTP_FLUSHER_BATCH_SIZE") {
            None => DEFAULT_BATCH_SIZE,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(format!("HTTP_FLUSHER_BATCH_SIZE has invalid value: {raw}")),
            },
        };
        let metadata = vars
            .get("HTTP_FLUSHER_METADATA")
            .map(|raw| config::parse_key_values(raw))
            .unwrap_or_default();

        Ok(Self {
            batch_size,
            group: Group::new(KeyValues::from_pairs(metadata), KeyValues::new()),
        })
    }
}

async fn export_batch(
    flusher: &HttpFlusher,
    group: &Group,
    lines: &mut Vec<String>,
) -> Result<(), FlushError> {
    if lines.is_empty() {
        return Ok(());
    }
    let batch = PipelineGroupEvents {
        group: group.clone(),
        events: lines.drain(..).map(PipelineEvent::byte_array).collect(),
    };
    flusher.export(&[batch]).await
}

#[tokio::main]
async fn main() {
    setup_logging();
    setup_rustls();

    let config = Config::from_env()
        .unwrap_or_else(|e| fatal("config error", &InitError::from(e)));
    let host = HostSettings::from_env().unwrap_or_else(|e| fatal("config error", &e));

    let flusher = HttpFlusher::new(&config)
        .unwrap_or_else(|e| fatal("failed to initialize flusher", &e));
    if flusher.shape() != Shape::Generic {
        fatal(
            "stdin lines can only be forwarded with the raw protocol",
            &FlushError::UnsupportedShape(Shape::Generic),
        );
    }

    info!(url = %config.remote_url, batch_size = host.batch_size, "forwarding stdin");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut lines = Vec::with_capacity(host.batch_size);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, flushing remaining lines");
                break;
            }
            next = stdin.next_line() => match next {
                Ok(Some(line)) => {
                    lines.push(line);
                    if lines.len() >= host.batch_size
                        && let Err(e) = export_batch(&flusher, &host.group, &mut lines).await
                    {
                        error!(error = %e, "export failed");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    }

    if let Err(e) = export_batch(&flusher, &host.group, &mut lines).await {
        error!(error = %e, "export failed");
    }
    flusher.stop().await;
}
