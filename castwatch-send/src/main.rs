//! castwatch-send - Polling daemon for new-item notifications
//!
//! Periodically fetches every configured source, announces the newest
//! qualifying item to destinations that have not seen it yet, and records
//! per-destination watermarks so nothing is ever announced twice.

use clap::Parser;
use libcastwatch::classifier::RuleClassifier;
use libcastwatch::config::Config;
use libcastwatch::delivery::stdout::StdoutDelivery;
use libcastwatch::error::ConfigError;
use libcastwatch::feeds::file::FileFeed;
use libcastwatch::logging::{LogFormat, LoggingConfig};
use libcastwatch::{Dispatcher, Result, SourceBinding, WatermarkStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "castwatch-send")]
#[command(version)]
#[command(about = "Polling daemon that announces new items to their destinations")]
#[command(long_about = "\
castwatch-send - Polling daemon for new-item notifications

DESCRIPTION:
    castwatch-send watches a set of content sources and tells each bound
    destination about the newest item it has not been told about yet.

    Each cycle fetches every source, skips items the classifier rejects,
    delivers at most one item per source, and persists watermarks once
    all sources have been processed. The first time a destination is
    seen it is seeded with the newest item instead of receiving a backlog.

USAGE:
    # Run in foreground (logs to stderr, notifications to stdout)
    castwatch-send

    # Run a single cycle and exit
    castwatch-send --once

    # Poll every ten minutes with JSON logs
    castwatch-send --poll-interval 10m --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current cycle)

CONFIGURATION:
    Configuration file: ~/.config/castwatch/config.toml
    (override with --config or CASTWATCH_CONFIG)

    [state]
    path = \"~/.local/share/castwatch/watermarks.json\"

    [feed]
    dir = \"~/.local/share/castwatch/feeds\"

    [daemon]
    poll_interval = 300

    [[sources]]
    id = \"UC123\"
    destinations = [{ platform = \"twitter\", handle = \"alice\" }]

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error (watermarks could not be persisted)
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Poll interval (overrides config)
    #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
    #[arg(help = "Time between cycles, in seconds or like '5m' (default: 300)")]
    poll_interval: Option<Duration>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT", env = "CASTWATCH_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

/// Accept bare seconds or a humantime duration such as "90s" or "5m"
fn parse_interval(value: &str) -> std::result::Result<Duration, String> {
    let interval = match value.trim().parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(value.trim()).map_err(|e| e.to_string())?,
    };

    if interval.is_zero() {
        return Err("poll interval must be greater than zero".to_string());
    }
    Ok(interval)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    logging.format = cli.log_format;
    logging.verbose = cli.verbose;
    logging.init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let dispatcher = build_dispatcher(&config)?;
    let bindings = config.bindings();

    info!(
        sources = bindings.len(),
        state = %dispatcher.store().path().display(),
        "castwatch-send starting"
    );

    if cli.once {
        dispatcher.run_cycle(&bindings).await?;
        info!("castwatch-send: ran one cycle, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or_else(|| {
        Duration::from_secs(
            config
                .daemon
                .as_ref()
                .map(|d| d.poll_interval)
                .unwrap_or(300),
        )
    });
    info!("Poll interval: {}", humantime::format_duration(poll_interval));

    run_daemon_loop(&dispatcher, &bindings, poll_interval, shutdown).await;

    info!("castwatch-send daemon stopped");
    Ok(())
}

/// Wire the file feed, rule classifier and one stdout delivery per platform
fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    let feed_dir = config
        .feed
        .as_ref()
        .map(|f| f.expand_dir())
        .ok_or_else(|| ConfigError::MissingField("feed.dir".to_string()))?;

    let store = WatermarkStore::open(config.state.expand_path());
    let classifier = RuleClassifier::from_config(&config.classifier);

    let mut dispatcher = Dispatcher::new(
        Arc::new(FileFeed::new(feed_dir)),
        Arc::new(classifier),
        Arc::new(store),
        config.dispatch.clone(),
    );

    let url_template = config
        .daemon
        .as_ref()
        .and_then(|d| d.url_template.clone());
    for platform in config.platforms() {
        let mut delivery = StdoutDelivery::new(platform);
        if let Some(template) = &url_template {
            delivery = delivery.with_url_template(template.clone());
        }
        dispatcher.register_delivery(Arc::new(delivery));
    }

    Ok(dispatcher)
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping after the current cycle...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(
    dispatcher: &Dispatcher,
    bindings: &[SourceBinding],
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        // A failed flush already rolled back this cycle; the next one retries
        if let Err(e) = dispatcher.run_cycle(bindings).await {
            error!("Cycle failed: {}", e);
        }

        // Sleep until the next poll, checking for shutdown in between
        let mut waited = Duration::ZERO;
        while waited < poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let step = tick.min(poll_interval - waited);
            sleep(step).await;
            waited += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_seconds() {
        assert_eq!(parse_interval("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_interval_humantime() {
        assert_eq!(parse_interval("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_interval("1h 30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_interval_rejects_zero_and_garbage() {
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "castwatch-send",
            "--once",
            "--poll-interval",
            "2m",
            "--log-format",
            "json",
            "-v",
        ])
        .unwrap();

        assert!(cli.once);
        assert!(cli.verbose);
        assert_eq!(cli.poll_interval, Some(Duration::from_secs(120)));
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
