//! Flow Enrichment Daemon
//!
//! Reads flow records as JSON lines on stdin, enriches them and writes them
//! to stdout in the same order. Logs go to stderr and, with `--log`, to a
//! file as well.

use anyhow::{Context, Result};
use clap::Parser;
use flowenrichd::transport::{pump, JsonLinesSink, JsonLinesSource};
use flowenrichd::{EnricherConfig, EnrichmentOrchestrator};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Flow record enricher
#[derive(Parser, Debug)]
#[command(name = "flowenrichd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; command line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Whether to populate the cid field
    #[arg(long = "output.cid", num_args = 0..=1, default_missing_value = "true")]
    output_cid: Option<bool>,

    /// Location of the CID database, in CSV format
    #[arg(long = "config.cid_db")]
    cid_db: Option<PathBuf>,

    /// Whether to populate the remote_country field
    #[arg(long = "output.geoloc", num_args = 0..=1, default_missing_value = "true")]
    output_geoloc: Option<bool>,

    /// Location of the GeoLite2 Country mmdb file
    #[arg(long = "config.geoloc")]
    geoloc_db: Option<PathBuf>,

    /// Whether to populate the proto_name field (default: true)
    #[arg(long = "output.protoname", num_args = 0..=1, default_missing_value = "true")]
    output_protoname: Option<bool>,

    /// Whether to normalize byte and packet counters by the sampling rate
    #[arg(long = "output.normalize", num_args = 0..=1, default_missing_value = "true")]
    output_normalize: Option<bool>,

    /// Whether to add interface information via SNMP
    #[arg(long = "output.snmp", num_args = 0..=1, default_missing_value = "true")]
    output_snmp: Option<bool>,

    /// SNMP community used to query the exporters
    #[arg(long = "config.snmp.community")]
    snmp_community: Option<String>,

    /// Regex used to truncate interface descriptions; the first capture
    /// group is kept
    #[arg(long = "config.snmp.ifdescregex")]
    snmp_ifdesc_regex: Option<String>,
}

impl Args {
    fn apply_overrides(&self, config: &mut EnricherConfig) {
        if let Some(enabled) = self.output_cid {
            config.cid.enabled = enabled;
        }
        if let Some(path) = &self.cid_db {
            config.cid.db_path = path.clone();
        }
        if let Some(enabled) = self.output_geoloc {
            config.geoloc.enabled = enabled;
        }
        if let Some(path) = &self.geoloc_db {
            config.geoloc.db_path = path.clone();
        }
        if let Some(enabled) = self.output_protoname {
            config.protoname.enabled = enabled;
        }
        if let Some(enabled) = self.output_normalize {
            config.normalize.enabled = enabled;
        }
        if let Some(enabled) = self.output_snmp {
            config.snmp.enabled = enabled;
        }
        if let Some(community) = &self.snmp_community {
            config.snmp.community = community.clone();
        }
        if let Some(regex) = &self.snmp_ifdesc_regex {
            config.snmp.ifdesc_regex = regex.clone();
        }
    }

    fn load_config(&self) -> Result<EnricherConfig> {
        let mut config = match &self.config {
            Some(path) => EnricherConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => EnricherConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log.as_deref()) {
        eprintln!("flowenrichd: {:#}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "flowenrichd: Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    info!("flowenrichd: Starting flow enrichment daemon");

    let code = match runtime.block_on(run_daemon(args)) {
        Ok(()) => {
            info!("flowenrichd: Daemon exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "flowenrichd: Daemon exiting with error");
            ExitCode::FAILURE
        }
    };

    // A pending stdin read cannot be cancelled; don't wait on it.
    runtime.shutdown_timeout(Duration::from_secs(1));
    code
}

/// Initialize structured logging to stderr, teed to `log_file` if given.
///
/// The level comes from `RUST_LOG`, defaulting to `info`.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let subscriber = builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set logger")?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set logger")?;
        }
    }

    Ok(())
}

/// Initializes the enricher, then pumps stdin to stdout until EOF or
/// Ctrl-C.
async fn run_daemon(args: Args) -> Result<()> {
    let config = args.load_config()?;
    let enricher = Arc::new(EnrichmentOrchestrator::new(config));
    enricher
        .initialize()
        .context("failed to initialize enricher")?;

    let shutdown = setup_signal_handler();

    let mut source = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    let mut sink = JsonLinesSink::new(BufWriter::new(tokio::io::stdout()));

    info!("flowenrichd: Processing flow records");
    let result = pump(&mut source, &mut sink, &enricher, &shutdown).await;

    enricher.shutdown().await;
    if let Some(cache) = enricher.interface_cache() {
        let stats = cache.stats();
        info!(
            entries = cache.len(),
            hits = stats.hits,
            misses = stats.misses,
            dropped = stats.dropped,
            query_failures = stats.query_failures,
            "flowenrichd: Interface cache statistics"
        );
    }

    let stats = result.context("record transport failed")?;
    info!(
        forwarded = stats.forwarded,
        malformed = source.malformed(),
        "flowenrichd: Record stream finished"
    );
    Ok(())
}

/// Cancels the returned token on SIGINT.
fn setup_signal_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("flowenrichd: Received SIGINT"),
            Err(e) => warn!(error = %e, "flowenrichd: Cannot listen for SIGINT"),
        }
        token.cancel();
    });

    shutdown
}
