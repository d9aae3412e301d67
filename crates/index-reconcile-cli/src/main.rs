//! index-reconcile CLI - audit an Elasticsearch index against its PostgreSQL source.

use clap::{Parser, Subcommand};
use index_reconcile::{load_schema, Config, Orchestrator, ReconcileError, ValidationReport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when the last validation attempt was still invalid.
const EXIT_INVALID: u8 = 3;

/// Exit code when either store is unreachable during `health-check`.
const EXIT_UNHEALTHY: u8 = 1;

#[derive(Parser)]
#[command(name = "index-reconcile")]
#[command(about = "Reconcile an Elasticsearch index against its PostgreSQL source table")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the index against the database
    Validate {
        /// Attempts before giving up on an invalid index
        #[arg(long)]
        attempts: Option<u32>,

        /// Seconds to wait between attempts
        #[arg(long)]
        interval: Option<u64>,

        /// Validate every record instead of the recent window
        #[arg(long)]
        validate_everything: bool,

        /// Width of the ID window in minutes
        #[arg(long)]
        period_minutes: Option<i64>,

        /// Seconds of pipeline lag to allow for
        #[arg(long)]
        lag_compensation_seconds: Option<i64>,

        /// Write the lag gauges in Prometheus text format to this file
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Parse the schema document and print the derived field model
    ParseSchema,

    /// Test database and index connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, ReconcileError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Validate {
            attempts,
            interval,
            validate_everything,
            period_minutes,
            lag_compensation_seconds,
            metrics_file,
        } => {
            let v = &mut config.validation;
            if let Some(n) = attempts {
                v.attempts = n;
            }
            if let Some(s) = interval {
                v.interval_seconds = s;
            }
            if validate_everything {
                v.validate_everything = true;
            }
            if let Some(m) = period_minutes {
                v.period_minutes = m;
            }
            if let Some(s) = lag_compensation_seconds {
                v.lag_compensation_seconds = s;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::new(config).await?;
            let report = validate_with_retries(&orchestrator, &cancel_token, cli.output_json).await?;

            if let Some(path) = metrics_file {
                std::fs::write(&path, orchestrator.metrics()?)?;
                info!("Wrote lag metrics to {:?}", path);
            }

            Ok(if report.is_valid() { 0 } else { EXIT_INVALID })
        }

        Commands::ParseSchema => {
            let schema = load_schema(&config)?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                println!("Schema:");
                println!("  Root node: {}", schema.root_node);
                if let Some(ref ds) = schema.datasource {
                    println!("  Datasource: {}", ds);
                }
                println!("  Fields:");
                for field in &schema.fields {
                    println!("    {:<32} {:?}", field.name, field.field_type);
                }
                if !schema.transformed_fields.is_empty() {
                    println!("  Transformed (not compared):");
                    for field in &schema.transformed_fields {
                        println!("    {}", field);
                    }
                }
            }
            Ok(0)
        }

        Commands::HealthCheck => {
            let result = Orchestrator::health_check(&config).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Database (PostgreSQL): {} ({}ms)",
                    if result.database_connected { "OK" } else { "FAILED" },
                    result.database_latency_ms
                );
                if let Some(ref err) = result.database_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Index (Elasticsearch): {} ({}ms)",
                    if result.index_connected { "OK" } else { "FAILED" },
                    result.index_latency_ms
                );
                if let Some(ref err) = result.index_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            // The report is already printed; an unreachable store is not a config error.
            Ok(if result.healthy { 0 } else { EXIT_UNHEALTHY })
        }
    }
}

/// Validate until valid or out of attempts, sleeping between attempts.
async fn validate_with_retries(
    orchestrator: &Orchestrator,
    cancel_token: &CancellationToken,
    output_json: bool,
) -> Result<ValidationReport, ReconcileError> {
    let attempts = orchestrator.config().validation.attempts.max(1);
    let interval = Duration::from_secs(orchestrator.config().validation.interval_seconds);

    let mut attempt = 1;
    loop {
        let run = orchestrator.run_config(chrono::Utc::now());
        let report = orchestrator.validate(&run).await?;
        print_report(&report, attempt, output_json)?;

        if report.is_valid() || attempt >= attempts {
            return Ok(report);
        }

        info!(
            "Attempt {}/{} invalid, retrying in {}s",
            attempt,
            attempts,
            interval.as_secs()
        );
        tokio::select! {
            _ = cancel_token.cancelled() => {
                warn!("Interrupted, stopping after attempt {}", attempt);
                return Ok(report);
            }
            _ = tokio::time::sleep(interval) => {}
        }
        attempt += 1;
    }
}

fn print_report(
    report: &ValidationReport,
    attempt: u32,
    output_json: bool,
) -> Result<(), ReconcileError> {
    if output_json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!("Validation attempt {}:", attempt);
    println!(
        "  Result: {}",
        if report.is_valid() { "VALID" } else { "INVALID" }
    );
    if let Some(reason) = report.reason {
        println!("  Reason: {}", reason);
    }
    println!("  {}", report.message);
    if let Some(ref count) = report.count {
        println!(
            "  Counts: {} rows, {} documents (ratio {:.2})",
            count.db_count, count.index_count, count.mismatch_ratio
        );
    }
    if let Some(ref ids) = report.ids {
        println!(
            "  IDs: {} in database, {} in index, {} mismatched",
            ids.total_db_retrieved, ids.total_index_retrieved, ids.mismatch_count
        );
    }
    if let Some(ref content) = report.content {
        println!(
            "  Content: {} of {} records mismatched ({:.2}%)",
            content.mismatch_count,
            content.total_validated,
            content.mismatch_ratio * 100.0
        );
        for (id, diff) in &content.mismatched_records {
            println!("    {}:", id);
            for line in &diff.diffs {
                println!("      {}", line);
            }
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so stdout stays parseable with --output-json.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current attempt...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current attempt...");
            token.cancel();
        }
    });

    cancel_token
}
