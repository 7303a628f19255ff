use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use snippet_parsers::api::SnippetApi;
use snippet_parsers::error::ConfigError;
use snippet_parsers::executor::FailurePolicy;
use snippet_parsers::parser;
use snippet_parsers::pipeline::{Pipeline, PipelineOptions, RunRequest};
use snippet_parsers::registry::{BaseConfig, Registry};
use snippet_parsers::selection::{SelectionOverrides, SystemClock};
use snippet_parsers::settings::{clamp_concurrency, Settings};
use snippet_parsers::snippet::{parse_cli_timestamp, Snippet};

#[derive(Parser)]
#[command(
    name = "snippet-parsers",
    about = "Run metadata extraction parsers over collected timeline snippets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select unprocessed snippets, extract metadata and commit the results
    Run {
        /// Parser name, as listed by `parsers`
        name: String,
        /// Window start (ISO date or timestamp; default: one hour ago)
        #[arg(long, value_parser = parse_cli_timestamp)]
        since: Option<DateTime<Utc>>,
        /// Window end (ISO date or timestamp; default: now)
        #[arg(long, value_parser = parse_cli_timestamp)]
        until: Option<DateTime<Utc>>,
        /// Process this single snippet id, ignoring other requirements
        #[arg(long)]
        id: Option<String>,
        /// Retry snippets this parser previously failed on
        #[arg(long)]
        repeat: bool,
        /// Max snippets in flight (default from config)
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,
        /// Replace the parser's base requirements (JSON object)
        #[arg(long)]
        requirements: Option<String>,
        /// Keep going after an extraction failure instead of aborting
        #[arg(long)]
        skip_failures: bool,
    },
    /// List built-in parsers and their registry entries
    Parsers,
    /// Run one parser over a local HTML file without contacting the service
    Try {
        name: String,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;

    match cli.command {
        Commands::Run {
            name,
            since,
            until,
            id,
            repeat,
            concurrency,
            requirements,
            skip_failures,
        } => {
            let entry = parser::lookup(&name).ok_or_else(|| ConfigError::UnknownParser(name.clone()))?;
            let requirements = match requirements {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| ConfigError::InvalidConfig(format!("--requirements: {}", e)))?,
                None => entry.requirements.clone(),
            };

            let requested = concurrency.unwrap_or(settings.concurrency);
            let concurrency = clamp_concurrency(requested);
            if concurrency != requested {
                warn!("Concurrency {} capped at {}", requested, concurrency);
            }
            let policy = if skip_failures {
                FailurePolicy::Skip
            } else {
                settings.failure_policy
            };

            let registry = Registry::load(&settings.registry)?;
            let api = Arc::new(
                SnippetApi::new(&settings.url, settings.request_timeout())
                    .context("Failed to build HTTP client")?,
            );
            let pipeline = Pipeline::new(
                Arc::new(registry),
                api.clone(),
                api,
                Arc::new(SystemClock),
                PipelineOptions {
                    extract_timeout: settings.extract_timeout(),
                    run_timeout: settings.run_timeout(),
                    progress: settings.progress,
                },
            );

            let request = RunRequest {
                base: BaseConfig {
                    name,
                    requirements,
                    repeat,
                    concurrency,
                },
                overrides: SelectionOverrides {
                    since,
                    until,
                    target_id: id,
                },
                policy,
            };

            let report = pipeline.run(request, entry.extractor).await?;
            report.print();
            info!("Run finished in {:.1}s", report.elapsed.as_secs_f64());
            if report.timed_out {
                bail!(
                    "{} cancelled at the run deadline ({} committed)",
                    report.parser,
                    report.committed
                );
            }
            if report.aborted {
                bail!(
                    "{} aborted after {} failure(s)",
                    report.parser,
                    report.failures.len()
                );
            }
        }
        Commands::Parsers => {
            let registry = Registry::load(&settings.registry)?;
            println!("{:<14} | {:<26} | {:<10} | {:<10} | About", "Name", "Key", "Since", "Until");
            println!("{}", "-".repeat(90));
            for entry in parser::catalog() {
                let descriptor = registry.find(entry.name);
                let key = descriptor.map(|d| d.key.as_str()).unwrap_or("(unregistered)");
                let day = |t: Option<DateTime<Utc>>| {
                    t.map(|t| t.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".into())
                };
                println!(
                    "{:<14} | {:<26} | {:<10} | {:<10} | {}",
                    entry.name,
                    key,
                    day(descriptor.and_then(|d| d.since)),
                    day(descriptor.and_then(|d| d.until)),
                    entry.about
                );
            }
        }
        Commands::Try { name, file } => {
            let entry = parser::lookup(&name).ok_or_else(|| ConfigError::UnknownParser(name.clone()))?;
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let snippet = Snippet::new(file.display().to_string(), html);
            let extraction = entry.extractor.extract(&snippet).await?;
            println!("{}", serde_json::to_string_pretty(&extraction.metadata)?);
            if !extraction.tally.is_empty() {
                println!("tally: {}", extraction.tally);
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}
