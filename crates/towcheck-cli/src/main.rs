mod display;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use towcheck_core::{FilterParams, SizeMetric, census};
use towcheck_pipeline::{InconclusivePolicy, Pacing, Pipeline, PipelineConfig, RetryPolicy};
use towcheck_store::{
    CsvOutput, FilterSummary, JsonlCheckpoint, OutputWriter, filter_census, load_records,
    stored_filter_params,
};
use towcheck_verify::{VerifierSettings, WebVerifier, search::DEFAULT_SEARCH_URL};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Find operating towing companies in the FMCSA Company Census.
///
/// Filters the census to towing carriers in the chosen states (once, or when
/// the filter changes), then checks each remaining carrier on the web.
/// Safe to interrupt and rerun: finished carriers are never checked twice.
#[derive(Parser)]
#[command(name = "towcheck")]
#[command(version)]
struct Cli {
    /// Raw census table (CSV, or .parquet)
    #[arg(long, env = "TOWCHECK_RAW", default_value = "Company_Census_File.csv")]
    raw: PathBuf,

    /// Filtered candidate table (Parquet)
    #[arg(long, env = "TOWCHECK_FILTERED", default_value = "towing_candidates.parquet")]
    filtered: PathBuf,

    /// Checkpoint of processed carriers (JSON lines)
    #[arg(long, env = "TOWCHECK_CHECKPOINT", default_value = "processed_dots.jsonl")]
    checkpoint: PathBuf,

    /// Verified carriers (CSV)
    #[arg(long, env = "TOWCHECK_OUTPUT", default_value = "towing_companies_verified.csv")]
    output: PathBuf,

    /// Two-letter state codes to keep
    #[arg(
        long,
        env = "TOWCHECK_REGIONS",
        value_delimiter = ',',
        default_value = "ME,NH,VT,MA,RI,CT,NY"
    )]
    regions: Vec<String>,

    /// Census cargo columns; a carrier marked in any of them is kept
    #[arg(
        long,
        env = "TOWCHECK_CARGO_CLASSES",
        value_delimiter = ',',
        default_value = census::CRGO_DRIVETOW
    )]
    cargo_classes: Vec<String>,

    /// Count column for the size threshold
    #[arg(long, env = "TOWCHECK_SIZE_METRIC", default_value = "total-drivers")]
    size_metric: SizeMetric,

    /// Minimum value of the size metric
    #[arg(long, env = "TOWCHECK_MIN_SIZE", default_value_t = 5.0)]
    min_size: f64,

    /// Regenerate the filtered table even if it is up to date
    #[arg(long)]
    refilter: bool,

    /// Stop after the filter step
    #[arg(long)]
    filter_only: bool,

    /// Minimum pause between verifications, in seconds
    #[arg(long, default_value_t = 3.0)]
    delay_min_secs: f64,

    /// Maximum pause between verifications, in seconds
    #[arg(long, default_value_t = 6.0)]
    delay_max_secs: f64,

    /// Verifier calls per carrier before it is inconclusive
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Backoff after the first failed call, doubled after each further one
    #[arg(long, default_value_t = 10.0)]
    retry_backoff_secs: f64,

    /// Skip carriers after this many inconclusive runs (default: retry forever)
    #[arg(long)]
    inconclusive_max_runs: Option<u32>,

    /// Always search, even when the company name says towing
    #[arg(long)]
    no_name_approval: bool,

    /// Search endpoint
    #[arg(long, default_value = DEFAULT_SEARCH_URL)]
    search_url: String,

    /// Result pages checked per search name
    #[arg(long, default_value_t = 10)]
    max_urls: usize,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = 12.0)]
    request_timeout_secs: f64,

    /// Log progress every N carriers
    #[arg(long, default_value_t = 10)]
    progress_every: usize,
}

impl Cli {
    fn filter_params(&self) -> FilterParams {
        FilterParams::new(
            &self.regions,
            &self.cargo_classes,
            self.size_metric,
            self.min_size,
        )
    }

    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        Ok(PipelineConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff: secs("--retry-backoff-secs", self.retry_backoff_secs)?,
            },
            pacing: Pacing {
                min: secs("--delay-min-secs", self.delay_min_secs)?,
                max: secs("--delay-max-secs", self.delay_max_secs)?,
            },
            inconclusive: InconclusivePolicy::from_max_runs(self.inconclusive_max_runs),
            progress_every: self.progress_every,
        })
    }

    fn verifier_settings(&self) -> anyhow::Result<VerifierSettings> {
        Ok(VerifierSettings {
            name_approval: !self.no_name_approval,
            search_url: self.search_url.clone(),
            max_urls: self.max_urls,
            request_timeout: secs("--request-timeout-secs", self.request_timeout_secs)?,
            ..VerifierSettings::default()
        })
    }
}

fn secs(flag: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("{flag}: invalid duration {value}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    info!("towcheck v{}", env!("CARGO_PKG_VERSION"));

    // The filter step runs to completion; an interrupt during it is seen afterwards.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next row boundary");
            let _ = shutdown_tx.send(true);
        }
    });

    let params = cli.filter_params();
    let filtered = ensure_filtered(&cli, &params)?;
    if cli.filter_only || stop_requested(&shutdown_rx) {
        display::print_filter_card(&params, filtered.as_ref(), &cli.filtered);
        return Ok(());
    }

    let records = load_records(&cli.filtered)
        .with_context(|| format!("loading {}", cli.filtered.display()))?;

    let verifier = WebVerifier::new(cli.verifier_settings()?).context("configuring verifier")?;
    let checkpoint = JsonlCheckpoint::open(&cli.checkpoint)
        .with_context(|| format!("opening checkpoint {}", cli.checkpoint.display()))?;
    let output = CsvOutput::open(&cli.output)
        .with_context(|| format!("opening output {}", cli.output.display()))?;
    let mut pipeline = Pipeline::new(verifier, checkpoint, output, cli.pipeline_config()?)?;

    let started = Instant::now();
    let summary = pipeline
        .run(&records, shutdown_rx)
        .await
        .context("verification run failed")?;

    display::print_run_card(
        &summary,
        pipeline.output().len(),
        &cli.output,
        started.elapsed(),
    );
    Ok(())
}

/// Regenerate the filtered table if it is missing, stale, or `--refilter`
/// was given. Returns the filter counts when it ran.
fn ensure_filtered(cli: &Cli, params: &FilterParams) -> anyhow::Result<Option<FilterSummary>> {
    let Some(reason) = refilter_reason(cli.refilter, &cli.filtered, params) else {
        info!(path = %cli.filtered.display(), "filtered table is up to date");
        return Ok(None);
    };

    info!(reason, "filtering census");
    let summary = filter_census(&cli.raw, &cli.filtered, params)
        .with_context(|| format!("filtering {}", cli.raw.display()))?;
    Ok(Some(summary))
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    let stop = *shutdown.borrow();
    if stop {
        info!("interrupted during filtering; skipping verification");
    }
    stop
}

fn refilter_reason(forced: bool, filtered: &Path, params: &FilterParams) -> Option<&'static str> {
    if forced {
        return Some("--refilter given");
    }
    if !filtered.exists() {
        return Some("filtered table missing");
    }
    match stored_filter_params(filtered) {
        Ok(Some(stored)) if stored == *params => None,
        Ok(Some(_)) => Some("filter parameters changed"),
        Ok(None) => Some("filtered table has no stored parameters"),
        Err(e) => {
            warn!(path = %filtered.display(), error = %e, "unreadable filtered table");
            Some("filtered table unreadable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["towcheck"]).unwrap();
        assert_eq!(cli.filter_params(), FilterParams::default());
        assert_eq!(cli.filtered, PathBuf::from("towing_candidates.parquet"));
        assert_eq!(cli.checkpoint, PathBuf::from("processed_dots.jsonl"));

        let config = cli.pipeline_config().unwrap();
        assert_eq!(config, PipelineConfig::default());

        let settings = cli.verifier_settings().unwrap();
        assert!(settings.name_approval);
        assert_eq!(settings.max_urls, 10);
        assert_eq!(settings.request_timeout, Duration::from_secs(12));
    }

    #[test]
    fn filter_flags() {
        let cli = Cli::try_parse_from([
            "towcheck",
            "--regions",
            "ma,ct",
            "--cargo-classes",
            "CRGO_DRIVETOW,CRGO_MOTOVEH",
            "--size-metric",
            "power-units",
            "--min-size",
            "10",
        ])
        .unwrap();
        let params = cli.filter_params();
        assert!(params.region_matches("MA"));
        assert!(!params.region_matches("NY"));
        assert_eq!(params.cargo_classes.len(), 2);
        assert_eq!(params.size_metric, SizeMetric::PowerUnits);
        assert_eq!(params.min_size, 10.0);
    }

    #[test]
    fn run_flags() {
        let cli = Cli::try_parse_from([
            "towcheck",
            "--inconclusive-max-runs",
            "2",
            "--no-name-approval",
            "--delay-min-secs",
            "0.5",
            "--delay-max-secs",
            "1",
        ])
        .unwrap();
        let config = cli.pipeline_config().unwrap();
        assert_eq!(config.inconclusive, InconclusivePolicy::MaxRuns(2));
        assert_eq!(config.pacing.min, Duration::from_millis(500));
        assert!(!cli.verifier_settings().unwrap().name_approval);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let cli = Cli::try_parse_from(["towcheck", "--retry-backoff-secs=-1"]).unwrap();
        assert!(cli.pipeline_config().is_err());
    }

    #[test]
    fn unknown_size_metric_is_rejected() {
        assert!(Cli::try_parse_from(["towcheck", "--size-metric", "fleet"]).is_err());
    }

    #[test]
    fn interrupt_before_verification_is_honoured() {
        let (tx, rx) = watch::channel(false);
        assert!(!stop_requested(&rx));
        tx.send(true).unwrap();
        assert!(stop_requested(&rx));
    }

    #[test]
    fn refilter_reasons() {
        let params = FilterParams::default();
        let missing = Path::new("/nonexistent/towing_candidates.parquet");
        assert_eq!(refilter_reason(true, missing, &params), Some("--refilter given"));
        assert_eq!(refilter_reason(false, missing, &params), Some("filtered table missing"));
    }
}
