//! Run command implementation

use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Cli, CliError, OutputFormat};
use crate::fetcher::shared_resources::{global_host_limiters, global_http_client};
use crate::fetcher::{FetchTarget, RateLimitedFetcher, UrlTemplate};
use crate::registry::{SourceProfile, SourceRegistry};
use crate::resume::{CheckpointStore, ResumeLock};
use crate::runner::config::{ChunkPolicy, MAX_CONCURRENCY};
use crate::runner::{
    PhaseOutcome, PhaseReport, ResumableBatchRunner, TemplatePagedWork, TemplateWork,
};
use crate::shutdown::SharedShutdown;
use crate::sink::{JsonlStore, Sink, ID_FIELD};

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// How the work list is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// One request per id
    Item,
    /// One request per chunk of ids, halving on oversized requests
    Chunk,
    /// Walk an offset-paginated listing
    Pages,
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Phase name recorded in the checkpoint
    #[arg(long)]
    pub phase: String,

    /// Collection the documents are written to
    #[arg(long)]
    pub collection: String,

    /// URL template; `{id}` is replaced per item, `/path` joins the source base URL
    #[arg(long)]
    pub url: String,

    /// File with one id per line (`#` starts a comment)
    #[arg(long, conflicts_with = "ids_from")]
    pub ids: Option<PathBuf>,

    /// Take ids from a previously harvested collection
    #[arg(long)]
    pub ids_from: Option<String>,

    /// Field holding the id in `--ids-from` documents
    #[arg(long, default_value = ID_FIELD)]
    pub ids_field: String,

    /// Fetch mode
    #[arg(long, value_enum, default_value = "item")]
    pub mode: RunMode,

    /// Source profile supplying base URL and pacing defaults
    #[arg(long)]
    pub source: Option<String>,

    /// Concurrent fetches in item mode (max: 32)
    #[arg(long, default_value = "1", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Query parameter carrying each id in chunk mode
    #[arg(long, default_value = "ids[]")]
    pub chunk_param: String,

    /// Initial chunk size
    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    /// Chunk size floor
    #[arg(long, default_value = "10")]
    pub min_batch_size: usize,

    /// JSON pointer selecting the stored node (e.g. /data)
    #[arg(long)]
    pub result_pointer: Option<String>,

    /// Field keying array elements
    #[arg(long, default_value = "id")]
    pub id_field: String,

    /// Follow limit/offset pagination inside each item
    #[arg(long, default_value_t = false)]
    pub paginate: bool,

    /// Page size for `--paginate` and page mode
    #[arg(long, default_value = "100")]
    pub page_size: usize,

    /// Extra body substring marking a 2xx response as a block page
    #[arg(long = "block-marker")]
    pub block_markers: Vec<String>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let registry;
        let profile: Option<&SourceProfile> = match &self.source {
            Some(name) => {
                registry = SourceRegistry::load_embedded()?;
                Some(registry.get(name)?)
            }
            None => None,
        };

        let template = UrlTemplate::new(profile.map(|p| p.base_url()), &self.url)?;
        if self.mode != RunMode::Pages && self.mode != RunMode::Chunk && !template.has_placeholder()
        {
            warn!(url = template.as_str(), "URL template has no {{id}} placeholder");
        }

        let fetcher = self.build_fetcher(cli, profile, &template)?;

        let checkpoint_path = cli.checkpoint_path();
        let _lock = ResumeLock::try_acquire(&checkpoint_path)?;

        let sink = Arc::new(cli.open_store()?);
        let store: Arc<dyn CheckpointStore> = Arc::new(cli.checkpoint_store());
        info!(
            store = %store.describe(),
            sink = %sink.dir().display(),
            "Opening checkpoint"
        );

        let mut runner = ResumableBatchRunner::open(store, sink.clone() as Arc<dyn Sink>)?
            .with_concurrency(self.concurrency)
            .with_shutdown(shutdown);
        let progress = (cli.output_format == OutputFormat::Human).then(create_progress_bar);
        if let Some(bar) = &progress {
            runner = runner.with_progress_bar(bar.clone());
        }

        let report = match self.mode {
            RunMode::Pages => {
                let mut work = TemplatePagedWork::new(
                    fetcher,
                    template.as_str(),
                    &self.collection,
                    self.page_size,
                )
                .with_id_field(&self.id_field);
                if let Some(pointer) = &self.result_pointer {
                    work = work.with_result_pointer(pointer);
                }
                runner.run_pages(&self.phase, &work).await?
            }
            RunMode::Item | RunMode::Chunk => {
                let ids = self.load_ids(&sink)?;
                let mut work = match self.mode {
                    RunMode::Chunk => {
                        TemplateWork::chunked(fetcher, template, &self.collection, &self.chunk_param)
                    }
                    _ => TemplateWork::per_item(fetcher, template, &self.collection),
                }
                .with_id_field(&self.id_field);
                if let Some(pointer) = &self.result_pointer {
                    work = work.with_result_pointer(pointer);
                }
                if self.paginate {
                    work = work.with_pagination(self.page_size);
                }

                if self.mode == RunMode::Chunk {
                    let policy = ChunkPolicy {
                        initial_batch_size: self.batch_size,
                        min_batch_size: self.min_batch_size,
                        ..ChunkPolicy::default()
                    };
                    runner.run_chunks(&self.phase, &ids, &work, &policy).await?
                } else {
                    runner.run_items(&self.phase, &ids, &work).await?
                }
            }
        };

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        match cli.output_format {
            OutputFormat::Json => output_json(&report)?,
            OutputFormat::Human => output_human(&report),
        }

        if report.outcome == PhaseOutcome::Stalled {
            return Err(CliError::PhaseStalled(report.phase));
        }
        Ok(())
    }

    fn build_fetcher(
        &self,
        cli: &Cli,
        profile: Option<&SourceProfile>,
        template: &UrlTemplate,
    ) -> Result<RateLimitedFetcher, CliError> {
        let config = cli.delay_config(profile)?;
        let host = FetchTarget::get(template.render("probe")).host()?;
        let limiter = global_host_limiters().limiter_for(&host, config);

        let mut markers: Vec<String> = profile
            .map(|p| p.block_markers().to_vec())
            .unwrap_or_default();
        markers.extend(self.block_markers.iter().cloned());

        info!(
            host = %host,
            source = profile.map(|p| p.name()).unwrap_or("-"),
            block_markers = markers.len(),
            "Fetcher ready"
        );
        Ok(RateLimitedFetcher::new(global_http_client(), limiter).with_block_markers(markers))
    }

    fn load_ids(&self, sink: &JsonlStore) -> Result<Vec<String>, CliError> {
        let ids = match (&self.ids, &self.ids_from) {
            (Some(path), None) => read_id_file(path)?,
            (None, Some(collection)) => sink.ids(collection, &self.ids_field)?,
            _ => {
                return Err(CliError::InvalidArgument(
                    "item and chunk modes need --ids FILE or --ids-from COLLECTION".to_string(),
                ))
            }
        };

        if ids.is_empty() {
            warn!(phase = %self.phase, "Work list is empty");
        } else {
            info!(phase = %self.phase, items = ids.len(), "Work list loaded");
        }
        Ok(ids)
    }
}

/// Read one id per line, skipping blanks, comments and repeats.
pub fn read_id_file(path: &Path) -> Result<Vec<String>, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliError::InvalidArgument(format!("Failed to read id file {}: {e}", path.display()))
    })?;

    let mut seen = std::collections::HashSet::new();
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect())
}

fn output_json(report: &PhaseReport) -> Result<(), CliError> {
    let line = serde_json::to_string(report)
        .map_err(|e| CliError::InvalidArgument(format!("Failed to serialize report: {e}")))?;
    println!("{line}");
    Ok(())
}

fn output_human(report: &PhaseReport) {
    match report.outcome {
        PhaseOutcome::Skipped => println!("\nPhase {} already completed, nothing to do.", report.phase),
        PhaseOutcome::Interrupted => {
            println!("\nPhase {} interrupted; progress saved.", report.phase)
        }
        PhaseOutcome::Stalled => eprintln!("\nPhase {} stopped on a failed page.", report.phase),
        PhaseOutcome::Completed => println!("\nPhase {} completed.", report.phase),
    }
    println!("{}", report.summary());
}

/// Create progress bar with style
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
