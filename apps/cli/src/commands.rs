//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use paperscout_core::{
    Assessment, PipelineContext, ProgressReporter, assess_and_acquire, run_discovery,
};
use paperscout_shared::{
    AppConfig, DiscoveryRequest, DiscoveryResponse, EnricherId, ProviderId, QualityThresholds,
    init_config, load_config,
};
use paperscout_storage::{ChunkStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PaperScout: find, merge, and enrich academic literature across catalogs.
#[derive(Parser)]
#[command(
    name = "paperscout",
    version,
    about = "Discover academic literature across CORE, OpenAlex, Europe PMC, and arXiv.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Query options shared by `discover` and `assess`.
#[derive(clap::Args, Clone, Debug)]
pub(crate) struct QueryArgs {
    /// Free-text search query.
    pub query: String,

    /// Maximum merged results.
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Maximum results requested from each provider.
    #[arg(long)]
    pub per_source: Option<usize>,

    /// Earliest publication year.
    #[arg(long)]
    pub year_from: Option<i32>,

    /// Latest publication year.
    #[arg(long)]
    pub year_to: Option<i32>,

    /// Language code (e.g. `en`).
    #[arg(long)]
    pub language: Option<String>,

    /// Providers in priority order (comma-separated). Defaults to all.
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<ProviderId>,

    /// Enrichers to run (comma-separated). Defaults to all.
    #[arg(long, value_delimiter = ',')]
    pub enrich: Vec<EnricherId>,

    /// Only open-access works.
    #[arg(long)]
    pub open_access: bool,

    /// Skip the relaxed-filter retry on empty results.
    #[arg(long)]
    pub no_fallback: bool,

    /// Research domain recorded with stored chunks.
    #[arg(long)]
    pub domain: Option<String>,

    /// Store abstracts only, never download full text.
    #[arg(long)]
    pub abstract_only: bool,
}

impl QueryArgs {
    fn to_request(&self, config: &AppConfig) -> DiscoveryRequest {
        let defaults = &config.defaults;
        DiscoveryRequest {
            query: self.query.clone(),
            research_domain: self
                .domain
                .clone()
                .or_else(|| defaults.research_domain.clone()),
            max_results: self.max_results.unwrap_or(defaults.max_results),
            per_source_limit: self.per_source.unwrap_or(defaults.per_source_limit),
            year_from: self.year_from,
            year_to: self.year_to,
            language: self.language.clone(),
            sources: (!self.sources.is_empty()).then(|| self.sources.clone()),
            enrich_with: (!self.enrich.is_empty()).then(|| self.enrich.clone()),
            open_access_only: self.open_access,
            auto_fallback: defaults.auto_fallback && !self.no_fallback,
            store: defaults.store,
            full_text: self.abstract_only.then_some(false),
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search every selected provider, merge, enrich, and optionally store.
    Discover {
        #[command(flatten)]
        args: QueryArgs,

        /// Acquire text and write chunks to the local store.
        #[arg(long)]
        store: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Score what the local store holds for a query; acquire more if needed.
    Assess {
        #[command(flatten)]
        args: QueryArgs,

        /// Run the discovery pipeline when the quality gate fails.
        #[arg(long)]
        acquire: bool,

        /// Print the assessment as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search stored chunks.
    Search {
        /// Search query.
        query: String,

        /// Maximum hits.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperscout=info,warn",
        1 => "paperscout=debug,info",
        _ => "paperscout=trace,debug",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Discover { args, store, json } => cmd_discover(&args, store, json).await,
        Command::Assess {
            args,
            acquire,
            json,
        } => cmd_assess(&args, acquire, json).await,
        Command::Search { query, limit } => cmd_search(&query, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_discover(args: &QueryArgs, store: bool, json: bool) -> Result<()> {
    let config = load_config()?;
    let ctx = PipelineContext::from_config(&config)?;
    let mut request = args.to_request(&config);
    request.store = request.store || store;

    info!(query = %request.query, store = request.store, "starting discovery");

    let storage = if request.store {
        match open_store(&config).await {
            Ok(storage) => Some(storage),
            Err(e) => {
                warn!(error = %e, "chunk store unavailable");
                None
            }
        }
    } else {
        None
    };

    let reporter = CliProgress::new();
    let response = run_discovery(
        &request,
        &ctx,
        storage.as_ref().map(|s| s as &dyn ChunkStore),
        &reporter,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    match response.error {
        Some(message) if !response.success => Err(eyre!("discovery run failed: {message}")),
        _ => Ok(()),
    }
}

async fn cmd_assess(args: &QueryArgs, acquire: bool, json: bool) -> Result<()> {
    let config = load_config()?;
    let ctx = PipelineContext::from_config(&config)?;
    let request = args.to_request(&config);
    let storage = open_store(&config).await?;

    let reporter = CliProgress::new();
    let assessment = assess_and_acquire(
        &request,
        QualityThresholds::from(&config),
        &storage,
        &ctx,
        acquire,
        &reporter,
    )
    .await?;
    reporter.finish();

    if json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
    } else {
        print_assessment(&assessment);
    }
    Ok(())
}

async fn cmd_search(query: &str, limit: usize) -> Result<()> {
    let config = load_config()?;
    let path = config.storage.resolved_db_path()?;
    let storage = Storage::open_readonly(&path).await?;

    let hits = storage.similarity_search(query, limit).await?;
    if hits.is_empty() {
        println!("No stored chunks match '{query}'.");
        return Ok(());
    }
    for hit in hits {
        let title = hit
            .metadata
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("(untitled)");
        println!(
            "{:.3}  {}  {}",
            hit.certainty.unwrap_or_default(),
            hit.id,
            title
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

async fn open_store(config: &AppConfig) -> Result<Storage> {
    let path = config.storage.resolved_db_path()?;
    Ok(Storage::open(&path).await?)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_response(response: &DiscoveryResponse) {
    println!();
    for (i, doc) in response.documents.iter().enumerate() {
        let year = doc.year().map(|y| y.to_string()).unwrap_or_else(|| "----".into());
        println!("{:>3}. [{year}] {}", i + 1, doc.title());
        if !doc.authors_display.is_empty() {
            println!("     {}", doc.authors_display);
        }
        if !doc.doi().is_empty() {
            println!("     doi:{}  ({})", doc.doi(), doc.source_provider);
        } else {
            println!("     ({})", doc.source_provider);
        }
    }
    println!();
    for stats in response.source_stats.iter().chain(&response.enrichment_stats) {
        println!(
            "  {:<16} fetched {:>4}  errors {:>3}",
            stats.name, stats.fetched_count, stats.error_count
        );
    }
    println!();
    println!("  Run:         {}", response.run_id);
    println!("  Documents:   {}", response.documents.len());
    println!("  Total found: {}", response.total_found);
    if response.relaxed_retry {
        println!("  Filters were relaxed after an empty first pass.");
    }
    if response.stored > 0 {
        println!("  Stored:      {} chunks", response.stored);
    }
    let elapsed = response.completed_at - response.started_at;
    println!(
        "  Time:        {:.1}s",
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    println!();
}

fn print_assessment(assessment: &Assessment) {
    let m = &assessment.metrics;
    println!();
    println!("  Papers in store: {}", assessment.papers);
    println!("  Quantity:  {:.2}", m.quantity_score);
    println!("  Certainty: {:.2}", m.certainty_score);
    println!("  Recency:   {:.2}", m.recency_score);
    println!("  Overall:   {:.2}", m.overall_score);
    if assessment.fallback {
        println!("  Fallback recommended:");
        for reason in &assessment.reasons {
            println!("    - {reason}");
        }
    } else {
        println!("  Stored results meet the quality thresholds.");
    }
    if let Some(run) = &assessment.run {
        println!(
            "  Acquisition run {}: {} documents, {} chunks stored",
            run.run_id,
            run.documents.len(),
            run.stored
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _response: &DiscoveryResponse) {
        self.spinner.finish_and_clear();
    }
}
