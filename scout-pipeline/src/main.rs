use anyhow::{bail, Context, Result};
use clap::Parser;
use scout_pipeline::history::HistoryDatabase;
use scout_pipeline::pipeline::ProgressCallback;
use scout_pipeline::worker::ProcessWorker;
use scout_pipeline::{AnalysisService, Phase, PipelineResult, RequestInput, ServiceConfig};
use scout_sdk::{log_failure, log_info, log_phase_console, log_success, log_warning};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "scout",
    about = "Analyze a product category for market opportunity"
)]
struct Args {
    /// Product category to analyze
    category: Option<String>,

    /// Target market code
    #[arg(short, long, default_value = "US")]
    market: String,

    /// Budget tier: low, medium, high
    #[arg(short, long, default_value = "medium")]
    budget: String,

    /// Business model, e.g. amazon_fba, dropshipping, private_label
    #[arg(long, default_value = "amazon_fba")]
    model: String,

    /// Extra keywords, comma separated
    #[arg(short, long, value_delimiter = ',')]
    keywords: Vec<String>,

    /// Worker command that executes dispatches
    #[arg(short, long, default_value = "scout-worker")]
    worker: PathBuf,

    /// Argument passed to the worker command (repeatable)
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    worker_args: Vec<String>,

    /// YAML service configuration (defaults to SCOUT_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Write structured pipeline events to stderr
    #[arg(long, action = clap::ArgAction::SetTrue)]
    events: bool,

    /// List the N most recent analyses and exit
    #[arg(long, value_name = "N")]
    history: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServiceConfig::from_env().context("Invalid SCOUT_* environment configuration")?,
    };

    if let Some(limit) = args.history {
        return show_history(&config, limit);
    }

    let Some(category) = args.category.clone() else {
        bail!("a product category is required (or pass --history N)");
    };

    let worker = ProcessWorker::new(&args.worker).with_args(args.worker_args.clone());
    let service = AnalysisService::builder(Arc::new(worker), config)
        .emit_events(args.events)
        .build()?;

    let input = RequestInput {
        category,
        target_market: args.market.clone(),
        budget_range: args.budget.clone(),
        business_model: args.model.clone(),
        keywords: args.keywords.clone(),
    };

    if !args.json {
        println!("🔎 Product Opportunity Analysis");
        println!("========================================\n");
    }

    let quiet = args.json;
    let progress: ProgressCallback = Arc::new(move |phase: Phase, message: &str| {
        if !quiet {
            log_phase_console!(phase, message);
        }
    });

    let result = service.analyze_input(input, Some(progress)).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.to_dict())?);
    } else {
        print_summary(&result);
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(result: &PipelineResult) {
    println!("\n========================================");

    if !result.success {
        log_failure!(result
            .error
            .as_deref()
            .unwrap_or("Analysis failed"));
        if let Some(category) = result.error_category {
            println!("  category: {}", category);
        }
        return;
    }

    if result.cached {
        log_info!("Served from cache");
    }
    log_success!(
        "Analysis completed in {:.1}s (session {})",
        result.execution_time.as_secs_f64(),
        result.session_id
    );
    for (stage, seconds) in &result.phase_times {
        println!("  • {}: {:.1}s", stage, seconds);
    }

    if let (Some(evaluation), Some(request)) =
        (result.state.evaluation_result(), result.state.request())
    {
        println!();
        println!(
            "{}",
            evaluation.summary(request.category(), request.target_market())
        );
        if evaluation.key_risks.is_empty() {
            log_warning!("No key risks were identified; review the report before acting");
        }
    }

    if let Some(report) = result.report_text() {
        println!("\n{}", report);
    }
}

fn show_history(config: &ServiceConfig, limit: usize) -> Result<()> {
    let path = config
        .history_db
        .clone()
        .unwrap_or_else(HistoryDatabase::default_path);
    let db = HistoryDatabase::new(&path)?;

    let records = db.recent(limit)?;
    if records.is_empty() {
        log_info!("No analyses recorded in {}", path.display());
        return Ok(());
    }

    for record in &records {
        let status = if record.success { "✓" } else { "✗" };
        let score = record
            .opportunity_score
            .map(|s| format!("{}/100", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {}  {} ({})  score {}  {}",
            status,
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.category,
            record.target_market,
            score,
            record.recommendation.as_deref().unwrap_or("-")
        );
    }

    let stats = db.statistics()?;
    println!(
        "\n{} analyses, {:.1}% successful",
        stats.total,
        stats.success_rate * 100.0
    );
    Ok(())
}
