//! CLI entry point for the catalog transformation pipeline.

use anyhow::{Context, Result, anyhow};
use catalog_transform::{
    JsonlHistorySink, Marketplace, Pipeline, PipelineConfig, RowLimitPolicy, TargetSchema,
    TransformRequest, TransformationResult,
};
use catalog_transform::ai::ModelClient;
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[cfg(feature = "ai")]
use catalog_transform::ai::{
    GeminiClient, GeminiConfig, OPENAI_BASE_URL, OPENROUTER_BASE_URL, OpenAiClient, OpenAiConfig,
};
#[cfg(feature = "ai")]
use std::env;

/// Completion backend selectable on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    /// OpenAI chat completions (OPENAI_API_KEY)
    Openai,
    /// OpenRouter, OpenAI-compatible (OPENROUTER_API_KEY)
    Openrouter,
    /// Google Gemini (GEMINI_API_KEY)
    Gemini,
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LLM-driven product CSV transformation for marketplaces",
    long_about = "Rewrites product CSV files into marketplace listing formats, one batch of rows \
                  per model request, keeping the output row count equal to the input.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  OPENAI_API_KEY        API key for --provider openai\n  \
                  OPENROUTER_API_KEY    API key for --provider openrouter\n  \
                  GEMINI_API_KEY        API key for --provider gemini\n\n\
                  EXAMPLES:\n  \
                  # Amazon inventory file from a product export\n  \
                  catalog-transform -i products.csv -m amazon\n\n  \
                  # Several files at once, truncated to 200 rows each\n  \
                  catalog-transform -i a.csv -i b.csv -m meta --max-rows 200 --truncate\n\n  \
                  # Custom schema, JSON result\n  \
                  catalog-transform -i products.csv --schema my_schema.json --json"
)]
struct Args {
    /// CSV file to transform (repeat for several files)
    #[arg(short, long, required_unless_present = "list_marketplaces")]
    input: Vec<PathBuf>,

    /// Target marketplace (amazon, walmart, reebelo, meta, tiktok, catch)
    #[arg(short, long, required_unless_present_any = ["schema", "list_marketplaces"])]
    marketplace: Option<String>,

    /// JSON file with a custom target schema, used instead of --marketplace
    #[arg(long, conflicts_with = "marketplace")]
    schema: Option<PathBuf>,

    /// Output directory for transformed files
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Maximum number of input rows per file
    #[arg(long, default_value = "1000")]
    max_rows: usize,

    /// Keep the first --max-rows rows of larger files instead of rejecting them
    #[arg(long)]
    truncate: bool,

    /// Rows per model request
    #[arg(long, default_value = "10")]
    batch_size: usize,

    /// Keep the batch size fixed instead of adapting it to response quality
    #[arg(long)]
    no_adaptive: bool,

    /// Attempts per batch, including the first
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Share of a batch's rows a response must contain to be accepted (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    min_coverage: f64,

    /// Completion backend
    #[arg(long, value_enum, default_value = "openai")]
    provider: Provider,

    /// Model name, overriding the backend default
    #[arg(long)]
    model: Option<String>,

    /// Endpoint URL, overriding the backend default
    #[arg(long)]
    base_url: Option<String>,

    /// Append a JSON line per successful run to this file
    #[arg(long)]
    history: Option<PathBuf>,

    /// List built-in marketplaces and exit
    #[arg(long)]
    list_marketplaces: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings, errors and the result)
    #[arg(short, long)]
    quiet: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    dotenv().ok();

    if args.list_marketplaces {
        print_marketplaces();
        return Ok(());
    }

    for input in &args.input {
        if !input.exists() {
            return Err(anyhow!("Input file not found: {}", input.display()));
        }
    }

    let schema = Arc::new(resolve_schema(&args)?);

    let config = PipelineConfig::builder()
        .output_dir(&args.output)
        .max_rows(args.max_rows)
        .row_limit_policy(if args.truncate {
            RowLimitPolicy::Truncate
        } else {
            RowLimitPolicy::Reject
        })
        .batch_size(args.batch_size)
        .adaptive_batching(!args.no_adaptive)
        .max_attempts(args.max_attempts)
        .min_coverage(args.min_coverage)
        .build()?;

    let pipeline = build_pipeline(&args, config)?;
    let results = run_all(&pipeline, &args.input, &schema);

    if args.json {
        let json = if results.len() == 1 {
            serde_json::to_string_pretty(&results[0])?
        } else {
            serde_json::to_string_pretty(&results)?
        };
        println!("{}", json);
    } else {
        for (input, result) in args.input.iter().zip(&results) {
            print_human_readable_summary(input, result);
        }
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        return Err(anyhow!("{} of {} runs failed", failed, results.len()));
    }
    Ok(())
}

/// Print the built-in marketplace catalog.
///
/// Uses `println!` intentionally: this listing is the command's output.
fn print_marketplaces() {
    println!("{:<10} {:<36} {:>8} {:>9}", "ID", "Format", "Columns", "Required");
    println!("{}", "-".repeat(66));
    for marketplace in Marketplace::ALL {
        let schema = marketplace.target_schema();
        println!(
            "{:<10} {:<36} {:>8} {:>9}",
            marketplace.id(),
            marketplace.display_name(),
            schema.columns.len(),
            schema.required.len()
        );
    }
}

fn resolve_schema(args: &Args) -> Result<TargetSchema> {
    if let Some(path) = &args.schema {
        let schema = TargetSchema::from_json_file(path)
            .with_context(|| format!("Loading schema from {}", path.display()))?;
        schema.validate()?;
        info!("Using custom schema '{}' from {}", schema.name, path.display());
        return Ok(schema);
    }

    let name = args
        .marketplace
        .as_deref()
        .ok_or_else(|| anyhow!("Either --marketplace or --schema is required"))?;
    let marketplace: Marketplace = name.parse()?;
    Ok(marketplace.target_schema())
}

/// Build the pipeline around the selected backend.
fn build_pipeline(args: &Args, config: PipelineConfig) -> Result<Pipeline> {
    let client = build_client(args)?;
    info!(
        "Using {} ({})",
        client.name(),
        client.model().unwrap_or("default model")
    );

    let mut builder = Pipeline::builder().config(config).model_client(client);

    if let Some(path) = &args.history {
        builder = builder.history_sink(Arc::new(JsonlHistorySink::new(path)));
    }

    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }

    Ok(builder.build()?)
}

#[cfg(feature = "ai")]
fn build_client(args: &Args) -> Result<Arc<dyn ModelClient>> {
    let api_key = |var: &str| {
        env::var(var).with_context(|| format!("{} is not set (environment or .env)", var))
    };

    let client: Arc<dyn ModelClient> = match args.provider {
        Provider::Openai | Provider::Openrouter => {
            let (key_var, default_url, default_model) = match args.provider {
                Provider::Openrouter => (
                    "OPENROUTER_API_KEY",
                    OPENROUTER_BASE_URL,
                    Some("openai/gpt-4o"),
                ),
                _ => ("OPENAI_API_KEY", OPENAI_BASE_URL, None),
            };
            let mut config = OpenAiConfig::builder()
                .base_url(args.base_url.as_deref().unwrap_or(default_url));
            if let Some(model) = args.model.as_deref().or(default_model) {
                config = config.model(model);
            }
            Arc::new(OpenAiClient::with_config(api_key(key_var)?, config.build())?)
        }
        Provider::Gemini => {
            let mut config = GeminiConfig::builder();
            if let Some(model) = &args.model {
                config = config.model(model);
            }
            if let Some(url) = &args.base_url {
                config = config.base_url(url);
            }
            Arc::new(GeminiClient::with_config(api_key("GEMINI_API_KEY")?, config.build())?)
        }
    };
    Ok(client)
}

/// Fallback when the "ai" feature is disabled
#[cfg(not(feature = "ai"))]
fn build_client(_args: &Args) -> Result<Arc<dyn ModelClient>> {
    Err(anyhow!(
        "No model backend compiled in. Rebuild with --features ai."
    ))
}

/// Transform every input, one scoped thread per file.
fn run_all(
    pipeline: &Pipeline,
    inputs: &[PathBuf],
    schema: &Arc<TargetSchema>,
) -> Vec<TransformationResult> {
    if let [input] = inputs {
        return vec![pipeline.run(TransformRequest::from_path(input, schema.clone()))];
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|input| {
                let request = TransformRequest::from_path(input, schema.clone());
                scope.spawn(move || pipeline.run(request))
            })
            .collect();

        handles
            .into_iter()
            .zip(inputs)
            .map(|(handle, input)| {
                handle.join().unwrap_or_else(|_| {
                    error!("Worker for {} panicked", input.display());
                    TransformationResult::failure(
                        String::new(),
                        schema.name.clone(),
                        &catalog_transform::TransformError::Output(format!(
                            "worker for {} panicked",
                            input.display()
                        )),
                        0,
                    )
                })
            })
            .collect()
    })
}

/// Print a human-readable summary of one run.
fn print_human_readable_summary(input: &std::path::Path, result: &TransformationResult) {
    println!();
    println!("{}", "=".repeat(80));
    if result.success {
        println!("TRANSFORMATION COMPLETE ({})", result.marketplace);
    } else {
        println!("TRANSFORMATION FAILED ({})", result.marketplace);
    }
    println!("{}", "=".repeat(80));
    println!();

    println!("Input:  {}", input.display());
    if let Some(path) = &result.output_path {
        println!("Output: {}", path.display());
    }
    println!("Run:    {}", result.run_id);
    println!();

    if let Some(error) = &result.error {
        println!(
            "Error [{}]: {}",
            result.error_code.as_deref().unwrap_or("UNKNOWN"),
            error
        );
        println!("{}", "=".repeat(80));
        return;
    }

    println!("Summary:");
    println!("  Duration: {}ms", result.elapsed_ms);
    println!("  Rows: {} -> {}", result.input_rows, result.output_rows);

    if let Some(summary) = &result.summary {
        println!(
            "  Batches: {} ({} retried, {} failed, {} model calls)",
            summary.batches.len(),
            summary.retried_batches,
            summary.failed_batches,
            summary.total_attempts
        );
        if summary.duplicated_rows + summary.placeholder_rows + summary.truncated_rows > 0 {
            println!(
                "  Repairs: {} duplicated, {} placeholder, {} dropped rows",
                summary.duplicated_rows, summary.placeholder_rows, summary.truncated_rows
            );
        }
        println!(
            "  Confidence: {} high, {} partial, {} failed",
            summary.confidence.high, summary.confidence.partial, summary.confidence.failed
        );
        if !summary.missing_columns.is_empty() {
            println!("  Columns left blank by the model: {}", summary.missing_columns.join(", "));
        }
        println!();

        if !summary.warnings.is_empty() {
            println!("Warnings:");
            for warning in &summary.warnings {
                println!("  ! {}", warning);
            }
            println!();
        }
    }

    println!("Use --json for machine-readable output");
    println!("{}", "=".repeat(80));
}
