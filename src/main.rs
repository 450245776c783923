//! # Deep Research Agent
//!
//! Command-line front end for the fault-tolerant research pipeline.
//!
//! A query goes through clarification, a research brief, an initial draft, a
//! supervised research loop (brain, parallel researchers, quality evaluation, red
//! team, pruning) and finally analysis and report writing. Every LLM and tool call
//! is retried, circuit-broken and concurrency-limited, so a flaky model or search
//! API degrades the report instead of aborting it.
//!
//! ## Quick Start
//! ```bash
//! export TAVILY_API_KEY=tvly-...
//! cargo run -- "How close is fault-tolerant quantum computing?"
//! cargo run -- --stream "Solid-state battery commercialization"
//! ```

/// Configuration management
mod config;

/// Pipeline wiring
mod agent;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use research_pipeline::{MasterWorkflow, PipelineOutcome, ResearchInput};

use crate::config::Config;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "deep-research-agent",
    version,
    about = "Fault-tolerant deep research: iterative search, critique and report writing",
    long_about = r#"
Deep Research Agent

Researches a question with local LLMs (via Ollama) and Tavily web search, refining
a draft over several supervised iterations before writing a cited report.

PREREQUISITES:
  1. Install Ollama and pull a model: ollama pull llama3.2
  2. Set TAVILY_API_KEY

EXAMPLES:
  deep-research-agent "State of RISC-V in data centers"
  deep-research-agent --stream --max-iterations 5 "mRNA vaccine platforms beyond COVID"
  deep-research-agent --brief "Compare grid-scale storage options" "Grid storage"
  deep-research-agent --state-dir ./runs --research-id grid-1 "Grid storage economics"
"#
)]
struct Args {
    /// The research question, or the topic when --brief is given
    #[arg(value_name = "QUERY")]
    query: String,

    /// Print progress events as NDJSON while the run proceeds
    #[arg(short = 's', long = "stream", default_value = "false")]
    stream: bool,

    /// Skip clarification and drafting; research QUERY as a topic with this brief
    #[arg(short = 'b', long = "brief", value_name = "BRIEF")]
    brief: Option<String>,

    /// Supervisor iterations (overrides MAX_ITERATIONS)
    #[arg(long = "max-iterations", env = "MAX_ITERATIONS")]
    max_iterations: Option<usize>,

    /// Stop once the draft scores at least this, 0-10 (overrides MIN_QUALITY_THRESHOLD)
    #[arg(long = "quality-threshold", env = "MIN_QUALITY_THRESHOLD")]
    quality_threshold: Option<f64>,

    /// Identifier for the persisted run
    #[arg(long = "research-id")]
    research_id: Option<String>,

    /// Directory for persisted research state (overrides STATE_DIR)
    #[arg(long = "state-dir", env = "STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Default Ollama model (overrides OLLAMA_MODEL)
    #[arg(short = 'm', long = "model", env = "OLLAMA_MODEL")]
    model: Option<String>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(iterations) = self.max_iterations {
            config.max_iterations = iterations;
        }
        if let Some(threshold) = self.quality_threshold {
            config.min_quality_threshold = threshold;
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = Some(dir.clone());
        }
    }
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    args.apply(&mut config);
    init_logging(args.verbose, &config.log_level)?;
    config.validate()?;

    info!(
        model = %config.model,
        host = %config.ollama_host,
        max_iterations = config.max_iterations,
        quality_threshold = config.min_quality_threshold,
        "Configuration loaded"
    );

    let master = std::sync::Arc::new(agent::build_master(&config)?);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling research");
            ctrl_c.cancel();
        }
    });

    if args.stream && args.brief.is_none() {
        return stream(&master, &args.query, &cancel).await;
    }

    let result = match &args.brief {
        Some(brief) => {
            let mut input = ResearchInput::new(args.query.clone(), brief.clone());
            input.max_iterations = config.max_iterations;
            input.min_quality_threshold = config.min_quality_threshold;
            let persist = config.state_dir.is_some();
            master
                .execute_research(input, args.research_id.clone(), persist, &cancel)
                .await
        }
        None => match &args.research_id {
            Some(id) => master.run_with_id(&args.query, id, &cancel).await,
            None => master.run(&args.query, &cancel).await,
        },
    };

    match result {
        Ok(outcome) => print_outcome(outcome),
        Err(e) => {
            error!(error = %e, "Research failed");
            eprintln!("\nResearch failed: {}", e);
            if e.to_string().contains("onnection refused") {
                eprintln!("Tip: make sure Ollama is running (ollama serve)");
            }
            Err(e.into())
        }
    }
}

/// Print each progress event as one NDJSON line
async fn stream(master: &std::sync::Arc<MasterWorkflow>, query: &str, cancel: &CancellationToken) -> Result<()> {
    let mut events = master.stream_pipeline(query, cancel);
    while let Some(event) = events.next().await {
        print!("{}", event.to_ndjson()?);
        if event.is_terminal() {
            break;
        }
    }
    Ok(())
}

fn print_outcome(outcome: PipelineOutcome) -> Result<()> {
    match outcome {
        PipelineOutcome::Completed(report) => {
            println!("\n{}", "=".repeat(60));
            println!("{}", report.to_markdown());
            println!("{}", "=".repeat(60));
            info!(
                quality = report.quality_score,
                status = %report.completion_status,
                "Research completed"
            );
        }
        PipelineOutcome::NeedsClarification { question } => {
            println!("The request needs clarification:\n\n  {}\n", question);
            println!("Re-run with your answer appended, e.g. \"<query> clarification_provided: <answer>\"");
        }
        PipelineOutcome::Cancelled { phase } => {
            eprintln!("Research cancelled during {:?}", phase);
        }
    }
    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// `--verbose` forces debug level; otherwise `RUST_LOG` (or "info") applies.
fn init_logging(verbose: bool, log_level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
