//! # Agent Module
//!
//! Wires real collaborators into the research pipeline:
//! - One Ollama-backed Rig agent per model role, wrapped in `RigAgentAdapter`
//! - Tavily web search and the HTTP scraper
//! - An in-memory knowledge base that collects facts across the run
//! - A file state store when a state directory is configured

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use rig::client::{CompletionClient, ProviderClient};
use rig::providers::ollama;

use research_pipeline::{
    CircuitRegistry, DependencyGuard, FileStateStore, HashingEmbedder, HttpScraper, LLMProvider,
    MasterWorkflow, MemoryVectorStore, ModelRole, ModelRouter, PipelineConfig, RigAgentAdapter,
    TavilySearchClient, ToolKit,
};

use crate::config::Config;

/// Roles that may run on a model other than the default
const ROUTED_ROLES: [ModelRole; 4] = [
    ModelRole::Brain,
    ModelRole::Evaluator,
    ModelRole::RedTeam,
    ModelRole::Pruner,
];

/// Build the master workflow for `config`.
pub fn build_master(config: &Config) -> Result<MasterWorkflow> {
    let pipeline = config.pipeline_config();
    let tools = build_toolkit(config, &pipeline)?;

    let mut master = MasterWorkflow::new(tools, &pipeline);
    if let Some(dir) = &config.state_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
        info!(dir = %dir.display(), "Persisting research state to disk");
        master = master.with_state_store(Arc::new(FileStateStore::new(dir.clone())));
    }
    Ok(master)
}

fn build_toolkit(config: &Config, pipeline: &PipelineConfig) -> Result<Arc<ToolKit>> {
    let api_key = config
        .tavily_api_key
        .clone()
        .context("TAVILY_API_KEY must be set for web research")?;

    let registry = CircuitRegistry::new(pipeline.circuit.clone());
    let max_concurrent = pipeline.gate.max_concurrent_tasks;
    let router = build_router(config, pipeline, &registry);

    let toolkit = ToolKit::new(
        Arc::new(router),
        Arc::new(TavilySearchClient::new(api_key).with_retry_policy(pipeline.retry.clone())),
        Arc::new(HttpScraper::new().context("Failed to build HTTP scraper")?),
        &registry,
        max_concurrent,
    )
    .with_vector_store(Arc::new(MemoryVectorStore::new()))
    .with_embedder(Arc::new(HashingEmbedder::default()));

    Ok(Arc::new(toolkit))
}

fn build_router(
    config: &Config,
    pipeline: &PipelineConfig,
    registry: &CircuitRegistry,
) -> ModelRouter {
    // Rig's Ollama client reads its base URL from the environment
    std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
    let client = ollama::Client::from_env();

    let models = pipeline.models.clone();
    let mut agents: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
    let mut provider_for = |model: &str| -> Arc<dyn LLMProvider> {
        agents
            .entry(model.to_string())
            .or_insert_with(|| {
                debug!(model, host = %config.ollama_host, "Building Ollama agent");
                let agent = client.agent(model).build();
                let provider: Arc<dyn LLMProvider> =
                    Arc::new(RigAgentAdapter::with_names(agent, "ollama", model));
                provider
            })
            .clone()
    };

    let guard = DependencyGuard::from_registry("llm", registry, pipeline.gate.max_concurrent_tasks);
    let mut router = ModelRouter::new(provider_for(&models.default), guard)
        .with_models(models.clone())
        .with_timeout(pipeline.call_timeout)
        .with_temperature(config.temperature);

    for role in ROUTED_ROLES {
        let model = models.for_role(role);
        if model != models.default {
            router = router.with_provider(role, provider_for(model));
        }
    }

    info!(
        default = %models.default,
        brain = models.for_role(ModelRole::Brain),
        evaluator = models.for_role(ModelRole::Evaluator),
        "Model routing configured"
    );
    router
}
