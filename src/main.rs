use regsearch::artifact::{artifact_path, read_header};
use regsearch::cli::{Cli, Commands, ConfigAction};
use regsearch::config::{Config, ConfigValidator};
use regsearch::corpus::Corpus;
use regsearch::embedding::{EmbeddingProvider, FastEmbedProvider};
use regsearch::error::{RegsearchError, Result};
use regsearch::retrieval::{
    FusionStrategy, HybridSearcher, IndexBuilder, IndexRegistry, MethodRetriever, QualityBooster,
    RetrievalMethod, SearchMethod, SearchRequest, SearchResponse, SearchSettings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Build { corpus } => {
            cmd_build(cli.config, cli.profile, corpus)?;
        }
        Commands::Query {
            query,
            method,
            top_k,
            fusion,
            json,
        } => {
            cmd_query(cli.config, cli.profile, query, method, top_k, fusion, json)?;
        }
        Commands::Inspect => {
            cmd_inspect(cli.config, cli.profile)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "regsearch=debug"
    } else {
        "regsearch=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RegsearchError::io(e, "Failed to create tokio runtime"))
}

fn cmd_build(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    corpus_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let corpus_path = expand_path(corpus_path.as_deref().unwrap_or(config.corpus.path.as_path()))?;
    let corpus = Arc::new(Corpus::load(&corpus_path)?);

    if corpus.is_empty() {
        tracing::warn!(
            "Corpus {} is empty; every query will return no results",
            corpus_path.display()
        );
    }

    let provider: Option<Arc<dyn EmbeddingProvider>> =
        match FastEmbedProvider::new(&config.embedding.model) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                tracing::warn!("Embedding model unavailable, skipping dense index: {}", e);
                None
            }
        };
    let builder = IndexBuilder::from_config(&config, expand_path(&config.artifacts.dir)?);

    let rt = runtime()?;
    let generation = rt.block_on(builder.build(Arc::clone(&corpus), provider))?;
    builder.persist(&generation)?;

    println!("✓ Built indices for {} chunks", corpus.len());
    if let Some(MethodRetriever::Dense(dense)) =
        generation.retriever(RetrievalMethod::Dense).map(|r| r.as_ref())
    {
        if let Some(reason) = dense.unavailable_reason() {
            println!("  Dense: skipped ({})", reason);
        }
    }
    println!("  Corpus: {}", corpus.fingerprint());
    println!("  Artifacts: {}", builder.artifacts_dir().display());
    Ok(())
}

fn cmd_query(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    query: String,
    method: SearchMethod,
    top_k: Option<usize>,
    fusion: Option<FusionStrategy>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let corpus = Arc::new(Corpus::load(&expand_path(&config.corpus.path)?)?);

    // Only load the model when the dense method is actually requested
    let provider: Option<Arc<dyn EmbeddingProvider>> =
        if method.methods().contains(&RetrievalMethod::Dense) {
            match FastEmbedProvider::new(&config.embedding.model) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    tracing::warn!("Embedding model unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

    let builder = IndexBuilder::from_config(&config, expand_path(&config.artifacts.dir)?);
    let generation = builder.load(corpus, provider)?;

    let mut boosting = config.boosting.clone();
    if let Some(rules_file) = &boosting.rules_file {
        boosting.rules_file = Some(expand_path(rules_file)?);
    }
    let searcher = HybridSearcher::new(
        Arc::new(IndexRegistry::new(generation)),
        QualityBooster::from_config(&boosting)?,
        SearchSettings::from_config(&config)?,
    );

    let mut request = SearchRequest::new(query)
        .with_method(method)
        .with_top_k(top_k.unwrap_or(config.retrieval.default_top_k));
    if let Some(strategy) = fusion {
        request = request.with_fusion(strategy);
    }

    let rt = runtime()?;
    let response = rt.block_on(searcher.search(&request))?;

    if json {
        let out = serde_json::to_string_pretty(&response)
            .map_err(|e| RegsearchError::json(e, "Failed to serialize response"))?;
        println!("{}", out);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    println!(
        "{} results for \"{}\" ({}, {}, {:.3}s)",
        response.total_results,
        response.query,
        response.method,
        response.fusion_strategy.as_str(),
        response.processing_time_seconds
    );

    let statuses: Vec<String> = response
        .method_statuses
        .iter()
        .map(|(method, status)| format!("{}={}", method, status))
        .collect();
    println!("Methods: {}", statuses.join(", "));

    for (rank, item) in response.results.iter().enumerate() {
        let methods: Vec<&str> = item.contributing_methods.iter().map(|m| m.as_str()).collect();
        println!();
        println!(
            "{:>2}. [{:.4}] {} ({})",
            rank + 1,
            item.score,
            item.chunk_id,
            methods.join("+")
        );
        if !item.metadata.source.is_empty() {
            let page = item
                .metadata
                .page
                .map(|p| format!(" p.{}", p))
                .unwrap_or_default();
            println!("    {}{}", item.metadata.source, page);
        }
        if item.boost_factor != 1.0 {
            println!(
                "    boost x{:.2} ({})",
                item.boost_factor,
                item.boost_rules.join(", ")
            );
        }
        println!("    {}", preview(&item.content, 200));
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

fn cmd_inspect(config_path: Option<PathBuf>, profile: Option<String>) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let dir = expand_path(&config.artifacts.dir)?;

    println!("Artifacts in {}", dir.display());
    for method in RetrievalMethod::ALL {
        let path = artifact_path(&dir, method);
        match read_header(&path, method) {
            Ok(header) => {
                println!("\n{}", method);
                println!("  Format:     v{}", header.format_version);
                println!("  Built:      {}", header.built_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Corpus:     {}", header.corpus);
                println!("  Generator:  {}", header.generator);
                println!("  Parameters: {}", header.parameters);
            }
            Err(RegsearchError::ArtifactNotFound { .. }) if method == RetrievalMethod::Dense => {
                println!("\n{}: not built (queries run lexical-only)", method);
            }
            Err(RegsearchError::ArtifactNotFound { .. }) => {
                println!("\n{}: missing (run 'regsearch build')", method);
            }
            Err(e) => println!("\n{}: unreadable ({})", method, e),
        }
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = toml::Value::try_from(&config)?;

            let shown = match &section {
                Some(name) => value.get(name).cloned().ok_or_else(|| {
                    RegsearchError::InvalidConfigValue {
                        path: name.clone(),
                        message: "No such section".to_string(),
                    }
                })?,
                None => value,
            };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match profile {
                Some(profile) => Config::load_with_profile(&path, &profile)?,
                None => Config::load(&path)?,
            };
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let mut config = Config::default();
            let data_dir = Config::default_data_dir()?;
            config.corpus.path = data_dir.join("chunks.jsonl");
            config.artifacts.dir = data_dir.join("indexes");
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Corpus:    {}", config.corpus.path.display());
            println!("  Artifacts: {}", config.artifacts.dir.display());
        }
        ConfigAction::Path => {
            println!("{}", Config::default_path()?.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'regsearch config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RegsearchError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            RegsearchError::Config("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
