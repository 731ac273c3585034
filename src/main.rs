use groundwork::chunking::Chunker;
use groundwork::cli::{Cli, Commands, ConfigAction};
use groundwork::config::Config;
use groundwork::error::{GroundworkError, Result};
use groundwork::extract::extract_pages;
use groundwork::models::TenantId;
use groundwork::retrieval::{QueryMode, RetrievalEngine, RetrievalResult, SearchQuery};
use groundwork::tokenizer::AnalyzerTokenizer;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Query {
            query,
            tenant,
            docs,
            k,
            mode,
            min_score,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let options = QueryOptions { k, mode, min_score };
            cmd_query(config, &query, &tenant, &docs, options, json).await?;
        }
        Commands::Ingest { docs, tenant } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ingest(config, &tenant, &docs).await?;
        }
        Commands::Chunk { file, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_chunk(config, &file, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "groundwork=debug"
    } else {
        "groundwork=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| GroundworkError::Io {
        source: e,
        context: format!("Failed to read document: {:?}", path),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Ingest every document, reporting failures without aborting the rest
async fn ingest_all(engine: &RetrievalEngine, tenant: &TenantId, docs: &[PathBuf]) -> Result<()> {
    for path in docs {
        let bytes = read_file(path)?;
        let filename = file_name(path);
        match engine.ingest(tenant, &bytes, &filename).await {
            Ok(id) => tracing::info!("Ingested {} as {}", filename, id),
            Err(e) => eprintln!("✗ {}: {}", filename, e),
        }
    }
    Ok(())
}

/// Ranking options of the query command
struct QueryOptions {
    k: Option<usize>,
    mode: QueryMode,
    min_score: Option<f32>,
}

async fn cmd_query(
    config: Config,
    query: &str,
    tenant: &str,
    docs: &[PathBuf],
    options: QueryOptions,
    json: bool,
) -> Result<()> {
    let k = options.k.unwrap_or(config.retrieval.default_k);
    let engine = RetrievalEngine::from_config(config)?;
    let tenant = TenantId::new(tenant);

    ingest_all(&engine, &tenant, docs).await?;

    let mut search = SearchQuery::new(query, k).with_mode(options.mode);
    if let Some(min_score) = options.min_score {
        search = search.with_min_score(min_score);
    }
    let result = engine.search(&tenant, &search).await?;

    if json {
        let output = serde_json::to_string_pretty(&result).map_err(|e| GroundworkError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", output);
    } else {
        print_result(&result);
    }

    Ok(())
}

fn print_result(result: &RetrievalResult) {
    if result.is_empty() {
        println!("No passages found for: {}", result.query);
        return;
    }

    println!("{} passages for \"{}\" ({})", result.len(), result.query, result.mode);
    for (rank, passage) in result.passages.iter().enumerate() {
        let sparse = passage
            .sparse_rank
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        let dense = passage
            .dense_rank
            .map_or_else(|| "-".to_string(), |r| r.to_string());

        println!();
        println!(
            "{}. [{}] score {:.5} (sparse #{}, dense #{})",
            rank + 1,
            passage.source_citation,
            passage.fused_score,
            sparse,
            dense
        );
        println!("   {}", passage.preview(240));
    }
}

async fn cmd_ingest(config: Config, tenant: &str, docs: &[PathBuf]) -> Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    let tenant = TenantId::new(tenant);

    ingest_all(&engine, &tenant, docs).await?;

    for document in engine.documents(&tenant).await {
        println!(
            "{}  {}  {} pages  {}",
            document.id, document.filename, document.page_count, document.status
        );
    }

    let stats = engine.stats(&tenant).await;
    println!();
    println!("Tenant: {}", tenant);
    println!("  Documents indexed: {}", stats.document_count);
    println!("  Documents failed:  {}", stats.failed_document_count);
    println!("  Chunks:            {}", stats.chunk_count);

    Ok(())
}

fn cmd_chunk(config: Config, file: &Path, json: bool) -> Result<()> {
    let bytes = read_file(file)?;
    let pages = extract_pages(&bytes, &file_name(file))?;

    let chunker = Chunker::new(config.chunking, Arc::new(AnalyzerTokenizer::new()))
        .map_err(|e| GroundworkError::Config(format!("Invalid sentence boundary: {}", e)))?;
    let drafts = chunker.chunk_all(&pages)?;

    if json {
        let items: Vec<serde_json::Value> = drafts
            .iter()
            .map(|draft| {
                serde_json::json!({
                    "position": draft.position,
                    "page": draft.source_page,
                    "tokens": draft.token_count,
                    "text": draft.text,
                })
            })
            .collect();
        let output = serde_json::to_string_pretty(&items).map_err(|e| GroundworkError::Json {
            source: e,
            context: "Failed to serialize chunks".to_string(),
        })?;
        println!("{}", output);
        return Ok(());
    }

    println!("{} pages, {} chunks", pages.len(), drafts.len());
    for draft in &drafts {
        println!();
        println!(
            "#{} (p. {}, {} tokens)",
            draft.position, draft.source_page, draft.token_count
        );
        println!("{}", draft.text);
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let mut value = serde_json::to_value(&config).map_err(|e| GroundworkError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            if let Some(section) = section {
                value = value.get(&section).cloned().ok_or_else(|| {
                    GroundworkError::Config(format!("Unknown config section: {}", section))
                })?;
            }

            let json = serde_json::to_string_pretty(&value).map_err(|e| GroundworkError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
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

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
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
            "Config file not found, using defaults. Run 'groundwork config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
