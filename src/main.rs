use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use mailrank::config::Config;
use mailrank::email::EmailRetriever;
use mailrank::embedding::Embedder;
use mailrank::embedding::local::LocalEmbedder;
use mailrank::embedding::openai::OpenAIEmbedder;
use mailrank::logging;
use mailrank::pipeline::{SearchEngine, SearchOptions};
use mailrank::rerank::PairwiseScorer;
use mailrank::rerank::http::HttpScorer;
use mailrank::rerank::local::LocalScorer;
use mailrank::search::MetadataFilter;
use mailrank::vector::chroma::ChromaVectorIndex;

#[derive(Parser)]
#[command(name = "mailrank", version, about = "Hybrid retrieval and reranking for the email assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one search against a collection and print the ranked hits as JSON
    Search {
        collection: String,
        query: String,
        /// Override pipeline.final_top_k
        #[arg(long)]
        top_k: Option<usize>,
        /// Exact-match metadata constraint, repeatable (e.g. --filter email_type=채용)
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
    },
    /// Retrieve classification, importance and reply-template context for an email
    Context {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
        /// Restrict reply templates to this email type
        #[arg(long)]
        email_type: Option<String>,
    },
    /// Show vector index collections and readiness
    Status,
    /// Load the embedding model and every configured reranker, then exit
    Warmup,
    /// Build (if needed) and describe the lexical index for a collection
    LexicalStats { collection: String },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Create the embedder based on configuration.
fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "openai" => {
            let api_key = config.embedding.openai_api_key.clone()
                .ok_or_else(|| anyhow::anyhow!(
                    "OpenAI API key required when provider is 'openai'. \
                     Set MAILRANK_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in mailrank.toml"
                ))?;
            Ok(Arc::new(OpenAIEmbedder::new(
                config.embedding.openai_base_url.clone(),
                api_key,
                config.embedding.openai_model.clone(),
            )?))
        }
        "local" => Ok(Arc::new(LocalEmbedder::new(
            &config.embedding.local_model,
            &config.embedding.cache_dir,
        )?)),
        other => anyhow::bail!("Unknown embedding provider '{}' (expected 'local' or 'openai')", other),
    }
}

/// Create every configured pairwise scorer. A scorer that cannot be built is
/// skipped with a warning; reranking is optional.
fn create_scorers(config: &Config) -> Vec<(String, Arc<dyn PairwiseScorer>)> {
    let mut scorers: Vec<(String, Arc<dyn PairwiseScorer>)> = Vec::new();
    for reranker in &config.rerankers {
        let built: Result<Arc<dyn PairwiseScorer>, _> = match reranker.provider.as_str() {
            "http" => match reranker.base_url.clone() {
                Some(base_url) => HttpScorer::new(
                    base_url,
                    reranker.api_key.clone().unwrap_or_default(),
                    reranker.model.clone(),
                )
                .map(|s| Arc::new(s) as Arc<dyn PairwiseScorer>),
                None => Err(mailrank::errors::RerankerUnavailable::NotConfigured(
                    "http reranker requires base_url".to_string(),
                )),
            },
            "local" => LocalScorer::new(&reranker.model, &config.embedding.cache_dir)
                .map(|s| Arc::new(s) as Arc<dyn PairwiseScorer>),
            other => Err(mailrank::errors::RerankerUnavailable::NotConfigured(format!(
                "unknown reranker provider '{}'",
                other
            ))),
        };
        match built {
            Ok(scorer) => scorers.push((reranker.name.clone(), scorer)),
            Err(e) => tracing::warn!(name = %reranker.name, error = %e, "Reranker not registered"),
        }
    }
    scorers
}

fn build_engine(config: &Config) -> Result<SearchEngine> {
    let embedder = create_embedder(config)?;
    let vector = Arc::new(ChromaVectorIndex::new(&config.vector));
    let mut engine = SearchEngine::new(embedder, vector)
        .with_required_collections(config.vector.required_collections.clone());
    for (name, scorer) in create_scorers(config) {
        engine = engine.with_scorer(name, scorer);
    }
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // stdout carries JSON results; logs go to stderr
    logging::init_logging(&config);

    let engine = build_engine(&config)?;

    match cli.command {
        Commands::Search { collection, query, top_k, filters } => {
            let mut pipeline = config.pipeline.clone();
            if let Some(top_k) = top_k {
                pipeline.final_top_k = top_k;
            }
            engine.warm_up_for(&pipeline).await?;
            let filter: MetadataFilter = filters.into_iter().collect();
            let hits = engine
                .search_with_options(&query, &collection, &pipeline, &SearchOptions::with_filter(filter))
                .await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }

        Commands::Context { subject, body, email_type } => {
            engine.warm_up_for(&config.pipeline).await?;
            let retriever = EmailRetriever::new(Arc::new(engine), config.pipeline.clone());
            let classification = retriever.classification_examples(&subject, &body).await?;
            let importance = retriever.importance_examples(&subject, &body).await?;
            let templates = retriever
                .reply_templates(&subject, &body, email_type.as_deref())
                .await?;
            let output = serde_json::json!({
                "classification_examples": classification,
                "importance": importance,
                "reply_templates": templates,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Status => {
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !status.ready {
                std::process::exit(1);
            }
        }

        Commands::Warmup => {
            engine.warm_up().await?;
            println!("Models loaded.");
        }

        Commands::LexicalStats { collection } => {
            let stats = engine.lexical_stats(&collection).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(parse_key_val("email_type=채용").unwrap(), ("email_type".to_string(), "채용".to_string()));
        assert_eq!(parse_key_val("k=a=b").unwrap(), ("k".to_string(), "a=b".to_string()));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::parse_from(["mailrank", "search", "reply_templates", "interview", "--top-k", "3", "--filter", "email_type=채용"]);
        match cli.command {
            Commands::Search { collection, top_k, filters, .. } => {
                assert_eq!(collection, "reply_templates");
                assert_eq!(top_k, Some(3));
                assert_eq!(filters.len(), 1);
            }
            _ => panic!("expected search"),
        }
    }
}
