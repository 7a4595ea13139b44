//! # ChunkForge CLI
//!
//! Drive the pipeline from a terminal against the configured vector store.
//!
//! ## Commands
//!
//! - `chunkforge ingest --input <DIR>` - Chunk, embed and load every `.txt` file
//! - `chunkforge chunk --input <DIR> [--output <DIR>]` - Dry run, print chunk counts
//!   per file and optionally write `chunks-{method}-{source}.jsonl`
//! - `chunkforge embed --input <DIR> --output <DIR>` - Chunk and embed without storing,
//!   writing `embeddings-{method}-{source}.jsonl`
//! - `chunkforge query <TEXT>` - Nearest chunks for a question
//! - `chunkforge chat <TEXT>` - Retrieval-augmented answer
//! - `chunkforge get --where source=report` - Fetch stored chunks by metadata
//! - `chunkforge collections` - List collections
//!
//! ```bash
//! chunkforge ingest --input ./corpus --method recursive-split
//! chunkforge query "quarterly revenue" --method recursive-split -k 3 --format json
//! ```

use anyhow::{bail, Context, Result};
use chunkforge_common::embeddings::create_embedding_provider;
use chunkforge_common::generation::create_generator;
use chunkforge_common::vectorstore::create_vector_store;
use chunkforge_common::{assign_id, AppConfig, Chunk, ChunkingMethod, CollectionManager, Embedder, Metadata};
use chunkforge_ingestion::{DocumentSource, IngestionOrchestrator, LocalDirectorySource};
use chunkforge_search::QueryEngine;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

const DEFAULT_QUERY: &str = "Summarize the main findings.";
const DEFAULT_CHAT: &str = "Summarize this document.";

#[derive(Parser)]
#[command(name = "chunkforge")]
#[command(about = "Chunk, embed and search plain-text corpora")]
#[command(version)]
struct Cli {
    /// Path to a config file (default: layered config/ files plus APP__ env)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and load a directory, replacing the method's collection
    Ingest {
        /// Directory of .txt files
        #[arg(short, long)]
        input: PathBuf,

        /// Chunking method
        #[arg(short, long, default_value = "char-split")]
        method: ChunkingMethod,
    },

    /// Chunk a directory without embedding or storing anything
    Chunk {
        /// Directory of .txt files
        #[arg(short, long)]
        input: PathBuf,

        /// Chunking method
        #[arg(short, long, default_value = "char-split")]
        method: ChunkingMethod,

        /// Write one JSONL file of chunks per source into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Chunk and embed a directory, writing JSONL files instead of storing
    Embed {
        /// Directory of .txt files
        #[arg(short, long)]
        input: PathBuf,

        /// Chunking method
        #[arg(short, long, default_value = "char-split")]
        method: ChunkingMethod,

        /// Directory for the embeddings files
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Nearest chunks for a question
    Query {
        /// Question text, prompted for when omitted
        text: Option<String>,

        #[arg(short, long, default_value = "char-split")]
        method: ChunkingMethod,

        /// Number of results
        #[arg(short = 'k', long, default_value = "5")]
        n_results: usize,
    },

    /// Answer a question from retrieved context
    Chat {
        /// Question text, prompted for when omitted
        text: Option<String>,

        #[arg(short, long, default_value = "char-split")]
        method: ChunkingMethod,

        /// Number of context chunks
        #[arg(short = 'k', long, default_value = "10")]
        n_results: usize,
    },

    /// Fetch stored chunks by metadata equality
    Get {
        #[arg(short, long, default_value = "char-split")]
        method: ChunkingMethod,

        /// key=value filter, repeatable
        #[arg(short, long = "where", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Maximum chunks returned
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List collections in the vector store
    Collections,
}

/// Parse a `key=value` filter argument.
fn parse_filter(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn filter_metadata(filters: Vec<(String, String)>) -> Option<Metadata> {
    if filters.is_empty() {
        return None;
    }
    Some(
        filters
            .into_iter()
            .map(|(key, value)| (key, serde_json::Value::String(value)))
            .collect(),
    )
}

/// Pipeline pieces built from configuration.
struct Pipeline {
    ingestion: IngestionOrchestrator,
    engine: QueryEngine,
}

impl Pipeline {
    fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let provider = create_embedding_provider(&config.embedding)?;
        let store = create_vector_store(&config.vector_store)?;
        let generator = create_generator(&config.generation)?;

        let embedder = Arc::new(Embedder::from_config(provider, &config.embedding)?);
        let collections = CollectionManager::new(store, config.vector_store.insert_batch_size);

        let ingestion = IngestionOrchestrator::new(
            embedder.clone(),
            config.embedding.semantic_batch_size,
            collections.clone(),
            config.chunking.clone(),
        )?;
        let engine = QueryEngine::new(
            embedder,
            collections,
            generator,
            config.generation.system_instruction.clone(),
            config.search.max_results,
        );

        Ok(Self { ingestion, engine })
    }
}

#[derive(Serialize)]
struct ChunkCount {
    source: String,
    chunks: usize,
}

#[derive(Serialize)]
struct ChunkLine<'a> {
    chunk: &'a str,
    source: &'a str,
}

#[derive(Serialize)]
struct EmbeddingLine<'a> {
    id: String,
    chunk: &'a str,
    source: &'a str,
    embedding: &'a [f32],
}

/// `<dir>/<kind>-<method>-<source>.jsonl`
fn jsonl_path(dir: &Path, kind: &str, method: ChunkingMethod, source: &str) -> PathBuf {
    dir.join(format!("{}-{}-{}.jsonl", kind, method, source))
}

fn chunk_lines(chunks: &[Chunk]) -> Result<String> {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&serde_json::to_string(&ChunkLine {
            chunk: &chunk.text,
            source: &chunk.source_name,
        })?);
        out.push('\n');
    }
    Ok(out)
}

fn embedding_lines(chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<String> {
    if chunks.len() != embeddings.len() {
        bail!("{} chunks but {} embeddings", chunks.len(), embeddings.len());
    }
    let mut out = String::new();
    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        out.push_str(&serde_json::to_string(&EmbeddingLine {
            id: assign_id(&chunk.source_name, chunk.sequence_index),
            chunk: &chunk.text,
            source: &chunk.source_name,
            embedding,
        })?);
        out.push('\n');
    }
    Ok(out)
}

async fn write_jsonl(path: PathBuf, contents: String) -> Result<()> {
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote JSONL");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy())
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load().context("failed to load configuration")?,
    };
    let pipeline = Pipeline::from_config(&config)?;

    match cli.command {
        Commands::Ingest { input, method } => {
            let documents = LocalDirectorySource::new(input).load().await?;
            let report = pipeline.ingestion.ingest(&documents, method).await?;
            match cli.format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => {
                    println!(
                        "Ingested {} files into {} ({} chunks, {} inserted)",
                        report.total_files,
                        report.collection_name,
                        report.total_chunks,
                        report.total_inserted
                    );
                    for file in &report.processed_files {
                        println!("  {:<32} {:>6} chunks {:>10} bytes", file.source_name, file.chunks_count, file.size_bytes);
                    }
                }
            }
        }
        Commands::Chunk { input, method, output } => {
            let documents = LocalDirectorySource::new(input).load().await?;
            let chunked = pipeline.ingestion.chunk_documents(&documents, method).await?;
            if let Some(dir) = &output {
                tokio::fs::create_dir_all(dir).await?;
                for (document, chunks) in documents.iter().zip(&chunked) {
                    let path = jsonl_path(dir, "chunks", method, &document.source_name);
                    write_jsonl(path, chunk_lines(chunks)?).await?;
                }
            }
            let counts: Vec<ChunkCount> = documents
                .iter()
                .zip(&chunked)
                .map(|(document, chunks)| ChunkCount {
                    source: document.source_name.clone(),
                    chunks: chunks.len(),
                })
                .collect();
            match cli.format {
                OutputFormat::Json => print_json(&counts)?,
                OutputFormat::Text => {
                    for count in &counts {
                        println!("{:<32} {:>6}", count.source, count.chunks);
                    }
                    println!("total {}", counts.iter().map(|c| c.chunks).sum::<usize>());
                }
            }
        }
        Commands::Embed { input, method, output } => {
            let documents = LocalDirectorySource::new(input).load().await?;
            let chunked = pipeline.ingestion.chunk_documents(&documents, method).await?;
            let embedder = pipeline.ingestion.embedder_for(method);
            tokio::fs::create_dir_all(&output).await?;

            let mut counts = Vec::with_capacity(documents.len());
            for (document, chunks) in documents.iter().zip(&chunked) {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let embeddings = embedder.embed_batch(&texts).await?;
                let path = jsonl_path(&output, "embeddings", method, &document.source_name);
                write_jsonl(path, embedding_lines(chunks, &embeddings)?).await?;
                counts.push(ChunkCount {
                    source: document.source_name.clone(),
                    chunks: chunks.len(),
                });
            }
            match cli.format {
                OutputFormat::Json => print_json(&counts)?,
                OutputFormat::Text => {
                    for count in &counts {
                        println!("{:<32} {:>6} embedded", count.source, count.chunks);
                    }
                }
            }
        }
        Commands::Query { text, method, n_results } => {
            let text = question_or_prompt(text, DEFAULT_QUERY)?;
            let results = pipeline.engine.query(&text, method, n_results).await?;
            match cli.format {
                OutputFormat::Json => print_json(&results)?,
                OutputFormat::Text => {
                    for (rank, (document, distance)) in
                        results.documents.iter().zip(&results.distances).enumerate()
                    {
                        let source = results.metadatas[rank]
                            .get("source")
                            .and_then(|v| v.as_str())
                            .unwrap_or("-");
                        println!("{}. [{}] distance {:.4}", rank + 1, source, distance);
                        println!("   {}", document.replace('\n', " "));
                    }
                }
            }
        }
        Commands::Chat { text, method, n_results } => {
            let text = question_or_prompt(text, DEFAULT_CHAT)?;
            let answer = pipeline.engine.chat(&text, method, n_results).await?;
            match cli.format {
                OutputFormat::Json => print_json(&answer)?,
                OutputFormat::Text => {
                    println!("{}", answer.response);
                    println!("\n({} context chunks)", answer.context_chunks_count);
                }
            }
        }
        Commands::Get { method, filters, limit } => {
            let result = pipeline.engine.get(method, filter_metadata(filters), limit).await?;
            match cli.format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Text => {
                    for (id, document) in result.ids.iter().zip(&result.documents) {
                        println!("{}\t{}", id, document.replace('\n', " "));
                    }
                }
            }
        }
        Commands::Collections => {
            let collections = pipeline.engine.list_collections().await?;
            match cli.format {
                OutputFormat::Json => print_json(&collections)?,
                OutputFormat::Text => {
                    for collection in &collections {
                        println!("{}\t{}", collection.name, collection.id);
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Use the given text, or read one line from stdin, falling back to `default`.
fn question_or_prompt(text: Option<String>, default: &str) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }

    eprint!("Question [{}]: ", default);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    resolve_question(&line, default)
}

fn resolve_question(line: &str, default: &str) -> Result<String> {
    let line = line.trim();
    if line.is_empty() {
        if default.is_empty() {
            bail!("no question given");
        }
        return Ok(default.to_string());
    }
    Ok(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            parse_filter("source=report").unwrap(),
            ("source".to_string(), "report".to_string())
        );
        assert_eq!(
            parse_filter("gcs_path=a=b.txt").unwrap(),
            ("gcs_path".to_string(), "a=b.txt".to_string())
        );
        assert!(parse_filter("no-separator").is_err());
        assert!(parse_filter("=value").is_err());
    }

    #[test]
    fn test_filter_metadata() {
        assert!(filter_metadata(Vec::new()).is_none());
        let filter = filter_metadata(vec![("source".into(), "q1".into())]).unwrap();
        assert_eq!(filter["source"], "q1");
    }

    #[test]
    fn test_resolve_question_defaults() {
        assert_eq!(resolve_question("\n", DEFAULT_QUERY).unwrap(), DEFAULT_QUERY);
        assert_eq!(resolve_question("  what grew?  \n", DEFAULT_QUERY).unwrap(), "what grew?");
        assert!(resolve_question("", "").is_err());
    }

    #[test]
    fn test_cli_parses_methods_and_flags() {
        let cli = Cli::try_parse_from([
            "chunkforge",
            "--format",
            "json",
            "query",
            "hello",
            "--method",
            "semantic-split",
            "-k",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Query { text, method, n_results } => {
                assert_eq!(text.as_deref(), Some("hello"));
                assert_eq!(method, ChunkingMethod::SemanticSplit);
                assert_eq!(n_results, 3);
            }
            _ => panic!("expected query"),
        }

        assert!(Cli::try_parse_from(["chunkforge", "query", "x", "--method", "word-split"]).is_err());
    }

    #[test]
    fn test_get_collects_repeated_filters() {
        let cli = Cli::try_parse_from([
            "chunkforge", "get", "--where", "source=a", "--where", "bucket=b", "--limit", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Get { filters, limit, method } => {
                assert_eq!(filters.len(), 2);
                assert_eq!(limit, Some(2));
                assert_eq!(method, ChunkingMethod::CharSplit);
            }
            _ => panic!("expected get"),
        }
    }

    fn chunk(source: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            source_name: source.to_string(),
            sequence_index: index,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_jsonl_path_names() {
        let path = jsonl_path(Path::new("out"), "chunks", ChunkingMethod::RecursiveSplit, "report");
        assert_eq!(path, Path::new("out").join("chunks-recursive-split-report.jsonl"));
    }

    #[test]
    fn test_chunk_lines_one_object_per_chunk() {
        let chunks = vec![chunk("report", 0, "first\npart"), chunk("report", 1, "second")];
        let text = chunk_lines(&chunks).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["chunk"], "first\npart");
        assert_eq!(lines[0]["source"], "report");
        assert_eq!(lines[1]["chunk"], "second");
    }

    #[test]
    fn test_embedding_lines_carry_ids_and_vectors() {
        let chunks = vec![chunk("report", 0, "a"), chunk("report", 1, "b")];
        let embeddings = vec![vec![0.5, 0.25], vec![1.0, 0.0]];
        let text = embedding_lines(&chunks, &embeddings).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines[1]["id"], assign_id("report", 1));
        assert_eq!(lines[1]["source"], "report");
        assert_eq!(lines[0]["embedding"], serde_json::json!([0.5, 0.25]));

        assert!(embedding_lines(&chunks, &embeddings[..1]).is_err());
    }

    #[tokio::test]
    async fn test_write_jsonl_creates_file() {
        let dir = std::env::temp_dir().join(format!("chunkforge-cli-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = jsonl_path(&dir, "chunks", ChunkingMethod::CharSplit, "notes");

        write_jsonl(path.clone(), chunk_lines(&[chunk("notes", 0, "hi")]).unwrap())
            .await
            .unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "{\"chunk\":\"hi\",\"source\":\"notes\"}\n");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn test_cli_parses_embed_and_chunk_output() {
        let cli = Cli::try_parse_from([
            "chunkforge", "embed", "--input", "docs", "--output", "out", "-m", "semantic-split",
        ])
        .unwrap();
        match cli.command {
            Commands::Embed { input, method, output } => {
                assert_eq!(input, PathBuf::from("docs"));
                assert_eq!(output, PathBuf::from("out"));
                assert_eq!(method, ChunkingMethod::SemanticSplit);
            }
            _ => panic!("expected embed"),
        }

        assert!(Cli::try_parse_from(["chunkforge", "embed", "--input", "docs"]).is_err());

        let cli = Cli::try_parse_from(["chunkforge", "chunk", "-i", "docs", "-o", "out"]).unwrap();
        match cli.command {
            Commands::Chunk { output, .. } => assert_eq!(output, Some(PathBuf::from("out"))),
            _ => panic!("expected chunk"),
        }
    }
}
