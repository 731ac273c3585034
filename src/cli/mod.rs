//! CLI command definitions and parsing
use crate::retrieval::QueryMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "groundwork",
    version,
    about = "Tenant-scoped hybrid retrieval over your documents",
    long_about = "Groundwork ingests PDF and text documents into per-tenant BM25 and vector indexes \
                  and answers questions with ranked, citable source passages fused from both signals."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/groundwork/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file (e.g., "keyword", "offline")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest documents and answer a query against them
    Query {
        /// Search query text
        query: String,

        /// Tenant the documents belong to
        #[arg(short, long, default_value = "default")]
        tenant: String,

        /// Document to ingest before querying (repeatable)
        #[arg(short, long = "doc", value_name = "FILE", required = true)]
        docs: Vec<PathBuf>,

        /// Maximum number of passages (defaults to retrieval.default_k)
        #[arg(short)]
        k: Option<usize>,

        /// Which rankings to use
        #[arg(short, long, value_enum, default_value_t = QueryMode::Hybrid)]
        mode: QueryMode,

        /// Drop passages whose fused score is below this value
        #[arg(long, value_name = "SCORE")]
        min_score: Option<f32>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ingest documents and report per-document status and corpus stats
    Ingest {
        /// Documents to ingest
        #[arg(required = true)]
        docs: Vec<PathBuf>,

        /// Tenant the documents belong to
        #[arg(short, long, default_value = "default")]
        tenant: String,
    },

    /// Show how a document would be chunked
    Chunk {
        /// Document to chunk
        file: PathBuf,

        /// Show chunks in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query() {
        let cli = Cli::try_parse_from([
            "groundwork",
            "query",
            "--tenant",
            "school-a",
            "--doc",
            "a.pdf",
            "--doc",
            "b.txt",
            "-k",
            "3",
            "--mode",
            "sparse",
            "--min-score",
            "0.01",
            "What produces ATP?",
        ])
        .unwrap();

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
                assert_eq!(query, "What produces ATP?");
                assert_eq!(min_score, Some(0.01));
                assert_eq!(tenant, "school-a");
                assert_eq!(docs.len(), 2);
                assert_eq!(k, Some(3));
                assert_eq!(mode, QueryMode::Sparse);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_query_requires_doc() {
        assert!(Cli::try_parse_from(["groundwork", "query", "atp"]).is_err());
    }
}
