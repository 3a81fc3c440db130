use clap::{Parser, Subcommand};
use kb_rag::Result;
use kb_rag::answer::ModelTier;
use kb_rag::commands::{query, show_status, sync};
use kb_rag::config::{Config, get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kb-rag")]
#[command(about = "Sync a document collection into a vector index and answer questions from it")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, models and ingestion settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Replace the knowledge base with the current contents of the source
    Sync {
        /// Directory of text files or a JSON file; overrides the configured source
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Answer a question from the knowledge base
    Query {
        /// The question to answer
        query: String,
        /// Which configured model answers the question
        #[arg(long, value_enum, default_value_t = ModelTier::Fast)]
        tier: ModelTier,
        /// Number of chunks to retrieve as context
        #[arg(short, long)]
        k: Option<usize>,
        /// Print the answer, sources and context as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the state of the knowledge base
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load_default()?);
            } else {
                run_interactive_config(&get_config_dir().map_err(anyhow::Error::from)?)?;
            }
        }
        Commands::Sync { source } => {
            sync(&Config::load_default()?, source).await?;
        }
        Commands::Query {
            query: question,
            tier,
            k,
            json,
        } => {
            query(&Config::load_default()?, &question, tier, k, json).await?;
        }
        Commands::Status => {
            show_status(&Config::load_default()?).await?;
        }
    }

    Ok(())
}
