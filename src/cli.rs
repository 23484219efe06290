use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ytsum::summarize::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "ytsum",
    about = "YouTube transcript summarization service",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Config file (default: ~/.config/ytsum/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP service
    Serve {
        /// Address to listen on (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Summarize a single video and print the result
    Summarize {
        /// YouTube video URL or video ID
        url: String,

        /// LLM used for summarization: gemini or mistral
        #[arg(short, long, default_value = "gemini")]
        model: Model,

        /// Output format: text (default), json
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write output to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the headless browser fallback
        #[arg(long)]
        no_browser: bool,

        /// Show extraction method and chunk details
        #[arg(short, long)]
        verbose: bool,
    },
}
