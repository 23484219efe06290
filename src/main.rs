use std::path::PathBuf;
use std::process::Command as Process;

use eyre::{Result, WrapErr};
use log::{debug, info};

mod cli;

use cli::{Cli, Command, OutputFormat};
use ytsum::config::Config;
use ytsum::output::{self, Report};
use ytsum::summarize::{LlmClient, Model, summarize_transcript};
use ytsum::transcript::TranscriptCascade;

fn setup_logging(to_stderr: bool) -> Result<()> {
    if to_stderr {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        return Ok(());
    }

    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_dir.join("ytsum.log");

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytsum")
        .join("logs")
}

fn tool_version(name: &str) -> Option<String> {
    Process::new(name)
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .trim()
                .lines()
                .next()
                .unwrap_or("")
                .to_string()
        })
}

fn build_after_help(config: &Config) -> String {
    let browser = &config.transcript.browser;
    let browser_line = match tool_version(browser) {
        Some(v) => format!("  \x1b[32m✅\x1b[0m {browser}  {v}"),
        None => format!("  \x1b[31m❌\x1b[0m {browser}  (not found; needed for the headless browser fallback)"),
    };

    let log_path = log_dir().join("ytsum.log");

    format!(
        "\nOPTIONAL TOOLS:\n{browser_line}\n\nConfig is read from: {}\nLogs are written to: {}",
        ytsum::config::config_path().display(),
        log_path.display()
    )
}

async fn summarize_once(
    config: &Config,
    url: &str,
    model: Model,
    format: OutputFormat,
    output_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let video_id = ytsum::extract_video_id(url).wrap_err_with(|| {
        format!(
            "could not extract video ID from: {url}\n\nSupported formats:\n  https://www.youtube.com/watch?v=ID\n  https://youtu.be/ID\n  https://www.youtube.com/live/ID\n  https://www.youtube.com/embed/ID\n  https://www.youtube.com/shorts/ID\n  <11-character video ID>"
        )
    })?;
    debug!("Video ID: {video_id}");

    let client = ytsum::api::http_client(config)?;
    let cascade = TranscriptCascade::from_config(&client, &config.transcript);
    let llm = LlmClient::from_config(client, config);

    let transcript = cascade.fetch(&video_id).await?;
    let summary = summarize_transcript(&llm, &transcript.text, model).await;
    let report = Report::new(url, model, &transcript, summary);

    if verbose {
        eprintln!("{}", output::render_details(&report));
    }

    let rendered = match format {
        OutputFormat::Text => output::render_text(&report),
        OutputFormat::Json => output::render_json(&report),
    };

    if let Some(ref path) = output_path {
        std::fs::write(path, &rendered)?;
        if verbose {
            eprintln!("Output written to: {}", path.display());
        }
    } else {
        println!("{rendered}");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Help only needs the browser name, so a broken default config is not fatal here
    let help_config = Config::load(None).unwrap_or_default();
    let after_help = build_after_help(&help_config);
    let cmd = <Cli as clap::CommandFactory>::command().after_help(after_help);
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    setup_logging(cli.log_stderr)?;

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            ytsum::api::serve(config).await
        }
        Command::Summarize {
            url,
            model,
            format,
            output,
            no_browser,
            verbose,
        } => {
            if no_browser {
                config.transcript.browser_enabled = false;
            }
            summarize_once(&config, &url, model, format, output, verbose).await
        }
    }
}
