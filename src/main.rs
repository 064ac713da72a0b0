// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use clipwatch::config::{load_config, Config};
use clipwatch::types::{GenerationConfig, RenderingConfig, DEFAULT_PROMPT};
use clipwatch::{
    ClipsTransport, HttpTransport, JobId, JobMonitor, JobParameters, JobState, MonitorError,
    MonitorSettings, Renderer, Subscription, TerminalRenderer,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_ENV: &str = "CLIPWATCH_LOG";

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Job completed
    pub const SUCCESS: i32 = 0;
    /// Job reported `failed`
    pub const JOB_FAILED: i32 = 1;
    /// Usage error - missing URL or job id
    pub const USAGE: i32 = 64;
    /// Service unavailable - submission rejected or unreachable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Temporary failure - stream ended early or retries exhausted
    pub const TEMP_FAIL: i32 = 75;
    /// Configuration error - missing API key or bad config file
    pub const CONFIG: i32 = 78;
    /// Stopped with Ctrl+C
    pub const CANCELLED: i32 = 130;
}

use exit_codes::*;

#[derive(Parser)]
#[command(name = "clipwatch")]
#[command(version = VERSION)]
#[command(about = "Generate short clips from videos and follow the job until it finishes.")]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging (same as CLIPWATCH_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a clip job and stream its progress
    ///
    /// Examples:
    ///   clipwatch generate https://www.youtube.com/watch?v=...
    ///   clipwatch generate --clips 3 --max-seconds 45 --fallback-poll
    #[command(alias = "g")]
    Generate {
        /// Source video URL (prompted for when omitted)
        url: Option<String>,
        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,
        #[arg(long, default_value = "moments")]
        template: String,
        /// Number of clips to generate
        #[arg(long, default_value_t = 1)]
        clips: u32,
        #[arg(long, default_value_t = 0)]
        min_seconds: u32,
        #[arg(long, default_value_t = 30)]
        max_seconds: u32,
        #[arg(long, default_value = "9:16")]
        aspect_ratio: String,
        #[arg(long)]
        no_subtitles: bool,
        /// Ask for a single JSON response instead of an event stream
        #[arg(long)]
        no_stream: bool,
        /// Switch to polling if the stream ends before the job finishes
        #[arg(long)]
        fallback_poll: bool,
    },

    /// Check an existing job every 30 seconds until it finishes
    ///
    /// Examples:
    ///   clipwatch status 3f1c2a...
    #[command(alias = "s")]
    Status {
        /// Job id printed by `generate` (prompted for when omitted)
        job_id: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("clipwatch=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_banner(title: &str) {
    println!("{}", "=".repeat(40));
    println!("  {}", title.cyan().bold());
    println!("{}", "=".repeat(40));
}

/// Input provider: the CLI argument, or an interactive prompt.
fn ask_for(value: Option<String>, question: &str) -> Result<Option<String>> {
    let answer = match value {
        Some(v) => v,
        None => inquire::Text::new(question)
            .prompt()
            .context("Failed to read input")?,
    };
    let answer = answer.trim().to_string();
    Ok(if answer.is_empty() { None } else { Some(answer) })
}

fn exit_code_for(error: &MonitorError) -> i32 {
    match error {
        MonitorError::FatalSubmission(_) => SERVICE_UNAVAILABLE,
        MonitorError::IncompleteStream { .. } | MonitorError::RetriesExhausted { .. } => TEMP_FAIL,
        MonitorError::SubmissionCancelled => CANCELLED,
    }
}

/// Drain a subscription into the renderer and map the end to an exit code.
async fn follow<T: ClipsTransport>(
    monitor: &JobMonitor<T>,
    mut subscription: Subscription,
    fallback_poll: bool,
    polling: bool,
    renderer: &mut impl Renderer,
) -> Result<i32> {
    let mut polling = polling;
    let mut checks = 0u64;

    loop {
        match subscription.next_event().await {
            Some(Ok(observation)) => {
                if polling {
                    checks += 1;
                    println!();
                    println!("Check #{}", checks);
                }
                renderer.render(&observation).context("Failed to write output")?;

                match observation.state {
                    JobState::Completed => return Ok(SUCCESS),
                    JobState::Failed => return Ok(JOB_FAILED),
                    _ if polling => println!(
                        "Waiting {} seconds before next check...",
                        monitor.settings().poll_interval.as_secs()
                    ),
                    _ => {}
                }
            }
            Some(Err(error)) => {
                if fallback_poll {
                    if let Some(next) = monitor.resume_polling(&error) {
                        let notice = "Stream ended early, switching to status checks...";
                        println!("{}", notice.yellow());
                        subscription = next;
                        polling = true;
                        continue;
                    }
                }
                eprintln!("{}", error);
                return Ok(exit_code_for(&error));
            }
            None => {
                println!();
                println!("Stopped by user.");
                return Ok(CANCELLED);
            }
        }
    }
}

fn build_monitor(config: &Config) -> Result<JobMonitor<HttpTransport>, i32> {
    let transport = HttpTransport::from_config(config).map_err(|e| {
        eprintln!("{}", e);
        CONFIG
    })?;
    let monitor = JobMonitor::new(transport, MonitorSettings::from_config(config));

    let shutdown = monitor.shutdown_token();
    if let Err(e) = ctrlc::set_handler(move || shutdown.cancel()) {
        tracing::warn!("Could not install Ctrl+C handler: {}", e);
    }
    Ok(monitor)
}

fn run(cli: Cli) -> Result<i32> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            return Ok(CONFIG);
        }
    };

    match cli.command {
        Commands::Generate {
            url,
            prompt,
            template,
            clips,
            min_seconds,
            max_seconds,
            aspect_ratio,
            no_subtitles,
            no_stream,
            fallback_poll,
        } => {
            print_banner("Clip Generator");
            let monitor = match build_monitor(&config) {
                Ok(monitor) => monitor,
                Err(code) => return Ok(code),
            };
            let Some(url) = ask_for(url, "Enter the video URL:")? else {
                eprintln!("Error: No URL provided.");
                return Ok(USAGE);
            };

            let params = JobParameters {
                video_urls: vec![url],
                prompt,
                generation_config: GenerationConfig {
                    template,
                    num_generations: clips,
                    min_duration_seconds: min_seconds,
                    max_duration_seconds: max_seconds,
                },
                rendering_config: RenderingConfig {
                    subtitles: !no_subtitles,
                    aspect_ratio,
                },
                stream: !no_stream,
            };

            println!();
            println!("Starting clip generation...");
            println!("{}", "-".repeat(40));

            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let code = runtime.block_on(async {
                let subscription = match monitor.start_and_monitor(params).await {
                    Ok(subscription) => subscription,
                    Err(error) => {
                        eprintln!("{}", error);
                        return Ok(exit_code_for(&error));
                    }
                };
                let mut renderer = TerminalRenderer::stdout();
                follow(&monitor, subscription, fallback_poll, false, &mut renderer).await
            })?;

            println!("{}", "-".repeat(40));
            println!("Done!");
            Ok(code)
        }
        Commands::Status { job_id } => {
            print_banner("Job Status Checker");
            let monitor = match build_monitor(&config) {
                Ok(monitor) => monitor,
                Err(code) => return Ok(code),
            };
            let Some(job_id) = ask_for(job_id, "Enter the Job ID:")? else {
                eprintln!("Error: No Job ID provided.");
                return Ok(USAGE);
            };

            println!();
            println!("{}", "-".repeat(40));
            println!("Press Ctrl+C to stop checking");
            println!("{}", "-".repeat(40));

            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let code = runtime.block_on(async {
                let subscription = monitor.monitor_existing(JobId::new(job_id));
                let mut renderer = TerminalRenderer::stdout();
                follow(&monitor, subscription, false, true, &mut renderer).await
            })?;

            println!("{}", "-".repeat(40));
            println!("Done!");
            Ok(code)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            JOB_FAILED
        }
    };
    std::process::exit(code);
}
