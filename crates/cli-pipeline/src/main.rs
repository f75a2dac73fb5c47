//! CLI entry point for the Mediaflow processing pipeline
//!
//! Parses command line arguments, loads configuration, and runs one
//! pipeline pass or the watch loop.

use clap::Parser;
use mediaflow::{is_available, Config, PipelineRunner};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Mediaflow - multi-stage media file processing pipeline
#[derive(Parser, Debug)]
#[command(name = "mediaflow")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mediaflow.toml")]
    config: PathBuf,

    /// Keep scanning on the configured interval instead of a single pass
    #[arg(long, default_value = "false")]
    watch: bool,

    /// Skip the transcoder availability preflight check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config from {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        warn!("skipping preflight checks (--skip-checks enabled)");
    } else {
        let executable = if config.transcode.executable_path.is_empty() {
            None
        } else {
            Some(config.transcode.executable_path.as_str())
        };
        if !is_available(executable).await {
            error!(
                "transcoder not available (looked for '{}'); install ffmpeg or set transcode.executable_path",
                if config.transcode.executable_path.is_empty() {
                    "ffmpeg"
                } else {
                    config.transcode.executable_path.as_str()
                }
            );
            return ExitCode::FAILURE;
        }
    }

    info!(
        roots = ?config.source.roots,
        output = %config.state.output_dir.display(),
        "mediaflow starting"
    );

    let runner = PipelineRunner::new(config);
    let _server_handle = runner.start_metrics_server();
    let _updater_handle = runner.start_metrics_updater();

    let outcome = if args.watch {
        runner.watch().await.map(|_| true)
    } else {
        runner.run_once().await.map(|report| {
            for (stage, summary) in &report.stage_summaries {
                info!(stage = %stage, "{}", summary);
            }
            report.completed
        })
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("pipeline pass did not complete");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("runner error: {}", e);
            ExitCode::FAILURE
        }
    }
}
