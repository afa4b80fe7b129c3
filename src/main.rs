use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cloth_seg_rs::config::{Cli, Command, Config, LogFormat};
use cloth_seg_rs::operator::{collect_image_files, segment_files};
use cloth_seg_rs::server::{self, AppState};
use cloth_seg_rs::{Model, Palette, Pipeline, ResultStore, CLOTH_COMPONENTS};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config;
    init_tracing(&config);

    ensure!(
        config.checkpoint_path.exists(),
        "Model path does not exist: {}",
        config.checkpoint_path.display()
    );

    let model = Model::new(&config.checkpoint_path, config.device)
        .with_context(|| format!("loading {}", config.checkpoint_path.display()))?;
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(model),
        Palette::new(CLOTH_COMPONENTS),
        ResultStore::new(config.output_dir.clone()),
        config.inference_permits(),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let state = AppState::new(pipeline, config.token_gate())
                .with_service_info(&config.service_version, &config.environment)
                .with_max_upload_bytes(config.max_upload_bytes);
            server::serve(config.bind_addr, state).await?;
        }
        Command::Segment { input } => {
            ensure!(input.exists(), "Input path does not exist: {}", input.display());
            let files = collect_image_files(&input);

            let progress_bar = ProgressBar::new(files.len() as u64);
            progress_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
                )?
                .progress_chars("#>-"),
            );

            let report = segment_files(&pipeline, &files, &progress_bar).await;
            progress_bar.finish();

            info!(
                processed = report.processed.len(),
                failed = report.failed.len(),
                "segmentation finished"
            );
            ensure!(
                report.failed.is_empty(),
                "{} of {} images failed",
                report.failed.len(),
                files.len()
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `--log-level` when set.
fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let _ = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
