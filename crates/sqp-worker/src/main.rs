//! Squash video worker binary.
//!
//! Usage: `sqp-worker <manifest.json>`

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sqp_media::command::{check_ffmpeg, check_ffprobe};
use sqp_ml_client::SegmenterClient;
use sqp_worker::{
    metrics, ConfiguredSegmenterFactory, Manifest, SegmenterBackend, VideoExecutor, WorkerConfig,
};

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("sqp=info".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let manifest_path = std::env::args()
        .nth(1)
        .context("usage: sqp-worker <manifest.json>")?;

    info!("Starting sqp-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    check_ffmpeg().context("ffmpeg is required")?;
    check_ffprobe().context("ffprobe is required")?;

    if let Some(addr) = &config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!(addr = %addr, "Metrics exporter listening");
    }

    if config.segmenter == SegmenterBackend::Remote {
        let client = SegmenterClient::from_env()?;
        if !client.health_check().await? {
            warn!(
                url = %client.config().base_url,
                "Segmentation service is not healthy, tracking will fail until it is"
            );
        }
    }

    let jobs = Manifest::load(&manifest_path)
        .await?
        .into_jobs()
        .await
        .with_context(|| format!("loading {}", manifest_path))?;

    let factory = Arc::new(ConfiguredSegmenterFactory::new(config.segmenter));
    let executor = VideoExecutor::new(config, factory);

    let outcomes = tokio::select! {
        outcomes = executor.run(jobs) => outcomes,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received shutdown signal, abandoning unfinished videos");
            std::process::exit(130);
        }
    };

    let mut failed = 0usize;
    for (video_id, result) in &outcomes {
        match result {
            Ok(outcome) => info!(
                video_id = %video_id,
                dir = %outcome.video_dir.display(),
                runs = outcome.record.timestamps.len(),
                chunks = outcome.record.chunks.len(),
                artifacts = outcome.summary.as_ref().map_or(0, |s| s.artifact_count()),
                "Video done"
            ),
            Err(e) => {
                failed += 1;
                error!(video_id = %video_id, "Video failed: {}", e);
            }
        }
    }

    info!(videos = outcomes.len(), failed, "Worker shutdown complete");
    if failed > 0 {
        anyhow::bail!("{} of {} videos failed", failed, outcomes.len());
    }
    Ok(())
}
