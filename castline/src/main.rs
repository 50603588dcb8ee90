use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use castline_ingest::analytics::{
    AnalyticsCollector, JsonLinesMetricSink, MetricSink, NoViewers, TracingMetricSink,
};
use castline_ingest::auth::{KeyAuthenticator, StaticKeyStore};
use castline_ingest::config::{Config, MetricSinkKind};
use castline_ingest::events::BroadcastSessionEvents;
use castline_ingest::logging;
use castline_ingest::retry::RetryPolicy;
use castline_ingest::session::IngestContext;
use castline_ingest::transcoder::{FfmpegLauncher, OutputRetention, TranscoderSupervisor};
use castline_ingest::IngestServer;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "castline")]
#[command(about = "RTMP ingest and live transcoding server", long_about = None)]
struct Args {
    /// Config file (TOML, YAML or JSON)
    #[arg(short, long, env = "CASTLINE_CONFIG")]
    config: Option<String>,

    /// RTMP listen address, overrides server.listen_addr
    #[arg(long, env = "CASTLINE_LISTEN")]
    listen: Option<String>,

    /// Output root for transcoded streams, overrides transcode.output_root
    #[arg(long, env = "CASTLINE_OUTPUT_ROOT")]
    output_root: Option<PathBuf>,

    /// ffmpeg binary, overrides transcode.ffmpeg_path
    #[arg(long, env = "CASTLINE_FFMPEG")]
    ffmpeg: Option<String>,
}

fn node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn metric_sink(config: &Config) -> Result<Arc<dyn MetricSink>> {
    Ok(match config.analytics.sink {
        MetricSinkKind::Tracing => Arc::new(TracingMetricSink),
        MetricSinkKind::Jsonl => {
            let path = config
                .analytics
                .jsonl_path
                .clone()
                .context("analytics.jsonl_path is required for the jsonl sink")?;
            Arc::new(JsonLinesMetricSink::new(path))
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(output_root) = args.output_root {
        config.transcode.output_root = output_root;
    }
    if let Some(ffmpeg) = args.ffmpeg {
        config.transcode.ffmpeg_path = ffmpeg;
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("Config validation error: {problem}");
        }
        anyhow::bail!(
            "Configuration validation failed with {} error(s)",
            problems.len()
        );
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(node = %node_name(), "castline starting");
    if config.keys.is_empty() {
        warn!("no stream keys configured, every publish will be rejected");
    }

    tokio::fs::create_dir_all(&config.transcode.output_root)
        .await
        .with_context(|| {
            format!(
                "failed to create output root {}",
                config.transcode.output_root.display()
            )
        })?;

    let cancel = CancellationToken::new();

    // 3. Transcoding
    let retention = Arc::new(OutputRetention::new(
        config.transcode.retention(),
        config.transcode.retention_sweep_interval(),
    ));
    let retention_task = Arc::clone(&retention).start_cleanup_task(cancel.child_token());
    let supervisor = Arc::new(TranscoderSupervisor::new(
        config.transcode.clone(),
        Arc::new(FfmpegLauncher::new(config.transcode.ffmpeg_path.clone())),
        retention,
    ));

    // 4. Auth, analytics and events
    let authenticator = Arc::new(KeyAuthenticator::new(Arc::new(
        StaticKeyStore::from_config(&config.keys),
    )));
    let analytics = Arc::new(AnalyticsCollector::new(
        metric_sink(&config)?,
        Arc::new(NoViewers),
        config.analytics.sample_interval(),
        RetryPolicy::new(
            config.analytics.write_retries,
            Duration::from_millis(config.analytics.write_retry_base_ms),
        ),
    ));
    let events = BroadcastSessionEvents::new(256);

    let ctx = Arc::new(IngestContext {
        authenticator,
        supervisor: Arc::clone(&supervisor),
        analytics,
        events: Arc::new(events),
        session: config.session.clone(),
        variants: config.transcode.variants.clone(),
    });

    // 5. Serve until a shutdown signal
    let listener = IngestServer::bind(&config.server.listen_addr).await?;
    let server = IngestServer::new(ctx, &config.server);
    let server_cancel = cancel.clone();
    let mut server_task =
        tokio::spawn(async move { server.serve(listener, server_cancel).await });

    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, starting graceful shutdown...");
        }
        result = &mut server_task => {
            error!(?result, "ingest server stopped unexpectedly");
        }
    }

    cancel.cancel();
    if !server_task.is_finished() {
        match server_task.await {
            Ok(Err(e)) => error!(error = %e, "ingest server failed during shutdown"),
            Err(e) => error!(error = %e, "ingest server task panicked"),
            Ok(Ok(())) => {}
        }
    }
    supervisor.shutdown().await;
    if let Err(e) = retention_task.await {
        warn!(error = %e, "retention task ended abnormally");
    }

    info!("castline stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
