mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use livecast_core::{bootstrap::load_config, logging};
use livecast_livestream::{
    notifier_from_config, OrchestratorSettings, SegmentStore, StreamOrchestrator,
};

use server::LivecastServer;

/// Live stream transcoding server
#[derive(Parser, Debug)]
#[command(name = "livecast")]
#[command(about = "Transcodes live streams into segmented HTTP playback", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "LIVECAST_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Livecast server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Prepare the segment store
    let store = Arc::new(SegmentStore::new(&config.segment_store.root));
    store.ensure_root().await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to create segment store {}: {e}",
            store.root().display()
        )
    })?;
    if config.segment_store.purge_stale_on_startup {
        if let Err(e) = store.purge_stale().await {
            // Non-fatal: stale files are overwritten or purged later
            warn!("Failed to sweep stale segment store files: {}", e);
        }
    }
    info!("Segment store: {}", store.root().display());

    // 4. Notifications and orchestration
    let notifier = notifier_from_config(&config.control_plane);
    let orchestrator = StreamOrchestrator::spawn(
        store,
        OrchestratorSettings::from(&config.transcoder),
        notifier,
    );
    info!(
        ffmpeg = %config.transcoder.ffmpeg_path,
        segment_duration = config.transcoder.segment_duration_seconds,
        playlist_size = config.transcoder.playlist_size,
        "Stream orchestrator initialized"
    );

    // 5. Serve until shutdown
    LivecastServer::new(Arc::new(config), orchestrator)
        .start()
        .await
}
