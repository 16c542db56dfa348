use anyhow::Context;
use ffmpeg_next::{self as ffmpeg};
use tracing::{debug, info, warn};

use rtmp_ingest::engine::{SessionSettings, StreamEngine};
use rtmp_ingest::event::EngineEvent;
use rtmp_ingest::{discovery, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load()?;
    ffmpeg::init().context("failed to initialize FFmpeg")?;
    if config.ffmpeg_debug {
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Debug);
    }

    let url = match config.url.clone() {
        Some(url) => url,
        None => match discovery::resolve_endpoint(config.port, &config.app) {
            Some(url) => url,
            None => {
                warn!("no qualifying network interface found, not ready to ingest");
                return Ok(());
            }
        },
    };

    let output_path = config.output_path();
    info!(%url, output = %output_path.display(), "starting ingest session");

    let mut handle = StreamEngine::start(SessionSettings {
        url,
        output_path: output_path.to_string_lossy().into_owned(),
        timeout_secs: config.timeout_secs,
    });

    loop {
        tokio::select! {
            event = handle.events().recv() => {
                match event {
                    Ok(event) => report_event(event),
                    // Worker gone and queue drained: session is over.
                    Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping session");
                handle.stop();
            }
        }
    }

    handle.join();
    Ok(())
}

/// Stand-in for the UI collaborator: renders engine events as log lines.
fn report_event(event: EngineEvent) {
    match event {
        EngineEvent::InfoMessage(text) => info!("{text}"),
        EngineEvent::UrlResolved(url) => info!(%url, "ingest endpoint"),
        EngineEvent::ConnectionStatusChanged(connected) => {
            info!(connected, "connection status changed");
        }
        EngineEvent::VideoFrameReady(image) => {
            debug!(width = image.width, height = image.height, "preview frame");
        }
        EngineEvent::AudioPcmReady(chunk) => {
            debug!(
                bytes = chunk.data.len(),
                rate = chunk.sample_rate,
                channels = chunk.channels,
                "pcm chunk"
            );
        }
        EngineEvent::SpectrumUpdated(frame) => {
            debug!(bins = frame.peak.len(), "spectrum updated");
        }
    }
}
