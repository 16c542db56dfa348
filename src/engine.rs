use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_channel::{Receiver, Sender};
use ffmpeg_next::{codec, frame, Packet};
use tracing::{debug, error, info, warn};

use crate::convert::{PixelConverter, SampleConverter};
use crate::error::SessionError;
use crate::event::{
    EngineCommand, EngineEvent, EventSink, EVENT_QUEUE_CAPACITY,
};
use crate::session::{rescale_for_remux, IngestSession};
use crate::spectrum::SpectralEstimator;

/// Everything the worker needs to bring one session up.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub url: String,
    pub output_path: String,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Opening,
    Streaming,
    Draining,
    Closed,
    Failed,
}

/// Control surface for a running engine: poll events, send commands, stop.
///
/// Exactly one session is active per handle. The stop flag is polled at the
/// top of every packet iteration, so a stop request is observed within one
/// in-flight packet.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    state: Arc<Mutex<EngineState>>,
    worker: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state lock poisoned")
    }

    /// Requests cancellation. The worker finishes the in-flight packet,
    /// writes the trailer and releases the containers.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn set_audio_output_device(&self, descriptor: impl Into<String>) {
        let _ = self
            .commands
            .try_send(EngineCommand::SetAudioOutputDevice(descriptor.into()));
    }

    /// Waits for the worker thread to finish. Idempotent.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("engine worker thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// The streaming ingest engine. `start` spawns the dedicated worker thread
/// that owns all container, codec and conversion state for the session.
pub struct StreamEngine;

impl StreamEngine {
    pub fn start(settings: SessionSettings) -> EngineHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(EngineState::Idle));
        let (sink, events) = EventSink::bounded(EVENT_QUEUE_CAPACITY);
        let (command_tx, command_rx) = async_channel::unbounded();

        let worker = {
            let stop = Arc::clone(&stop);
            let state = Arc::clone(&state);
            std::thread::Builder::new()
                .name("rtmp-ingest".into())
                .spawn(move || {
                    Worker {
                        settings,
                        stop,
                        commands: command_rx,
                        sink,
                        state,
                        audio_device: None,
                    }
                    .run();
                })
                .expect("failed to spawn engine worker thread")
        };

        EngineHandle {
            stop,
            commands: command_tx,
            events,
            state,
            worker: Some(worker),
        }
    }
}

struct Worker {
    settings: SessionSettings,
    stop: Arc<AtomicBool>,
    commands: Receiver<EngineCommand>,
    sink: EventSink,
    state: Arc<Mutex<EngineState>>,
    audio_device: Option<String>,
}

impl Worker {
    fn transition(&self, next: EngineState) {
        let mut state = self.state.lock().expect("engine state lock poisoned");
        debug!(from = ?*state, to = ?next, "engine state transition");
        *state = next;
    }

    fn run(mut self) {
        self.transition(EngineState::Opening);
        self.sink
            .emit(EngineEvent::UrlResolved(self.settings.url.clone()));
        self.sink.info("Trying to start RTMP stream server.");

        let mut session = match self.open_phase() {
            Ok(session) => session,
            Err(error) => {
                error!(%error, "session open failed");
                self.sink.info(error.to_string());
                self.sink.connection_status(false);
                self.transition(EngineState::Failed);
                return;
            }
        };

        self.transition(EngineState::Streaming);
        self.sink.connection_status(true);
        self.sink.info(format!(
            "Connected, capturing to {}.",
            self.settings.output_path
        ));

        self.stream_loop(&mut session);

        self.transition(EngineState::Draining);
        session.finish();
        drop(session);
        self.sink.connection_status(false);
        self.sink.info("RTMP stream stopped.");
        self.transition(EngineState::Closed);
    }

    /// Open, probe, map, open decoders, write header. Audio decoder failure
    /// downgrades to remux-only instead of failing the session.
    fn open_phase(&mut self) -> Result<IngestSession, SessionError> {
        let mut session = IngestSession::open(
            &self.settings.url,
            self.settings.timeout_secs,
            &self.settings.output_path,
        )?;
        session.map_streams()?;
        session.open_video_decoder()?;
        if let Err(error) = session.open_audio_decoder() {
            debug_assert!(!error.is_fatal());
            warn!(%error, "audio preview disabled");
            self.sink
                .info(format!("Audio preview disabled: {error}"));
        }
        session.write_header()?;
        Ok(session)
    }

    /// Steady-state packet loop. Returns when the source ends, a read or
    /// fatal decode error occurs, or a stop request is observed; the caller
    /// drains and closes in all three cases.
    fn stream_loop(&mut self, session: &mut IngestSession) {
        let roles = session.roles;
        let mut sample_converter = SampleConverter::new();
        let pixel_converter = PixelConverter;
        let mut estimator = SpectralEstimator::new();

        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("stop requested, draining session");
                self.sink.info("Stop requested, finalizing capture.");
                break;
            }
            self.apply_commands();

            // One read per iteration keeps the stop flag check between
            // attempts even while the source only yields EAGAIN.
            let mut packet = Packet::empty();
            match classify_read(packet.read(&mut session.input)) {
                ReadStep::Packet => {}
                ReadStep::Retry => continue,
                ReadStep::EndOfStream => {
                    info!("end of stream");
                    self.sink.info("Input stream ended.");
                    break;
                }
                ReadStep::Failed(error) => {
                    error!(%error, "input read failed, draining session");
                    self.sink.info(format!("Input read failed: {error}."));
                    break;
                }
            }

            let index = packet.stream();
            let Some(input_time_base) = session.input.stream(index).map(|ist| ist.time_base())
            else {
                continue;
            };

            if Some(index) == roles.audio {
                if let Some(decoder) = session.audio_decoder.as_mut() {
                    if decode_audio(
                        decoder,
                        &packet,
                        &mut sample_converter,
                        &mut estimator,
                        &self.sink,
                    )
                    .is_err()
                    {
                        self.sink.info("Audio decoding failed, stopping capture.");
                        break;
                    }
                }
            } else if Some(index) == roles.video {
                if let Some(decoder) = session.video_decoder.as_mut() {
                    if decode_video(decoder, &packet, &pixel_converter, &self.sink).is_err() {
                        self.sink.info("Video decoding failed, stopping capture.");
                        break;
                    }
                }
            }

            // Every mapped stream is remuxed, preview role or not. A write
            // failure is logged and the loop keeps the live preview going.
            if let Some(output_time_base) =
                session.output.stream(index).map(|ost| ost.time_base())
            {
                rescale_for_remux(&mut packet, input_time_base, output_time_base);
                packet.set_stream(index);
                if let Err(error) = packet.write_interleaved(&mut session.output) {
                    warn!(%error, index, "failed to write remuxed packet");
                }
            }
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                EngineCommand::SetAudioOutputDevice(descriptor) => {
                    if self.audio_device.as_deref() != Some(descriptor.as_str()) {
                        info!(%descriptor, "audio output device selected");
                        self.sink
                            .info(format!("Audio output device set to {descriptor}."));
                        self.audio_device = Some(descriptor);
                    }
                }
            }
        }
    }
}

/// Feeds one packet to the audio decoder and fans out every complete frame:
/// PCM to the playback collaborator, bytes into the spectral estimator.
/// `EAGAIN`/`EOF` from the decoder are expected sentinels, not errors.
fn decode_audio(
    decoder: &mut codec::decoder::Audio,
    packet: &ffmpeg_next::Packet,
    converter: &mut SampleConverter,
    estimator: &mut SpectralEstimator,
    sink: &EventSink,
) -> Result<(), ffmpeg_next::Error> {
    match decoder.send_packet(packet) {
        Ok(()) => {}
        Err(error) if is_decoder_sentinel(&error) => return Ok(()),
        Err(error) => {
            error!(%error, "audio decoder rejected packet");
            return Err(error);
        }
    }

    let mut frame = frame::Audio::empty();
    while decoder.receive_frame(&mut frame).is_ok() {
        match converter.convert(&frame) {
            Ok(chunk) => {
                for spectrum in estimator.feed(&chunk.data) {
                    sink.try_emit(EngineEvent::SpectrumUpdated(spectrum));
                }
                sink.emit(EngineEvent::AudioPcmReady(chunk));
            }
            Err(error) => {
                // Conversion failure costs one frame, never the session.
                warn!(%error, "audio sample conversion failed, frame dropped");
            }
        }
    }
    Ok(())
}

/// Feeds one packet to the video decoder and emits a preview image per
/// complete frame.
fn decode_video(
    decoder: &mut codec::decoder::Video,
    packet: &ffmpeg_next::Packet,
    converter: &PixelConverter,
    sink: &EventSink,
) -> Result<(), ffmpeg_next::Error> {
    match decoder.send_packet(packet) {
        Ok(()) => {}
        Err(error) if is_decoder_sentinel(&error) => return Ok(()),
        Err(error) => {
            error!(%error, "video decoder rejected packet");
            return Err(error);
        }
    }

    let mut frame = frame::Video::empty();
    while decoder.receive_frame(&mut frame).is_ok() {
        match converter.convert(&frame) {
            Ok(image) => sink.try_emit(EngineEvent::VideoFrameReady(image)),
            Err(error) => {
                warn!(%error, "pixel conversion failed, frame dropped");
            }
        }
    }
    Ok(())
}

/// Outcome of one packet read attempt.
#[derive(Debug, PartialEq, Eq)]
enum ReadStep {
    Packet,
    Retry,
    EndOfStream,
    Failed(ffmpeg_next::Error),
}

/// `EAGAIN` is retried from the loop top, end-of-file ends the session
/// cleanly, and every other read error drains the session. A dropped RTMP
/// peer surfaces as a persistent read error rather than end-of-file, so
/// retrying anything but `EAGAIN` would spin forever.
fn classify_read(result: Result<(), ffmpeg_next::Error>) -> ReadStep {
    match result {
        Ok(()) => ReadStep::Packet,
        Err(ffmpeg_next::Error::Other { errno })
            if errno == ffmpeg_next::util::error::EAGAIN =>
        {
            ReadStep::Retry
        }
        Err(ffmpeg_next::Error::Eof) => ReadStep::EndOfStream,
        Err(error) => ReadStep::Failed(error),
    }
}

fn is_decoder_sentinel(error: &ffmpeg_next::Error) -> bool {
    match error {
        ffmpeg_next::Error::Eof => true,
        ffmpeg_next::Error::Other { errno } => *errno == ffmpeg_next::util::error::EAGAIN,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_errors_end_the_session_instead_of_retrying() {
        assert_eq!(classify_read(Ok(())), ReadStep::Packet);
        assert_eq!(
            classify_read(Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::util::error::EAGAIN,
            })),
            ReadStep::Retry
        );
        assert_eq!(
            classify_read(Err(ffmpeg_next::Error::Eof)),
            ReadStep::EndOfStream
        );
        assert_eq!(
            classify_read(Err(ffmpeg_next::Error::InvalidData)),
            ReadStep::Failed(ffmpeg_next::Error::InvalidData)
        );
    }

    #[test]
    fn eagain_and_eof_are_sentinels() {
        assert!(is_decoder_sentinel(&ffmpeg_next::Error::Eof));
        assert!(is_decoder_sentinel(&ffmpeg_next::Error::Other {
            errno: ffmpeg_next::util::error::EAGAIN,
        }));
        assert!(!is_decoder_sentinel(&ffmpeg_next::Error::InvalidData));
    }

    #[test]
    fn open_failure_reports_disconnected_and_failed_state() {
        ffmpeg_next::init().unwrap();

        let mut handle = StreamEngine::start(SessionSettings {
            // Unreachable file input keeps the test off the network.
            url: "/nonexistent/rtmp-ingest-test-input".into(),
            output_path: "/tmp/rtmp-ingest-test-output.mp4".into(),
            timeout_secs: 1,
        });
        handle.join();
        assert_eq!(handle.state(), EngineState::Failed);

        let mut saw_url = false;
        let mut saw_disconnect = false;
        while let Ok(event) = handle.events().try_recv() {
            match event {
                EngineEvent::UrlResolved(url) => {
                    assert!(url.contains("rtmp-ingest-test-input"));
                    saw_url = true;
                }
                EngineEvent::ConnectionStatusChanged(connected) => {
                    assert!(!connected);
                    saw_disconnect = true;
                }
                _ => {}
            }
        }
        assert!(saw_url);
        assert!(saw_disconnect);
    }

    #[test]
    fn stop_before_start_is_safe_and_double_join_is_idempotent() {
        ffmpeg_next::init().unwrap();

        let mut handle = StreamEngine::start(SessionSettings {
            url: "/nonexistent/rtmp-ingest-stop-test".into(),
            output_path: "/tmp/rtmp-ingest-stop-test.mp4".into(),
            timeout_secs: 1,
        });
        handle.stop();
        handle.set_audio_output_device("Built-in Output");
        handle.join();
        handle.join();
    }
}
