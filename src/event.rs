use async_channel::{Receiver, Sender, TrySendError};
use tracing::warn;

/// Default capacity of the worker-to-UI event queue. Bounded so a stalled
/// consumer exerts backpressure instead of growing without limit.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// A decoded, display-ready preview frame. Tightly packed RGBA, 4 bytes per
/// pixel, no stride padding.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Playback-ready PCM: interleaved signed 16-bit little-endian samples at the
/// source rate and channel count.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Snapshot of the lower half-spectrum after one estimation window.
/// Both arrays are `FFT_SIZE / 2` magnitudes in dB.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub peak: Vec<f32>,
    pub smoothed: Vec<f32>,
}

/// Events the engine worker emits to its collaborators (UI, audio output,
/// spectrum display). Payloads are immutable snapshots; no codec or
/// container handle ever crosses the thread boundary.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    InfoMessage(String),
    UrlResolved(String),
    ConnectionStatusChanged(bool),
    VideoFrameReady(VideoImage),
    AudioPcmReady(PcmChunk),
    SpectrumUpdated(SpectrumFrame),
}

/// Commands collaborators send to a running engine. Stop is a shared flag
/// rather than a command so it is observed even when the worker is inside
/// the decode path; see [`crate::engine::EngineHandle::stop`].
#[derive(Debug, Clone)]
pub enum EngineCommand {
    SetAudioOutputDevice(String),
}

/// Order-preserving bounded queue from the worker thread to the event-loop
/// side. The worker blocks when the consumer falls `EVENT_QUEUE_CAPACITY`
/// events behind.
pub struct EventSink {
    tx: Sender<EngineEvent>,
}

impl EventSink {
    pub fn bounded(capacity: usize) -> (EventSink, Receiver<EngineEvent>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (EventSink { tx }, rx)
    }

    /// Deliver one event, blocking on a full queue. Delivery failure means
    /// every receiver is gone, which is fine during teardown.
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send_blocking(event).is_err() {
            warn!("event queue closed, dropping engine event");
        }
    }

    /// Non-blocking variant for the high-rate preview payloads (video
    /// frames, spectrum snapshots): a full queue drops the event instead of
    /// stalling the ingest loop.
    pub fn try_emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => warn!("event queue full, dropping engine event"),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EngineEvent::InfoMessage(message.into()));
    }

    pub fn connection_status(&self, connected: bool) {
        self.emit(EngineEvent::ConnectionStatusChanged(connected));
    }
}
