pub mod config;
pub mod convert;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod event;
pub mod session;
pub mod spectrum;

//
// Re-export
//
pub use config::Config;
pub use convert::{PixelConverter, SampleConverter};
pub use discovery::resolve_endpoint;
pub use engine::{EngineHandle, EngineState, SessionSettings, StreamEngine};
pub use error::{Role, SessionError};
pub use event::{EngineCommand, EngineEvent, PcmChunk, SpectrumFrame, VideoImage};
pub use session::{IngestSession, StreamRoles};
pub use spectrum::{SpectralEstimator, FFT_SIZE, SPECTRUM_FLOOR_DB};
