use ffmpeg_next::codec;
use thiserror::Error;

/// Logical stream role inside a session. The first video stream and the
/// first audio stream of the input are mapped to these; everything else is
/// remux-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Video,
    Audio,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Video => write!(f, "video"),
            Role::Audio => write!(f, "audio"),
        }
    }
}

/// Errors raised while bringing an ingest session up or tearing it down.
///
/// Open-phase errors abort the session before any output file exists.
/// `DecoderNotFound`/`DecoderOpen` for the audio role are non-fatal: the
/// engine falls back to remux-only for that stream.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open input {url}: {source}")]
    Open {
        url: String,
        source: ffmpeg_next::Error,
    },

    #[error("input probe found no streams in {url}")]
    Probe { url: String },

    #[error("failed to create output context {path}: {source}")]
    Output {
        path: String,
        source: ffmpeg_next::Error,
    },

    #[error("failed to create output stream for input stream {index}: {source}")]
    UnsupportedContainer {
        index: usize,
        source: ffmpeg_next::Error,
    },

    #[error("no {role} decoder for codec {codec:?}")]
    DecoderNotFound { role: Role, codec: codec::Id },

    #[error("failed to open {role} decoder: {source}")]
    DecoderOpen {
        role: Role,
        source: ffmpeg_next::Error,
    },

    #[error("failed to write output header: {source}")]
    Header { source: ffmpeg_next::Error },
}

impl SessionError {
    /// Audio decoder problems leave the session usable (remux-only, muted
    /// preview); everything else kills the open phase.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::DecoderNotFound {
                role: Role::Audio,
                ..
            } | SessionError::DecoderOpen {
                role: Role::Audio,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_decoder_errors_are_non_fatal() {
        let err = SessionError::DecoderNotFound {
            role: Role::Audio,
            codec: codec::Id::AAC,
        };
        assert!(!err.is_fatal());

        let err = SessionError::DecoderNotFound {
            role: Role::Video,
            codec: codec::Id::H264,
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn open_errors_are_fatal() {
        let err = SessionError::Probe {
            url: "rtmp://10.0.0.1:8889/live/app".into(),
        };
        assert!(err.is_fatal());
    }
}
