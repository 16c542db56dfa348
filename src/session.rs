use ffmpeg_next::format::context::{Input, Output};
use ffmpeg_next::{codec, format, media, Dictionary, Packet, Rational};
use tracing::{debug, error, info};

use crate::error::{Role, SessionError};

/// Stream-index table mapping logical roles to input stream indices.
/// Fixed once [`IngestSession::map_streams`] has run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamRoles {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

/// Owns the input and output container handles, the role mapping and the
/// per-role decode contexts for one ingest session.
///
/// Both containers are released on drop on every exit path; the output
/// trailer is written by [`IngestSession::finish`] whenever the header went
/// out, so a mid-stream failure still leaves a playable file.
pub struct IngestSession {
    pub(crate) input: Input,
    pub(crate) output: Output,
    pub(crate) roles: StreamRoles,
    pub(crate) video_decoder: Option<codec::decoder::Video>,
    pub(crate) audio_decoder: Option<codec::decoder::Audio>,
    header_written: bool,
}

impl IngestSession {
    /// Opens the RTMP input with a bounded connection timeout, probes its
    /// streams, and creates the output container. The output file is only
    /// created once the input side is established.
    pub fn open(url: &str, timeout_secs: u32, output_path: &str) -> Result<Self, SessionError> {
        let mut opts = Dictionary::new();
        opts.set("timeout", &timeout_secs.to_string());

        let input =
            format::input_with_dictionary(&url, opts).map_err(|source| SessionError::Open {
                url: url.to_string(),
                source,
            })?;

        if input.streams().count() == 0 {
            return Err(SessionError::Probe {
                url: url.to_string(),
            });
        }
        debug!(%url, streams = input.streams().count(), "input opened and probed");

        let output = format::output(&output_path).map_err(|source| SessionError::Output {
            path: output_path.to_string(),
            source,
        })?;

        Ok(IngestSession {
            input,
            output,
            roles: StreamRoles::default(),
            video_decoder: None,
            audio_decoder: None,
            header_written: false,
        })
    }

    /// Records the first video and first audio stream as the preview roles
    /// and creates one stream-copied output stream per input stream, in
    /// input order.
    pub fn map_streams(&mut self) -> Result<(), SessionError> {
        let mut roles = StreamRoles::default();

        for (index, ist) in self.input.streams().enumerate() {
            let parameters = ist.parameters();
            match parameters.medium() {
                media::Type::Video if roles.video.is_none() => {
                    info!(index, "video role mapped");
                    roles.video = Some(index);
                }
                media::Type::Audio if roles.audio.is_none() => {
                    info!(index, "audio role mapped");
                    roles.audio = Some(index);
                }
                _ => {}
            }

            let mut ost = self
                .output
                .add_stream(parameters.id())
                .map_err(|source| SessionError::UnsupportedContainer { index, source })?;
            ost.set_parameters(parameters);
        }

        self.roles = roles;
        Ok(())
    }

    /// Opens the video decode context. Failure here fails session start when
    /// a preview was requested.
    pub fn open_video_decoder(&mut self) -> Result<(), SessionError> {
        let Some(index) = self.roles.video else {
            return Ok(());
        };
        self.video_decoder = Some(
            open_decoder_context(&self.input, index, Role::Video)?
                .decoder()
                .video()
                .map_err(|source| decoder_error(&self.input, index, Role::Video, source))?,
        );
        Ok(())
    }

    /// Opens the audio decode context. The caller may treat failure as
    /// non-fatal and continue in remux-only mode.
    pub fn open_audio_decoder(&mut self) -> Result<(), SessionError> {
        let Some(index) = self.roles.audio else {
            return Ok(());
        };
        self.audio_decoder = Some(
            open_decoder_context(&self.input, index, Role::Audio)?
                .decoder()
                .audio()
                .map_err(|source| decoder_error(&self.input, index, Role::Audio, source))?,
        );
        Ok(())
    }

    pub fn roles(&self) -> StreamRoles {
        self.roles
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn write_header(&mut self) -> Result<(), SessionError> {
        self.output
            .write_header()
            .map_err(|source| SessionError::Header { source })?;
        self.header_written = true;
        Ok(())
    }

    /// Writes the trailer if a header went out. Called on every exit path;
    /// the container handles themselves are released when the session drops.
    pub fn finish(&mut self) {
        if !self.header_written {
            return;
        }
        self.header_written = false;
        if let Err(error) = self.output.write_trailer() {
            error!(%error, "failed to write output trailer");
        }
    }
}

impl Drop for IngestSession {
    fn drop(&mut self) {
        self.finish();
    }
}

fn open_decoder_context(
    input: &Input,
    index: usize,
    role: Role,
) -> Result<codec::context::Context, SessionError> {
    let stream = input
        .stream(index)
        .expect("role index points at a probed stream");
    codec::context::Context::from_parameters(stream.parameters())
        .map_err(|source| decoder_error(input, index, role, source))
}

fn decoder_error(
    input: &Input,
    index: usize,
    role: Role,
    source: ffmpeg_next::Error,
) -> SessionError {
    if source == ffmpeg_next::Error::DecoderNotFound {
        let codec = input
            .stream(index)
            .map(|stream| stream.parameters().id())
            .unwrap_or(codec::Id::None);
        SessionError::DecoderNotFound { role, codec }
    } else {
        SessionError::DecoderOpen { role, source }
    }
}

/// Rescales a packet's pts/dts/duration from the input stream's time base
/// to the output stream's and marks its byte position unknown, readying it
/// for a stream-copy interleaved write.
pub fn rescale_for_remux(packet: &mut Packet, from: Rational, to: Rational) {
    packet.rescale_ts(from, to);
    packet.set_position(-1);
}
