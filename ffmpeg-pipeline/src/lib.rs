/// Registers FFmpeg components (formats, codecs, devices). Call once at
/// startup before opening any input or output.
pub fn init() -> Result<()> {
    ffmpeg_next::init().map_err(|e| Error::Config(format!("ffmpeg_next init: {}", e)))?;
    // keep libav's own stderr output in line with our log level
    let level = if log::log_enabled!(target: "ffmpeg_pipeline", log::Level::Debug) {
        ffmpeg_next::util::log::Level::Info
    } else {
        ffmpeg_next::util::log::Level::Error
    };
    ffmpeg_next::util::log::set_level(level);
    Ok(())
}

pub mod config;
pub mod decoder;
pub mod demuxer;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod muxer;
pub mod options;
pub mod packet;
pub mod pipeline;
pub mod remux;
pub mod scaler;
pub mod stage;
pub mod stream;
pub mod task;
pub mod timestamp;

#[cfg(test)]
pub(crate) mod fixtures;

pub use config::{Endpoint, TranscodeConfig};
pub use decoder::Decoder;
pub use demuxer::Demuxer;
pub use encoder::{Encoder, EncoderHints, EncoderOptions};
pub use error::{Error, Result};
pub use frame::Frame;
pub use metadata::{MediaInfo, probe};
pub use muxer::{Muxer, OutputStream};
pub use options::{HeaderOptions, OptionValue};
pub use packet::Packet;
pub use pipeline::{TranscodeStats, Transcoder, transcode};
pub use remux::{Remuxer, remux};
pub use stream::{MediaKind, StreamDescriptor};
pub use task::{Mode, Progress, TranscodeTask};
