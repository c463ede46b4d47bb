use thiserror::Error;

/// Errors produced by the demux/decode/encode/mux pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The location could not be opened or its format was not recognized
    #[error("failed to open {location}: {reason}")]
    Open { location: String, reason: String },

    /// An operation was called on a component that is not open
    #[error("{0} is not open")]
    NotOpen(&'static str),

    /// An operation was called out of sequence
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No decoder or encoder implementation exists for the requested codec
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A header option value could not be forwarded to the container
    #[error("unsupported option {key}: {reason}")]
    UnsupportedOption { key: String, reason: String },

    /// A stream of a kind the caller did not accept
    #[error("stream {index} has unsupported media kind {kind}")]
    UnsupportedStream { index: usize, kind: String },

    /// The codec cannot take more input until its output is drained
    #[error("codec is not ready to accept input")]
    NotReady,

    /// The codec has been flushed and takes no further input
    #[error("end of stream")]
    EndOfStream,

    /// Input data was corrupt, truncated or unreadable
    #[error("read error: {0}")]
    Read(#[source] ffmpeg_next::Error),

    /// Container output could not be written
    #[error("write error: {0}")]
    Write(String),

    #[error("decode error on stream {stream_index}: {source}")]
    Decode {
        stream_index: usize,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("encode error on stream {stream_index}: {source}")]
    Encode {
        stream_index: usize,
        #[source]
        source: ffmpeg_next::Error,
    },

    /// The codec kept refusing input while producing no output
    #[error("codec on stream {stream_index} stalled: not ready and nothing to drain")]
    Stalled { stream_index: usize },

    #[error("transcode cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn open(location: &str, reason: impl ToString) -> Self {
        Error::Open {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Write(format!("{}: {}", context, err))
    }

    /// Transient conditions are resolved by draining output and retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NotReady)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
