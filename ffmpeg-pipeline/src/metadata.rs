//! Container and stream summary for `probe`.

use std::fmt;

use serde::Serialize;

use crate::{demuxer::Demuxer, error::Result, stream::StreamDescriptor, timestamp};

#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    pub format_name: String,
    pub long_name: String,
    /// Seconds, when the container knows its duration.
    pub duration_sec: Option<f64>,
    pub start_sec: Option<f64>,
    /// Bits per second, 0 when unknown.
    pub bit_rate: i64,
    pub nb_streams: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub index: usize,
    pub codec_type: String,
    pub codec_name: String,
    pub time_base: String,
    pub duration_ts: Option<i64>,
    pub frame_rate: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

impl From<&StreamDescriptor> for StreamInfo {
    fn from(stream: &StreamDescriptor) -> Self {
        let video = stream.video();
        let audio = stream.audio();
        let frame_rate = stream
            .guessed_frame_rate()
            .or_else(|| Some(stream.real_frame_rate()))
            .filter(|rate| video.is_some() && timestamp::is_valid(*rate))
            .map(|rate| rate.to_string());
        Self {
            index: stream.index(),
            codec_type: stream.kind().to_string(),
            codec_name: stream.codec_name(),
            time_base: stream.time_base().to_string(),
            duration_ts: stream.duration(),
            frame_rate,
            width: video.as_ref().map(|v| v.width),
            height: video.as_ref().map(|v| v.height),
            sample_rate: audio.as_ref().map(|a| a.sample_rate),
            channels: audio.as_ref().map(|a| a.channels),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

/// Write `key=value`, or `key=N/A` when the value is absent.
fn field<T: fmt::Display>(f: &mut fmt::Formatter<'_>, key: &str, value: Option<T>) -> fmt::Result {
    match value {
        Some(value) => writeln!(f, "{}={}", key, value),
        None => writeln!(f, "{}=N/A", key),
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[STREAM]")?;
        field(f, "index", Some(self.index))?;
        field(f, "codec_type", Some(&self.codec_type))?;
        field(f, "codec_name", Some(&self.codec_name))?;
        field(f, "time_base", Some(&self.time_base))?;
        field(f, "duration_ts", self.duration_ts)?;
        match self.codec_type.as_str() {
            "video" => {
                field(f, "width", self.width)?;
                field(f, "height", self.height)?;
                field(f, "frame_rate", self.frame_rate.as_ref())?;
            }
            "audio" => {
                field(f, "sample_rate", self.sample_rate)?;
                field(f, "channels", self.channels)?;
            }
            _ => {}
        }
        writeln!(f, "[/STREAM]")
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = &self.format;
        writeln!(f, "[FORMAT]")?;
        field(f, "format_name", Some(&format.format_name))?;
        field(f, "format_long_name", Some(&format.long_name))?;
        field(f, "start_time", format.start_sec.map(|s| format!("{:.6}", s)))?;
        field(f, "duration", format.duration_sec.map(|d| format!("{:.6}", d)))?;
        field(f, "bit_rate", Some(format.bit_rate).filter(|b| *b > 0))?;
        field(f, "nb_streams", Some(format.nb_streams))?;
        writeln!(f, "[/FORMAT]")?;
        self.streams.iter().try_for_each(|stream| write!(f, "{}", stream))
    }
}

/// Container values in `AV_TIME_BASE` units, as seconds.
fn seconds(value: i64) -> Option<f64> {
    (value != timestamp::NOPTS)
        .then(|| value as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE))
}

/// Open `location` (optionally forcing its container `format`) and
/// summarize it.
pub fn probe(location: &str, format: Option<&str>) -> Result<MediaInfo> {
    let mut demuxer = Demuxer::new();
    demuxer.open(location, format)?;

    let input = demuxer.input()?;
    let container = input.format();
    let format = FormatInfo {
        format_name: container.name().to_string(),
        long_name: container.description().to_string(),
        duration_sec: seconds(input.duration()).filter(|d| *d > 0.0),
        start_sec: seconds(unsafe { (*input.as_ptr()).start_time }),
        bit_rate: input.bit_rate(),
        nb_streams: input.nb_streams(),
    };
    let streams = demuxer.streams()?.iter().map(StreamInfo::from).collect();

    demuxer.close();
    Ok(MediaInfo { format, streams })
}
